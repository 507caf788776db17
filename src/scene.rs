use log::{debug, info, trace};
use ndarray::Array2;

use crate::bbox::{BBox, Ltrb};
use crate::circular_queue::CircularQueue;
use crate::config::TrackerConfig;
use crate::detection::Detection;
use crate::error::Error;
use crate::track::{Track, TrackState};

/// Unmatched detections must be strictly above this to start a track.
pub const SPAWN_CONFIDENCE: f32 = 0.5;
pub const HISTORY_CAPACITY: usize = 30;
pub const REPORTED_HISTORY: usize = 10;

#[derive(Debug)]
enum IndexedSliceKind {
    All,
    Indexes(Vec<usize>),
}

/// A view on a subset of a slice that remembers where each element came from.
pub struct IndexedSlice<'a, T> {
    pub slice: &'a [T],
    kind: IndexedSliceKind,
}

impl<'a, T> IndexedSlice<'a, T> {
    pub fn new(slice: &'a [T]) -> Self {
        Self {
            slice,
            kind: IndexedSliceKind::All,
        }
    }

    pub fn new_with_indexes(slice: &'a [T], idx: Vec<usize>) -> Self {
        Self {
            slice,
            kind: IndexedSliceKind::Indexes(idx),
        }
    }

    /// Position in the underlying slice of the `idx`-th element of the view.
    #[inline]
    pub fn get_index(&self, idx: usize) -> usize {
        match &self.kind {
            IndexedSliceKind::All => idx,
            IndexedSliceKind::Indexes(idxs) => idxs[idx],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match &self.kind {
            IndexedSliceKind::All => self.slice.len(),
            IndexedSliceKind::Indexes(idxs) => idxs.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn all_indexes(&self) -> Vec<usize> {
        match &self.kind {
            IndexedSliceKind::All => (0..self.slice.len()).collect(),
            IndexedSliceKind::Indexes(idxs) => idxs.clone(),
        }
    }
}

impl<'a, T> std::ops::Index<usize> for IndexedSlice<'a, T> {
    type Output = T;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.slice[self.get_index(index)]
    }
}

pub enum IndexedSliceIter<'a, T> {
    All(std::slice::Iter<'a, T>),
    Indexes((&'a [T], std::vec::IntoIter<usize>)),
}

impl<'a, T> Iterator for IndexedSliceIter<'a, T> {
    type Item = &'a T;
    fn next(&mut self) -> Option<&'a T> {
        match self {
            IndexedSliceIter::All(it) => it.next(),
            IndexedSliceIter::Indexes((slice, it)) => slice.get(it.next()?),
        }
    }
}

impl<'a, T> IntoIterator for IndexedSlice<'a, T> {
    type Item = &'a T;
    type IntoIter = IndexedSliceIter<'a, T>;
    fn into_iter(self) -> Self::IntoIter {
        match self.kind {
            IndexedSliceKind::All => IndexedSliceIter::All(self.slice.iter()),
            IndexedSliceKind::Indexes(idxs) => {
                IndexedSliceIter::Indexes((self.slice, idxs.into_iter()))
            }
        }
    }
}

/// Rows are detections, columns are participants.
pub fn iou_matrix(
    dets: &IndexedSlice<'_, Detection>,
    objs: &IndexedSlice<'_, Participant>,
) -> Array2<f32> {
    Array2::from_shape_fn((dets.len(), objs.len()), |(d, o)| {
        dets[d].iou(&objs[o].bbox)
    })
}

/// Greedy sort-and-consume matching. Pairs above `threshold` are taken in
/// descending score order, skipping any whose row or column is already
/// claimed. Equal scores keep row-major order. Returns `(row, col, score)`.
pub fn greedy_assignment(scores: &Array2<f32>, threshold: f32) -> Vec<(usize, usize, f32)> {
    let (rows, cols) = scores.dim();

    let mut pairs: Vec<(usize, usize, f32)> = scores
        .indexed_iter()
        .filter(|(_, score)| **score > threshold)
        .map(|((r, c), score)| (r, c, *score))
        .collect();

    // sort_by is stable
    pairs.sort_by(|a, b| b.2.total_cmp(&a.2));

    let mut row_taken = vec![false; rows];
    let mut col_taken = vec![false; cols];

    pairs.retain(|&(r, c, _)| {
        if row_taken[r] || col_taken[c] {
            return false;
        }

        row_taken[r] = true;
        col_taken[c] = true;
        true
    });

    pairs
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: u64,
    pub state: TrackState,
    pub bbox: BBox<Ltrb>,
    pub confidence: f32,
    pub class_id: i32,
    pub class_name: String,
    pub hits: u32,
    pub age: u32,
    pub history: CircularQueue<(BBox<Ltrb>, f64)>,
}

impl Participant {
    pub fn new(id: u64, ts_sec: f64, det: &Detection) -> Self {
        let mut history = CircularQueue::with_capacity(HISTORY_CAPACITY);
        history.push((det.bbox, ts_sec));

        Self {
            id,
            state: TrackState::Tracked,
            bbox: det.bbox,
            confidence: det.confidence,
            class_id: det.class_id,
            class_name: det.class_name.clone(),
            hits: 1,
            age: 0,
            history,
        }
    }

    pub fn update(&mut self, ts_sec: f64, det: &Detection) {
        self.bbox = det.bbox;
        self.confidence = det.confidence;
        self.class_id = det.class_id;
        if self.class_name != det.class_name {
            self.class_name.clone_from(&det.class_name);
        }

        self.state = TrackState::Tracked;
        self.hits += 1;
        self.age = 0;
        self.history.push((det.bbox, ts_sec));
    }

    #[inline]
    pub fn mark_lost(&mut self) {
        self.state = TrackState::Lost;
    }

    /// One more cycle without a match.
    #[inline]
    pub fn miss(&mut self) {
        self.age = self.age.saturating_add(1);
    }
}

impl From<&Participant> for Track {
    fn from(p: &Participant) -> Track {
        Track {
            track_id: p.id,
            bbox: p.bbox,
            confidence: p.confidence,
            class_id: p.class_id,
            class_name: p.class_name.clone(),
            age: p.age,
            hits: p.hits,
            history: p
                .history
                .latest(REPORTED_HISTORY)
                .map(|(bbox, _)| *bbox)
                .collect(),
        }
    }
}

/// Per-camera tracker: owns every track and its identity.
pub struct Scene {
    config: TrackerConfig,
    participants: Vec<Participant>,
    next_id: u64,
    frame_count: u64,
    removed: Vec<u64>,
}

impl Scene {
    pub fn new(config: TrackerConfig) -> Result<Self, Error> {
        config.validate()?;

        info!(
            "scene created: min_hits={} max_age={} iou_threshold={}",
            config.min_hits, config.max_age, config.iou_threshold
        );

        Ok(Self {
            config,
            participants: Vec::with_capacity(64),
            next_id: 1,
            frame_count: 0,
            removed: Vec::new(),
        })
    }

    /// Indexes of participants in `state`, in id order.
    fn indexes_in(&self, state: TrackState) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.participants.len())
            .filter(|&i| self.participants[i].state == state)
            .collect();

        idx.sort_by_key(|&i| self.participants[i].id);
        idx
    }

    fn assignment<'a>(
        &self,
        dets: IndexedSlice<'a, Detection>,
        objs: IndexedSlice<'_, Participant>,
    ) -> (Vec<(usize, usize, f32)>, IndexedSlice<'a, Detection>) {
        if dets.is_empty() || objs.is_empty() {
            let all = dets.all_indexes();
            return (Vec::new(), IndexedSlice::new_with_indexes(dets.slice, all));
        }

        let scores = iou_matrix(&dets, &objs);
        let mut claimed = vec![false; dets.len()];
        let mut assignments = Vec::new();

        for (d, o, score) in greedy_assignment(&scores, self.config.iou_threshold) {
            trace!(
                "det {} -> track {} (iou {:.3})",
                dets.get_index(d),
                objs[o].id,
                score
            );

            claimed[d] = true;
            assignments.push((objs.get_index(o), dets.get_index(d), score));
        }

        let missed = (0..dets.len())
            .filter(|&d| !claimed[d])
            .map(|d| dets.get_index(d))
            .collect();

        (
            assignments,
            IndexedSlice::new_with_indexes(dets.slice, missed),
        )
    }

    /// Feeds one frame of detections and returns the confirmed tracks.
    pub fn update(&mut self, detections: &[Detection], ts_sec: f64) -> Vec<Track> {
        self.frame_count += 1;
        self.removed.clear();

        let mut updated = vec![false; self.participants.len()];

        // active tracks first
        let tracked = self.indexes_in(TrackState::Tracked);
        let (matched, missed) = self.assignment(
            IndexedSlice::new(detections),
            IndexedSlice::new_with_indexes(&self.participants, tracked.clone()),
        );

        for (i, j, _) in matched {
            self.participants[i].update(ts_sec, &detections[j]);
            updated[i] = true;
        }

        for i in tracked {
            if !updated[i] {
                self.participants[i].mark_lost();
            }
        }

        // leftovers may belong to a briefly occluded track
        let lost = self.indexes_in(TrackState::Lost);
        let (recovered, missed) = self.assignment(
            missed,
            IndexedSlice::new_with_indexes(&self.participants, lost),
        );

        for (i, j, score) in recovered {
            let p = &mut self.participants[i];
            debug!(
                "track {} recovered after {} frame(s) (iou {:.3})",
                p.id, p.age, score
            );

            p.update(ts_sec, &detections[j]);
            updated[i] = true;
        }

        for (p, _) in self
            .participants
            .iter_mut()
            .zip(updated.iter())
            .filter(|(_, u)| !**u)
        {
            p.miss();
        }

        for det in missed {
            if det.confidence > SPAWN_CONFIDENCE && det.is_finite() {
                let id = self.next_id;
                self.next_id += 1;

                debug!(
                    "track {} spawned: {} ({:.2})",
                    id, det.class_name, det.confidence
                );

                self.participants
                    .push(Participant::new(id, ts_sec, det));
            }
        }

        for i in (0..self.participants.len()).rev() {
            if self.participants[i].age >= self.config.max_age {
                let mut p = self.participants.swap_remove(i);
                p.state = TrackState::Removed;

                debug!("track {} removed after {} missed frame(s)", p.id, p.age);
                self.removed.push(p.id);
            }
        }
        self.removed.sort_unstable();

        self.tracks()
    }

    /// Tracked participants with enough hits, in id order.
    pub fn tracks(&self) -> Vec<Track> {
        let mut out: Vec<Track> = self
            .participants
            .iter()
            .filter(|p| p.state == TrackState::Tracked && p.hits >= self.config.min_hits)
            .map(Into::into)
            .collect();

        out.sort_by_key(|t| t.track_id);
        out
    }

    /// Ids dropped by the last update.
    #[inline]
    pub fn removed(&self) -> &[u64] {
        &self.removed
    }

    pub fn participant(&self, id: u64) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    #[inline]
    pub fn state(&self, id: u64) -> Option<TrackState> {
        self.participant(id).map(|p| p.state)
    }

    #[inline]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
