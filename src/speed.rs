use std::collections::HashMap;

use log::{debug, info};
use nalgebra as na;

use crate::bbox::{BBox, Ltrb};
use crate::config::SpeedConfig;
use crate::error::Error;
use crate::homography::Homography;
use crate::window::{Sample, SampleWindow};

/// Measurements above this are treated as detector noise.
pub const MAX_PLAUSIBLE_KMH: f64 = 200.0;

const MS_TO_KMH: f64 = 3.6;

fn center(bbox: &BBox<Ltrb>) -> na::Point2<f64> {
    let c = bbox.center();
    na::Point2::new(c.x as f64, c.y as f64)
}

/// Ground speed between two samples in km/h. `None` when time does not move
/// forward or either center cannot be projected.
fn speed_between(h: &Homography, from: &Sample, to: &Sample) -> Option<f64> {
    let dt = to.ts - from.ts;
    if !(dt > 0.0) {
        return None;
    }

    let meters = h.distance(center(&from.bbox), center(&to.bbox))?;

    Some(meters / dt * MS_TO_KMH)
}

#[inline]
fn plausible(kmh: f64) -> bool {
    (0.0..=MAX_PLAUSIBLE_KMH).contains(&kmh)
}

/// Per-track ground speed over a sliding window of bbox centers.
pub struct SpeedEstimator {
    config: SpeedConfig,
    homography: Option<Homography>,
    windows: HashMap<u64, SampleWindow>,
}

impl SpeedEstimator {
    pub fn new(config: SpeedConfig, homography: Option<Homography>) -> Result<Self, Error> {
        config.validate()?;

        info!(
            "speed estimator: filter_window={} fps={} homography={}",
            config.filter_window,
            config.fps,
            if homography.is_some() { "set" } else { "none" }
        );

        Ok(Self {
            config,
            homography,
            windows: HashMap::new(),
        })
    }

    #[inline]
    pub fn config(&self) -> &SpeedConfig {
        &self.config
    }

    #[inline]
    pub fn homography(&self) -> Option<&Homography> {
        self.homography.as_ref()
    }

    pub fn set_homography(&mut self, homography: Homography) {
        info!("homography updated");
        self.homography = Some(homography);
    }

    pub fn clear_homography(&mut self) {
        self.homography = None;
    }

    /// Records a sample for the track and returns its windowed speed in km/h.
    pub fn update(&mut self, track_id: u64, bbox: &BBox<Ltrb>, ts: f64) -> Option<f64> {
        let h = self.homography.as_ref()?;
        let filter_window = self.config.filter_window;

        let window = self
            .windows
            .entry(track_id)
            .or_insert_with(|| SampleWindow::new(filter_window));
        window.push(ts, *bbox);

        let (from, to) = window.span()?;
        let kmh = speed_between(h, from, to)?;

        if plausible(kmh) {
            Some(kmh)
        } else {
            debug!("track {}: implausible speed {:.1} km/h dropped", track_id, kmh);
            None
        }
    }

    /// Mean of the speeds between every consecutive pair of buffered samples.
    pub fn average_speed(&self, track_id: u64) -> Option<f64> {
        let h = self.homography.as_ref()?;
        let window = self.windows.get(&track_id)?;

        let (sum, count) = window
            .pairs()
            .filter_map(|(a, b)| speed_between(h, a, b))
            .filter(|kmh| *kmh > 0.0 && *kmh < MAX_PLAUSIBLE_KMH)
            .fold((0.0, 0usize), |(sum, n), kmh| (sum + kmh, n + 1));

        if count > 0 {
            Some(sum / count as f64)
        } else {
            None
        }
    }

    pub fn remove_track(&mut self, track_id: u64) {
        self.windows.remove(&track_id);
    }

    #[inline]
    pub fn tracked_count(&self) -> usize {
        self.windows.len()
    }
}
