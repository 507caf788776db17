use crate::bbox::{BBox, Ltrb};
use crate::circular_queue::CircularQueue;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub bbox: BBox<Ltrb>,
    pub ts: f64,
}

/// Rolling `(bbox, timestamp)` buffer of one track, `2 * filter_window` long.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    filter_window: usize,
    samples: CircularQueue<Sample>,
}

impl SampleWindow {
    pub fn new(filter_window: usize) -> Self {
        Self {
            filter_window,
            samples: CircularQueue::with_capacity(filter_window * 2),
        }
    }

    #[inline]
    pub fn push(&mut self, ts: f64, bbox: BBox<Ltrb>) {
        self.samples.push(Sample { bbox, ts });
    }

    /// The samples at `len - filter_window` and `len - 1`, once at least
    /// `filter_window` samples are buffered.
    pub fn span(&self) -> Option<(&Sample, &Sample)> {
        let len = self.samples.len();
        if len < self.filter_window {
            return None;
        }

        Some((
            self.samples.get(len - self.filter_window)?,
            self.samples.newest()?,
        ))
    }

    /// Every consecutive pair, oldest first.
    pub fn pairs(&self) -> impl Iterator<Item = (&Sample, &Sample)> {
        self.samples.iter().zip(self.samples.iter().skip(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32) -> BBox<Ltrb> {
        BBox::ltrb(x, 0.0, x + 10.0, 10.0)
    }

    #[test]
    fn span_needs_a_full_filter_window() {
        let mut w = SampleWindow::new(3);
        w.push(0.0, bbox(0.0));
        w.push(1.0, bbox(1.0));
        assert!(w.span().is_none());

        w.push(2.0, bbox(2.0));
        let (a, b) = w.span().unwrap();
        assert_eq!((a.ts, b.ts), (0.0, 2.0));
    }

    #[test]
    fn keeps_twice_the_filter_window() {
        let mut w = SampleWindow::new(3);
        for i in 0..10 {
            w.push(i as f64, bbox(i as f32));
        }

        let (a, b) = w.span().unwrap();
        assert_eq!((a.ts, b.ts), (7.0, 9.0));
        assert_eq!(w.pairs().count(), 5);
        assert_eq!(w.pairs().next().map(|(a, b)| (a.ts, b.ts)), Some((4.0, 5.0)));
    }
}
