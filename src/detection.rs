use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::class::ObjectClass;

/// One object reported by the detector for a single frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BBox<Ltrb>,
    pub confidence: f32,
    pub class_id: i32,
    pub class_name: String,
}

impl Detection {
    pub fn new(bbox: BBox<Ltrb>, confidence: f32, class_id: i32, class_name: &str) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
            class_name: class_name.to_string(),
        }
    }

    #[inline]
    pub fn class(&self) -> ObjectClass {
        ObjectClass::resolve(&self.class_name, self.class_id)
    }

    /// Detections with non-finite geometry or score never seed a track.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.bbox.is_finite() && self.confidence.is_finite()
    }

    #[inline(always)]
    pub fn iou(&self, other: &BBox<Ltrb>) -> f32 {
        self.bbox.iou(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_detector_output() {
        let det: Detection = serde_json::from_str(
            r#"{"bbox":[10.0,20.0,110.0,80.0],"confidence":0.82,"class_id":2,"class_name":"car"}"#,
        )
        .unwrap();

        assert_eq!(det.bbox, BBox::ltrb(10.0, 20.0, 110.0, 80.0));
        assert_eq!(det.class(), ObjectClass::Car);
        assert!(det.is_finite());
    }
}
