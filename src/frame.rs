use serde_derive::{Deserialize, Serialize};

use crate::detection::Detection;
use crate::CameraId;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Frame {
    pub camera_id: CameraId,
    pub timestamp: f64, // in seconds
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl Frame {
    pub fn new(camera_id: CameraId, timestamp: f64, detections: Vec<Detection>) -> Self {
        Self {
            camera_id,
            timestamp,
            detections,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
