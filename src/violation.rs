use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::config::ViolationConfig;
use crate::error::Error;
use crate::track::Track;
use crate::CameraId;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    Speed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncidentExtra {
    pub hits: u32,
    pub age: u32,
}

/// A speeding observation, handed once to the sink.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Incident {
    pub camera_id: CameraId,
    pub incident_type: IncidentKind,
    pub track_id: u64,
    pub detected_class: String,
    pub speed_kmh: f64,
    pub speed_limit: f64,
    pub bbox: BBox<Ltrb>,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    pub extra_data: IncidentExtra,
}

/// Compares a measured speed against the limit plus tolerance. Keeps no
/// memory between calls.
#[derive(Debug, Clone)]
pub struct ViolationEvaluator {
    config: ViolationConfig,
}

impl ViolationEvaluator {
    pub fn new(config: ViolationConfig) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &ViolationConfig {
        &self.config
    }

    /// Speeds strictly above this are violations.
    #[inline]
    pub fn threshold(&self) -> f64 {
        self.config.speed_limit * (1.0 + self.config.tolerance)
    }

    #[inline]
    pub fn is_violation(&self, speed_kmh: Option<f64>) -> bool {
        matches!(speed_kmh, Some(kmh) if kmh > self.threshold())
    }

    pub fn evaluate(
        &self,
        camera_id: CameraId,
        track: &Track,
        speed_kmh: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> Option<Incident> {
        if !self.is_violation(speed_kmh) {
            return None;
        }

        Some(Incident {
            camera_id,
            incident_type: IncidentKind::Speed,
            track_id: track.track_id,
            detected_class: track.class_name.clone(),
            speed_kmh: speed_kmh?,
            speed_limit: self.config.speed_limit,
            bbox: track.bbox,
            confidence: track.confidence,
            timestamp,
            extra_data: IncidentExtra {
                hits: track.hits,
                age: track.age,
            },
        })
    }
}
