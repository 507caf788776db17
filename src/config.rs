use std::fs;
use std::path::Path;

use log::info;
use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::CameraId;

fn invalid(msg: String) -> Error {
    Error::ConfigError(msg)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Matches needed before a track is reported.
    pub min_hits: u32,
    /// Unmatched cycles after which a track is dropped.
    pub max_age: u32,
    pub iou_threshold: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_hits: 3,
            max_age: 30,
            iou_threshold: 0.3,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.min_hits == 0 {
            return Err(invalid("min_hits must be at least 1".into()));
        }
        if self.max_age == 0 {
            return Err(invalid("max_age must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.iou_threshold) {
            return Err(invalid(format!(
                "iou_threshold must be within [0, 1), got {}",
                self.iou_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SpeedConfig {
    /// Processing rate in frames per second.
    pub fps: u32,
    /// Meters. Accepted for camera profiles, not applied to the estimate.
    pub min_distance: f64,
    /// Samples between the two points a speed is measured from.
    pub filter_window: usize,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            fps: 10,
            min_distance: 2.0,
            filter_window: 5,
        }
    }
}

impl SpeedConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.fps == 0 {
            return Err(invalid("fps must be at least 1".into()));
        }
        if !(self.min_distance >= 0.0 && self.min_distance.is_finite()) {
            return Err(invalid(format!(
                "min_distance must be a non-negative number, got {}",
                self.min_distance
            )));
        }
        if self.filter_window < 2 {
            return Err(invalid(format!(
                "filter_window must be at least 2, got {}",
                self.filter_window
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ViolationConfig {
    /// km/h
    pub speed_limit: f64,
    /// Fraction of the limit tolerated before an incident is raised.
    pub tolerance: f64,
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self {
            speed_limit: 50.0,
            tolerance: 0.10,
        }
    }
}

impl ViolationConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.speed_limit > 0.0 && self.speed_limit.is_finite()) {
            return Err(invalid(format!(
                "speed_limit must be positive, got {}",
                self.speed_limit
            )));
        }
        if !(self.tolerance >= 0.0 && self.tolerance.is_finite()) {
            return Err(invalid(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Either a stored matrix or the point pairs to solve one from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum CalibrationConfig {
    Matrix {
        matrix: [[f64; 3]; 3],
    },
    Points {
        pixel_points: Vec<[f64; 2]>,
        world_points: Vec<[f64; 2]>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CameraConfig {
    pub camera_id: CameraId,
    /// Capture rate of the source. When higher than `speed.fps` only every
    /// n-th captured frame is processed.
    #[serde(default)]
    pub source_fps: Option<u32>,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub speed: SpeedConfig,
    #[serde(default)]
    pub violation: ViolationConfig,
    #[serde(default)]
    pub calibration: Option<CalibrationConfig>,
}

impl CameraConfig {
    pub fn new(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            source_fps: None,
            tracker: TrackerConfig::default(),
            speed: SpeedConfig::default(),
            violation: ViolationConfig::default(),
            calibration: None,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.tracker.validate()?;
        self.speed.validate()?;
        self.violation.validate()?;

        if self.source_fps == Some(0) {
            return Err(invalid(format!(
                "camera {}: source_fps must be at least 1",
                self.camera_id
            )));
        }

        Ok(())
    }

    /// Number of captured frames per processed frame.
    pub fn frame_stride(&self) -> u64 {
        match self.source_fps {
            Some(source) => (source / self.speed.fps).max(1) as u64,
            None => 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SinkConfig {
    /// Incidents buffered between the tracking loop and the delivery thread.
    pub capacity: usize,
    pub send_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            send_timeout_ms: 100,
        }
    }
}

impl SinkConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.capacity == 0 {
            return Err(invalid("sink capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub cameras: Vec<CameraConfig>,
    pub sink: SinkConfig,
}

impl MonitorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let config: MonitorConfig = serde_json::from_str(&json)?;
        config.validate()?;

        info!(
            "config loaded from {}: {} camera(s)",
            path.display(),
            config.cameras.len()
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.sink.validate()?;

        for (idx, camera) in self.cameras.iter().enumerate() {
            camera.validate()?;

            if self.cameras[..idx]
                .iter()
                .any(|c| c.camera_id == camera.camera_id)
            {
                return Err(invalid(format!(
                    "camera {} is configured twice",
                    camera.camera_id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(CameraConfig::new(1).validate().is_ok());
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut camera = CameraConfig::new(1);
        camera.tracker.iou_threshold = 1.0;
        assert!(matches!(camera.validate(), Err(Error::ConfigError(_))));

        let mut camera = CameraConfig::new(1);
        camera.speed.filter_window = 1;
        assert!(camera.validate().is_err());

        let mut camera = CameraConfig::new(1);
        camera.violation.speed_limit = 0.0;
        assert!(camera.validate().is_err());

        let mut camera = CameraConfig::new(1);
        camera.tracker.max_age = 0;
        assert!(camera.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_cameras() {
        let config = MonitorConfig {
            cameras: vec![CameraConfig::new(4), CameraConfig::new(4)],
            sink: SinkConfig::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn frame_stride_follows_source_rate() {
        let mut camera = CameraConfig::new(1);
        assert_eq!(camera.frame_stride(), 1);

        camera.source_fps = Some(30);
        assert_eq!(camera.frame_stride(), 3);

        camera.source_fps = Some(5);
        assert_eq!(camera.frame_stride(), 1);
    }

    #[test]
    fn parses_both_calibration_forms() {
        let json = r#"{
            "cameras": [
                {
                    "camera_id": 1,
                    "violation": { "speed_limit": 60.0 },
                    "calibration": { "matrix": [[0.1, 0, 0], [0, 0.1, 0], [0, 0, 1]] }
                },
                {
                    "camera_id": 2,
                    "source_fps": 30,
                    "calibration": {
                        "pixel_points": [[0, 0], [100, 0], [100, 100], [0, 100]],
                        "world_points": [[0, 0], [10, 0], [10, 10], [0, 10]]
                    }
                }
            ]
        }"#;

        let config: MonitorConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.cameras[0].violation.speed_limit, 60.0);
        assert_eq!(config.cameras[0].violation.tolerance, 0.10);
        assert!(matches!(
            config.cameras[0].calibration,
            Some(CalibrationConfig::Matrix { .. })
        ));
        assert!(matches!(
            config.cameras[1].calibration,
            Some(CalibrationConfig::Points { .. })
        ));
        assert_eq!(config.cameras[1].tracker, TrackerConfig::default());
        assert_eq!(config.sink.capacity, 256);
    }
}
