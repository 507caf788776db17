use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::class::SPEEDING_COLOR;
use crate::config::{CalibrationConfig, CameraConfig};
use crate::error::Error;
use crate::frame::Frame;
use crate::homography::Homography;
use crate::scene::Scene;
use crate::speed::SpeedEstimator;
use crate::track::Track;
use crate::violation::{Incident, ViolationEvaluator};
use crate::CameraId;

/// Drawing hint for one confirmed track. Rendering happens elsewhere.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Annotation {
    pub track_id: u64,
    pub bbox: BBox<Ltrb>,
    pub label: String,
    pub color: [u8; 3],
    pub speed_kmh: Option<f64>,
    pub speeding: bool,
}

impl Annotation {
    fn new(track: &Track, speed_kmh: Option<f64>, speeding: bool) -> Self {
        let class = track.class();

        let name = if track.class_name.is_empty() {
            class.name()
        } else {
            track.class_name.as_str()
        };

        let mut label = format!("ID:{} {}", track.track_id, name);
        if let Some(kmh) = speed_kmh {
            label.push_str(&format!(" {:.1} km/h", kmh));
        }

        Self {
            track_id: track.track_id,
            bbox: track.bbox,
            label,
            color: if speeding { SPEEDING_COLOR } else { class.color() },
            speed_kmh,
            speeding,
        }
    }
}

/// Everything one processed frame produced.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub camera_id: CameraId,
    pub timestamp: f64,
    pub tracks: Vec<Track>,
    pub annotations: Vec<Annotation>,
    pub incidents: Vec<Incident>,
}

fn homography_from(calibration: &CalibrationConfig) -> Result<Homography, Error> {
    match calibration {
        CalibrationConfig::Matrix { matrix } => Homography::from_rows(*matrix),
        CalibrationConfig::Points {
            pixel_points,
            world_points,
        } => Homography::calibrate(pixel_points, world_points),
    }
}

/// Sequential tracking loop of a single camera.
pub struct CameraPipeline {
    camera_id: CameraId,
    scene: Scene,
    speed: SpeedEstimator,
    violations: ViolationEvaluator,
    stride: u64,
    captured: u64,
    last_tracks: Arc<[Track]>,
}

impl CameraPipeline {
    pub fn new(config: &CameraConfig) -> Result<Self, Error> {
        config.validate()?;

        let homography = match &config.calibration {
            Some(calibration) => Some(homography_from(calibration)?),
            None => {
                warn!(
                    "camera {}: no calibration, speeds stay unknown",
                    config.camera_id
                );
                None
            }
        };

        let stride = config.frame_stride();
        info!("camera {}: processing every {} frame(s)", config.camera_id, stride);

        Ok(Self {
            camera_id: config.camera_id,
            scene: Scene::new(config.tracker.clone())?,
            speed: SpeedEstimator::new(config.speed.clone(), homography)?,
            violations: ViolationEvaluator::new(config.violation.clone())?,
            stride,
            captured: 0,
            last_tracks: Arc::new([]),
        })
    }

    #[inline]
    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    #[inline]
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Whether the next captured frame is due for processing.
    #[inline]
    pub fn should_process(&self) -> bool {
        self.captured % self.stride == 0
    }

    /// Runs one captured frame through tracking, speed and violation checks.
    /// Frames skipped by the stride return `None` and leave all state as is.
    pub fn process(&mut self, frame: &Frame) -> Option<FrameReport> {
        let due = self.should_process();
        self.captured += 1;

        if !due {
            return None;
        }

        let tracks = self.scene.update(&frame.detections, frame.timestamp);

        for &id in self.scene.removed() {
            self.speed.remove_track(id);
        }

        let mut annotations = Vec::with_capacity(tracks.len());
        let mut incidents = Vec::new();

        for track in &tracks {
            let speed = self.speed.update(track.track_id, &track.bbox, frame.timestamp);
            let speeding = self.violations.is_violation(speed);

            annotations.push(Annotation::new(track, speed, speeding));

            if let Some(incident) =
                self.violations
                    .evaluate(self.camera_id, track, speed, Utc::now())
            {
                debug!(
                    "camera {}: track {} at {:.1} km/h over {:.1}",
                    self.camera_id,
                    track.track_id,
                    incident.speed_kmh,
                    incident.speed_limit
                );
                incidents.push(incident);
            }
        }

        self.last_tracks = tracks.clone().into_boxed_slice().into();

        Some(FrameReport {
            camera_id: self.camera_id,
            timestamp: frame.timestamp,
            tracks,
            annotations,
            incidents,
        })
    }

    /// Solves a new homography and installs it. On failure the current one
    /// stays in place.
    pub fn calibrate(&mut self, pixels: &[[f64; 2]], world: &[[f64; 2]]) -> Result<(), Error> {
        match Homography::calibrate(pixels, world) {
            Ok(h) => {
                self.speed.set_homography(h);
                Ok(())
            }
            Err(err) => {
                warn!("camera {}: calibration rejected: {}", self.camera_id, err);
                Err(err)
            }
        }
    }

    /// Confirmed tracks of the last processed frame.
    #[inline]
    pub fn tracks(&self) -> Arc<[Track]> {
        self.last_tracks.clone()
    }

    #[inline]
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    #[inline]
    pub fn speed(&self) -> &SpeedEstimator {
        &self.speed
    }

    #[inline]
    pub fn speed_mut(&mut self) -> &mut SpeedEstimator {
        &mut self.speed
    }

    #[inline]
    pub fn violations(&self) -> &ViolationEvaluator {
        &self.violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ObjectClass;
    use crate::detection::Detection;

    fn scaled_camera() -> CameraConfig {
        let mut config = CameraConfig::new(3);
        config.calibration = Some(CalibrationConfig::Matrix {
            matrix: [[0.1, 0.0, 0.0], [0.0, 0.1, 0.0], [0.0, 0.0, 1.0]],
        });
        config
    }

    fn car_at(x: f32) -> Detection {
        Detection::new(BBox::ltrb(x, 100.0, x + 80.0, 160.0), 0.9, 2, "car")
    }

    #[test]
    fn stride_skips_frames_without_touching_state() {
        let mut config = scaled_camera();
        config.source_fps = Some(30);

        let mut cam = CameraPipeline::new(&config).unwrap();
        assert_eq!(cam.stride(), 3);

        let mut processed = 0;
        for i in 0..9 {
            let frame = Frame::new(3, i as f64 / 30.0, vec![car_at(0.0)]);
            if cam.process(&frame).is_some() {
                processed += 1;
            }
        }

        assert_eq!(processed, 3);
        assert_eq!(cam.scene().frame_count(), 3);
    }

    #[test]
    fn fast_car_gets_flagged_and_annotated() {
        let mut cam = CameraPipeline::new(&scaled_camera()).unwrap();

        // 20 px per 0.1 s = 2 m per 0.1 s = 72 km/h
        let mut last = None;
        for i in 0..8 {
            let frame = Frame::new(3, i as f64 * 0.1, vec![car_at(20.0 * i as f32)]);
            last = cam.process(&frame);
        }

        let report = last.unwrap();
        assert_eq!(report.tracks.len(), 1);
        assert_eq!(report.incidents.len(), 1);

        let incident = &report.incidents[0];
        assert!((incident.speed_kmh - 72.0).abs() < 1e-3, "{}", incident.speed_kmh);

        let note = &report.annotations[0];
        assert!(note.speeding);
        assert_eq!(note.color, SPEEDING_COLOR);
        assert_eq!(note.label, "ID:1 car 72.0 km/h");
    }

    #[test]
    fn unknown_speed_label_has_no_speed() {
        let mut cam = CameraPipeline::new(&CameraConfig::new(1)).unwrap();

        let mut last = None;
        for i in 0..4 {
            let frame = Frame::new(1, i as f64 * 0.1, vec![car_at(10.0 * i as f32)]);
            last = cam.process(&frame);
        }

        let report = last.unwrap();
        let note = &report.annotations[0];
        assert_eq!(note.label, "ID:1 car");
        assert_eq!(note.speed_kmh, None);
        assert!(!note.speeding);
        assert!(report.incidents.is_empty());
    }

    #[test]
    fn unnamed_detections_are_labelled_by_class_id() {
        let mut cam = CameraPipeline::new(&CameraConfig::new(1)).unwrap();

        let truck = |x: f32| Detection::new(BBox::ltrb(x, 100.0, x + 80.0, 160.0), 0.9, 7, "");
        let mut last = None;
        for i in 0..3 {
            last = cam.process(&Frame::new(1, i as f64 * 0.1, vec![truck(5.0 * i as f32)]));
        }

        let note = &last.unwrap().annotations[0];
        assert_eq!(note.label, "ID:1 truck");
        assert_eq!(note.color, ObjectClass::Truck.color());
    }

    #[test]
    fn removed_tracks_release_their_speed_window() {
        let mut config = scaled_camera();
        config.tracker.max_age = 2;
        let mut cam = CameraPipeline::new(&config).unwrap();

        for i in 0..4 {
            cam.process(&Frame::new(3, i as f64 * 0.1, vec![car_at(0.0)]));
        }
        assert_eq!(cam.speed().tracked_count(), 1);

        cam.process(&Frame::new(3, 0.4, vec![]));
        cam.process(&Frame::new(3, 0.5, vec![]));

        assert!(cam.scene().is_empty());
        assert_eq!(cam.speed().tracked_count(), 0);
        assert!(cam.tracks().is_empty());
    }

    #[test]
    fn failed_calibration_keeps_previous_homography() {
        let mut cam = CameraPipeline::new(&scaled_camera()).unwrap();
        let before = cam.speed().homography().cloned();

        let err = cam.calibrate(&[[0.0, 0.0]], &[[0.0, 0.0]]);
        assert!(matches!(err, Err(Error::CalibrationError(_))));
        assert_eq!(cam.speed().homography().cloned(), before);
    }

    #[test]
    fn point_calibration_in_config() {
        let mut config = CameraConfig::new(5);
        config.calibration = Some(CalibrationConfig::Points {
            pixel_points: vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]],
            world_points: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]],
        });

        let cam = CameraPipeline::new(&config).unwrap();
        assert!(cam.speed().homography().is_some());
    }
}
