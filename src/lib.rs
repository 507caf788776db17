pub mod bbox;
pub mod camera;
pub mod class;
pub mod config;
pub mod detection;
pub mod error;
pub mod frame;
pub mod homography;
pub mod scene;
pub mod sink;
pub mod speed;
pub mod violation;

mod circular_queue;
mod math;
mod track;
mod window;

pub use camera::{Annotation, CameraPipeline, FrameReport};
pub use detection::Detection;
pub use frame::Frame;
pub use track::{Track, TrackState};

use config::{CameraConfig, MonitorConfig};
use error::Error;
use log::info;
use sink::IncidentSink;
use std::collections::HashMap;
use std::sync::Arc;

pub type CameraId = u32;

pub trait Tracking {
    fn update(&mut self, frame: &Frame) -> Result<Option<FrameReport>, Error>;
    fn tracks(&self, camera_id: CameraId) -> Arc<[Track]>;
}

/// Independent camera pipelines sharing one sink for incidents and
/// processed frames.
pub struct SpeedMonitor<S: IncidentSink> {
    cameras: HashMap<CameraId, CameraPipeline>,
    sink: S,
}

impl<S: IncidentSink> SpeedMonitor<S> {
    pub fn new(sink: S) -> Self {
        Self {
            cameras: HashMap::new(),
            sink,
        }
    }

    pub fn from_config(config: &MonitorConfig, sink: S) -> Result<Self, Error> {
        config.validate()?;

        let mut monitor = Self::new(sink);
        for camera in &config.cameras {
            monitor.add_camera(camera)?;
        }

        Ok(monitor)
    }

    pub fn add_camera(&mut self, config: &CameraConfig) -> Result<(), Error> {
        if self.cameras.contains_key(&config.camera_id) {
            return Err(Error::ConfigError(format!(
                "camera {} already registered",
                config.camera_id
            )));
        }

        let pipeline = CameraPipeline::new(config)?;
        self.cameras.insert(config.camera_id, pipeline);
        info!("camera {} registered", config.camera_id);

        Ok(())
    }

    pub fn remove_camera(&mut self, camera_id: CameraId) -> Option<CameraPipeline> {
        self.cameras.remove(&camera_id)
    }

    pub fn calibrate(
        &mut self,
        camera_id: CameraId,
        pixels: &[[f64; 2]],
        world: &[[f64; 2]],
    ) -> Result<(), Error> {
        self.cameras
            .get_mut(&camera_id)
            .ok_or(Error::UnknownCamera(camera_id))?
            .calibrate(pixels, world)
    }

    #[inline]
    pub fn pipeline(&self, camera_id: CameraId) -> Option<&CameraPipeline> {
        self.cameras.get(&camera_id)
    }

    #[inline]
    pub fn pipeline_mut(&mut self, camera_id: CameraId) -> Option<&mut CameraPipeline> {
        self.cameras.get_mut(&camera_id)
    }

    pub fn camera_ids(&self) -> Vec<CameraId> {
        let mut ids: Vec<_> = self.cameras.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[inline]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

impl<S: IncidentSink> crate::Tracking for SpeedMonitor<S> {
    fn update(&mut self, frame: &Frame) -> Result<Option<FrameReport>, Error> {
        let pipeline = self
            .cameras
            .get_mut(&frame.camera_id)
            .ok_or(Error::UnknownCamera(frame.camera_id))?;

        let report = pipeline.process(frame);

        if let Some(report) = &report {
            for incident in &report.incidents {
                self.sink.report(incident.clone());
            }
            self.sink.report_frame(report.clone());
        }

        Ok(report)
    }

    #[inline]
    fn tracks(&self, camera_id: CameraId) -> Arc<[Track]> {
        if let Some(pipeline) = self.cameras.get(&camera_id) {
            return pipeline.tracks();
        }

        Arc::new([])
    }
}
