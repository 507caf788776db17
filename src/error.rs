use crate::CameraId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Calibration Error: {0}")]
    CalibrationError(String),

    #[error("Config Error: {0}")]
    ConfigError(String),

    #[error("Unknown camera: {0}")]
    UnknownCamera(CameraId),

    #[error("Delivery Error: {0}")]
    DeliveryError(String),

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    JsonError(#[from] serde_json::Error),
}
