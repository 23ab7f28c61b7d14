//! Error types shared across the fusion engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    /// Homography, floor bounds or zone definitions are missing or malformed.
    #[error("calibration error: {0}")]
    Calibration(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A pipeline stage could not be started or terminated abnormally.
    #[error("pipeline error: {0}")]
    Pipeline(String),
}

impl FusionError {
    pub(crate) fn calibration(msg: impl Into<String>) -> Self {
        Self::Calibration(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FusionError>;
