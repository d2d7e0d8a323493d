//! Error handling for the yolocam detection loop
//!
//! Structured error types covering the failure modes of capture, inference,
//! display and configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for yolocam
#[derive(Error, Debug)]
pub enum YoloCamError {
    // Capture errors
    #[error("Camera device {device_index} not found or not accessible")]
    CameraNotFound { device_index: i32 },

    #[error("Camera stopped delivering frames: {0} consecutive reads failed")]
    CaptureLost(u32),

    #[error("Captured frame is empty")]
    EmptyFrame,

    // Inference errors
    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Inference execution failed: {0}")]
    Inference(String),

    #[error("Frame preprocessing failed: {0}")]
    Preprocessing(String),

    // Display errors
    #[error("Display window error: {0}")]
    Display(String),

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),

    // Configuration errors
    #[error("Configuration parsing failed: {0}")]
    ConfigParse(String),

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidConfigValue { field: String, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type YcResult<T> = std::result::Result<T, YoloCamError>;

impl From<crate::inference::InferenceError> for YoloCamError {
    fn from(err: crate::inference::InferenceError) -> Self {
        match err {
            crate::inference::InferenceError::ModelNotFound(path) => {
                YoloCamError::ModelNotFound(path)
            }
            crate::inference::InferenceError::OrtError(msg) => {
                YoloCamError::Inference(format!("ONNX Runtime error: {}", msg))
            }
            other => YoloCamError::Inference(other.to_string()),
        }
    }
}

impl From<crate::config::ConfigError> for YoloCamError {
    fn from(err: crate::config::ConfigError) -> Self {
        match err {
            crate::config::ConfigError::InvalidValue { field, value } => {
                YoloCamError::InvalidConfigValue { field, value }
            }
            crate::config::ConfigError::FileReadError(_, e)
            | crate::config::ConfigError::FileWriteError(_, e) => YoloCamError::Io(e),
            other => YoloCamError::ConfigParse(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for YoloCamError {
    fn from(err: toml::de::Error) -> Self {
        YoloCamError::ConfigParse(err.to_string())
    }
}
