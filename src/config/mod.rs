//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Camera capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera index passed to the capture backend (0 = default camera)
    pub device_index: i32,
    /// Requested frame width; the camera may pick the nearest mode it supports
    pub width: u32,
    /// Requested frame height
    pub height: u32,
    /// Stop after this many failed reads in a row (0 = keep retrying forever)
    pub max_consecutive_failures: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 640,
            max_consecutive_failures: 300,
        }
    }
}

/// Inference configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Path to the ONNX model file
    pub model_path: PathBuf,
    /// Minimum class score for a detection to be kept
    pub confidence_threshold: f32,
    /// IoU above which overlapping boxes of the same class are suppressed
    pub iou_threshold: f32,
    /// Square model input size in pixels
    pub image_size: u32,
    /// Upper bound on detections per frame after NMS
    pub max_detections: usize,
    /// Device: "auto", "cpu", "cuda", "coreml"
    pub device: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./s_ubuntu_640.onnx"),
            confidence_threshold: 0.4,
            iou_threshold: 0.7,
            image_size: 640,
            max_detections: 300,
            device: "auto".to_string(),
        }
    }
}

/// Display window configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub window_name: String,
    pub fullscreen: bool,
    /// Key that ends the loop
    pub quit_key: char,
    /// Milliseconds to wait for a key press after each shown frame
    pub wait_ms: i32,
    /// Box line width; derived from the frame size when unset
    pub line_width: Option<u32>,
    pub show_labels: bool,
    pub show_confidence: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_name: "yolo inference".to_string(),
            fullscreen: true,
            quit_key: 'q',
            wait_ms: 1,
            line_width: None,
            show_labels: true,
            show_confidence: true,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub inference: InferenceConfig,
    pub display: DisplayConfig,
}

/// Values given on the command line, applied on top of the file or defaults
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub model_path: Option<PathBuf>,
    pub device_index: Option<i32>,
    pub confidence_threshold: Option<f32>,
    pub iou_threshold: Option<f32>,
    pub image_size: Option<u32>,
    pub device: Option<String>,
    pub windowed: bool,
}

const SUPPORTED_DEVICES: [&str; 4] = ["auto", "cpu", "cuda", "coreml"];

impl AppConfig {
    /// Load configuration from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(path.to_path_buf(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_toml_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(format!("TOML serialize error: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::FileWriteError(path.to_path_buf(), e))?;

        Ok(())
    }

    /// Apply command line overrides
    pub fn apply_overrides(&mut self, overrides: CliOverrides) {
        if let Some(model) = overrides.model_path {
            self.inference.model_path = model;
        }
        if let Some(index) = overrides.device_index {
            self.capture.device_index = index;
        }
        if let Some(conf) = overrides.confidence_threshold {
            self.inference.confidence_threshold = conf;
        }
        if let Some(iou) = overrides.iou_threshold {
            self.inference.iou_threshold = iou;
        }
        if let Some(size) = overrides.image_size {
            self.inference.image_size = size;
        }
        if let Some(device) = overrides.device {
            self.inference.device = device;
        }
        if overrides.windowed {
            self.display.fullscreen = false;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let inference = &self.inference;

        if !(0.0..=1.0).contains(&inference.confidence_threshold) {
            return Err(ConfigError::invalid(
                "confidence_threshold",
                inference.confidence_threshold,
            ));
        }

        if !(0.0..=1.0).contains(&inference.iou_threshold) {
            return Err(ConfigError::invalid("iou_threshold", inference.iou_threshold));
        }

        // YOLO strides need the input to be a multiple of 32
        if inference.image_size == 0 || inference.image_size % 32 != 0 {
            return Err(ConfigError::invalid("image_size", inference.image_size));
        }

        if inference.max_detections == 0 {
            return Err(ConfigError::invalid("max_detections", 0));
        }

        if !SUPPORTED_DEVICES.contains(&inference.device.as_str()) {
            return Err(ConfigError::invalid("device", &inference.device));
        }

        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::invalid(
                "capture size",
                format!("{}x{}", self.capture.width, self.capture.height),
            ));
        }

        if self.capture.device_index < 0 {
            return Err(ConfigError::invalid(
                "device_index",
                self.capture.device_index,
            ));
        }

        // wait_key(0) blocks until a key is pressed
        if self.display.wait_ms <= 0 {
            return Err(ConfigError::invalid("wait_ms", self.display.wait_ms));
        }

        if !self.display.quit_key.is_ascii() || self.display.quit_key.is_ascii_control() {
            return Err(ConfigError::invalid(
                "quit_key",
                self.display.quit_key.escape_default(),
            ));
        }

        if self.display.line_width == Some(0) {
            return Err(ConfigError::invalid("line_width", 0));
        }

        Ok(())
    }

    /// Get model file path
    pub fn model_path(&self) -> &Path {
        &self.inference.model_path
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    FileReadError(PathBuf, std::io::Error),

    #[error("Failed to write config file {0}: {1}")]
    FileWriteError(PathBuf, std::io::Error),

    #[error("Config parse error: {0}")]
    ParseError(String),

    #[error("Config serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },
}

impl ConfigError {
    fn invalid(field: &str, value: impl std::fmt::Display) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}
