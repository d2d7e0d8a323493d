//! yolocam
//!
//! Live object detection on a webcam feed: frames are captured with OpenCV,
//! run through a YOLOv8 ONNX model on ONNX Runtime, annotated and shown in a
//! fullscreen window until the quit key is pressed.

pub mod annotate;
pub mod capture;
pub mod config;
pub mod display;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod pipeline;
pub mod preprocessing;
pub mod utils;

// Re-export commonly used types
pub use annotate::{Annotator, Palette};
pub use capture::{Camera, FrameSource};
pub use config::{AppConfig, CaptureConfig, CliOverrides, DisplayConfig, InferenceConfig};
pub use display::{is_quit_key, FrameSink, Window};
pub use error::{YcResult, YoloCamError};
pub use inference::{
    InferenceBackend, InferenceError, ModelPostProcessor, OrtBackend, YoloPostProcessor,
};
pub use metrics::{FrameTimer, JsonReporter, LogReporter, Metrics, MetricsReporter};
pub use pipeline::{run, DetectionLoop, FrameProcessor, RunOptions};
pub use preprocessing::{Letterbox, Preprocessor};
pub use utils::{ClassNames, Detection};

/// Current version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
