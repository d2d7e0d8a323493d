//! ML inference abstractions and the YOLOv8 output decoder

use crate::utils::{ClassNames, Detection};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod ort_backend;

pub use ort_backend::{OrtBackend, OrtBackendBuilder};

/// Inference backend trait for different ML runtimes
pub trait InferenceBackend: Send + Sync {
    /// Load a model from the given path
    fn load_model(&mut self, path: &Path) -> Result<(), InferenceError>;

    /// Run inference on a CHW input tensor; boxes are in model-input pixels
    fn infer(&self, input: &[f32]) -> Result<Vec<Detection>, InferenceError>;

    /// Expected input shape [batch, channels, height, width]
    fn input_shape(&self) -> &[usize];

    /// Class labels known to the loaded model
    fn class_names(&self) -> &ClassNames;

    fn confidence_threshold(&self) -> f32;

    /// Set the confidence threshold for filtering detections
    fn set_confidence_threshold(&mut self, threshold: f32);
}

/// Model post-processor trait for converting raw outputs to detections
pub trait ModelPostProcessor {
    /// Decode raw model output of the given shape into scored boxes
    fn process_raw_output(
        &self,
        output: &[f32],
        output_shape: &[usize],
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, InferenceError>;

    /// Apply Non-Maximum Suppression to detections
    fn apply_nms(&self, detections: Vec<Detection>) -> Vec<Detection>;

    /// Number of classes encoded in an output of this shape
    fn class_count(&self, output_shape: &[usize]) -> Result<usize, InferenceError>;
}

/// Inference-related errors
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model file does not exist: {0}")]
    ModelNotFound(PathBuf),

    #[error("Model loading failed: {0}")]
    ModelLoadError(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Invalid input shape: expected {expected:?}, got {actual:?}")]
    InvalidInputShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid output format: {0}")]
    InvalidOutputFormat(String),

    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("ORT runtime error: {0}")]
    OrtError(String),
}

/// Memory layout of a YOLOv8 detection head output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// `[1, 4 + nc, anchors]`, the standard Ultralytics export
    ChannelMajor,
    /// `[1, anchors, 4 + nc]`
    AnchorMajor,
}

/// Dimensions decoded from a YOLOv8 output shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputGeometry {
    pub layout: OutputLayout,
    pub num_anchors: usize,
    pub num_classes: usize,
}

/// Anchors a YOLOv8 head produces for a `width x height` input (strides 8, 16 and 32)
pub fn anchor_count(width: usize, height: usize) -> usize {
    [8, 16, 32]
        .iter()
        .map(|stride| width.div_ceil(*stride) * height.div_ceil(*stride))
        .sum()
}

impl OutputGeometry {
    /// Work out the layout from the shape.
    ///
    /// `[1, 4 + nc, N]` is assumed unless the first axis equals
    /// `expected_anchors` and the second does not.
    pub fn from_shape(
        shape: &[usize],
        expected_anchors: Option<usize>,
    ) -> Result<Self, InferenceError> {
        let (a, b) = match shape {
            [1, a, b] => (*a, *b),
            [a, b] => (*a, *b),
            _ => {
                return Err(InferenceError::InvalidOutputFormat(format!(
                    "expected [1, C, N] output, got {:?}",
                    shape
                )))
            }
        };

        let anchor_major = expected_anchors.is_some_and(|n| a == n && b != n);
        let (layout, channels, num_anchors) = if anchor_major {
            (OutputLayout::AnchorMajor, b, a)
        } else {
            (OutputLayout::ChannelMajor, a, b)
        };

        if channels < 5 {
            return Err(InferenceError::InvalidOutputFormat(format!(
                "need at least 5 channels (4 box + 1 class), got {}",
                channels
            )));
        }

        Ok(Self {
            layout,
            num_anchors,
            num_classes: channels - 4,
        })
    }

    fn channels(&self) -> usize {
        self.num_classes + 4
    }

    fn value(&self, output: &[f32], anchor: usize, channel: usize) -> f32 {
        match self.layout {
            OutputLayout::ChannelMajor => output[channel * self.num_anchors + anchor],
            OutputLayout::AnchorMajor => output[anchor * self.channels() + channel],
        }
    }
}

/// YOLOv8 post-processor: best-class selection, confidence filter, class-aware NMS
#[derive(Debug, Clone)]
pub struct YoloPostProcessor {
    iou_threshold: f32,
    max_detections: usize,
    expected_anchors: Option<usize>,
}

impl YoloPostProcessor {
    pub fn new(iou_threshold: f32, max_detections: usize) -> Self {
        Self {
            iou_threshold,
            max_detections,
            expected_anchors: None,
        }
    }

    /// Model input size, used to recognise `[1, N, 4 + nc]` outputs
    pub fn with_input_size(mut self, width: usize, height: usize) -> Self {
        self.expected_anchors = Some(anchor_count(width, height));
        self
    }

    pub fn expected_anchors(&self) -> Option<usize> {
        self.expected_anchors
    }

    pub fn iou_threshold(&self) -> f32 {
        self.iou_threshold
    }

    pub fn max_detections(&self) -> usize {
        self.max_detections
    }
}

impl Default for YoloPostProcessor {
    /// Ultralytics predict defaults
    fn default() -> Self {
        Self::new(0.7, 300)
    }
}

impl ModelPostProcessor for YoloPostProcessor {
    fn process_raw_output(
        &self,
        output: &[f32],
        output_shape: &[usize],
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, InferenceError> {
        let geometry = OutputGeometry::from_shape(output_shape, self.expected_anchors)?;
        let expected = geometry.num_anchors * geometry.channels();
        if output.len() != expected {
            return Err(InferenceError::InvalidOutputFormat(format!(
                "output has {} values, shape {:?} needs {}",
                output.len(),
                output_shape,
                expected
            )));
        }

        let mut detections = Vec::new();
        for anchor in 0..geometry.num_anchors {
            let mut best_score = f32::NEG_INFINITY;
            let mut best_class = 0usize;
            for class_idx in 0..geometry.num_classes {
                let score = geometry.value(output, anchor, 4 + class_idx);
                if score > best_score {
                    best_score = score;
                    best_class = class_idx;
                }
            }

            if best_score < confidence_threshold {
                continue;
            }

            // Ultralytics exports boxes as pixel-space (cx, cy, w, h)
            detections.push(Detection::from_center(
                geometry.value(output, anchor, 0),
                geometry.value(output, anchor, 1),
                geometry.value(output, anchor, 2),
                geometry.value(output, anchor, 3),
                best_score,
                best_class as i32,
            ));
        }

        Ok(detections)
    }

    fn apply_nms(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let mut kept = crate::utils::apply_class_nms(detections, self.iou_threshold);
        kept.truncate(self.max_detections);
        kept
    }

    fn class_count(&self, output_shape: &[usize]) -> Result<usize, InferenceError> {
        Ok(OutputGeometry::from_shape(output_shape, self.expected_anchors)?.num_classes)
    }
}
