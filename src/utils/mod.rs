//! Utility types and functions

pub mod detection;
pub mod labels;

pub use detection::{apply_class_nms, apply_nms, filter_by_confidence, Detection};
pub use labels::{ClassNames, LabelParseError, COCO_NAMES};
