//! Detection data structures and utilities

use std::collections::BTreeMap;
use std::fmt;

/// A detected object with bounding box and classification
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Left X coordinate
    pub x1: f32,
    /// Top Y coordinate
    pub y1: f32,
    /// Right X coordinate
    pub x2: f32,
    /// Bottom Y coordinate
    pub y2: f32,
    /// Confidence score (0.0 to 1.0)
    pub score: f32,
    /// Class ID
    pub class_id: i32,
}

impl Detection {
    /// Create a new detection
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, class_id: i32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            score,
            class_id,
        }
    }

    /// Build a detection from a center-format box
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32, score: f32, class_id: i32) -> Self {
        Self::new(
            cx - w * 0.5,
            cy - h * 0.5,
            cx + w * 0.5,
            cy + h * 0.5,
            score,
            class_id,
        )
    }

    /// Calculate the area of the bounding box
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Get the center point of the bounding box
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Get the width of the bounding box
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    /// Get the height of the bounding box
    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Clamp the box to `[0, width] x [0, height]`
    pub fn clamped(&self, width: f32, height: f32) -> Detection {
        Detection {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
            ..self.clone()
        }
    }

    /// Calculate Intersection over Union (IoU) with another detection
    pub fn iou(&self, other: &Detection) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }

        intersection / union
    }

    /// Check if this detection overlaps with another
    pub fn overlaps_with(&self, other: &Detection, threshold: f32) -> bool {
        self.iou(other) > threshold
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Detection(class={}, score={:.2}, bbox=({:.1}, {:.1}, {:.1}, {:.1}))",
            self.class_id,
            self.score,
            self.x1,
            self.y1,
            self.width(),
            self.height()
        )
    }
}

fn sort_by_score(detections: &mut [Detection]) {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Apply Non-Maximum Suppression to a list of detections, ignoring classes
pub fn apply_nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    sort_by_score(&mut detections);

    let mut keep = Vec::new();
    let mut suppress = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppress[i] {
            continue;
        }

        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppress[j] {
                continue;
            }

            if detections[i].overlaps_with(&detections[j], iou_threshold) {
                suppress[j] = true;
            }
        }
    }

    keep
}

/// Apply NMS separately within each class; boxes of different classes never
/// suppress each other. Output is sorted by score, highest first.
pub fn apply_class_nms(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let mut by_class: BTreeMap<i32, Vec<Detection>> = BTreeMap::new();
    for detection in detections {
        by_class.entry(detection.class_id).or_default().push(detection);
    }

    let mut keep: Vec<Detection> = by_class
        .into_values()
        .flat_map(|group| apply_nms(group, iou_threshold))
        .collect();
    sort_by_score(&mut keep);
    keep
}

/// Filter detections by confidence threshold (inclusive)
pub fn filter_by_confidence(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.score >= threshold)
        .collect()
}
