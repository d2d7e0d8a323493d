//! Image preprocessing utilities

use crate::error::{YcResult, YoloCamError};
use crate::utils::Detection;
use opencv::{core, imgproc, prelude::*};
use rayon::prelude::*;

/// Grey used by Ultralytics for letterbox padding
pub const PAD_VALUE: f64 = 114.0;

/// Geometry of a letterbox transform, used to map boxes back to the source frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Source-to-target scale factor
    pub scale: f32,
    /// Horizontal padding on the left, in target pixels
    pub pad_x: f32,
    /// Vertical padding on the top, in target pixels
    pub pad_y: f32,
}

impl Letterbox {
    /// Compute the letterbox for fitting `src` into `target`, preserving aspect ratio
    pub fn fit(src_w: i32, src_h: i32, target_w: i32, target_h: i32) -> (Self, i32, i32) {
        let scale = (target_w as f64 / src_w as f64).min(target_h as f64 / src_h as f64);
        let new_w = ((src_w as f64 * scale).round() as i32).clamp(1, target_w);
        let new_h = ((src_h as f64 * scale).round() as i32).clamp(1, target_h);

        let letterbox = Self {
            scale: scale as f32,
            pad_x: ((target_w - new_w) / 2) as f32,
            pad_y: ((target_h - new_h) / 2) as f32,
        };
        (letterbox, new_w, new_h)
    }

    /// Map a box from model-input space back onto a `src_w x src_h` frame
    pub fn to_source(&self, detection: &Detection, src_w: f32, src_h: f32) -> Detection {
        Detection {
            x1: (detection.x1 - self.pad_x) / self.scale,
            y1: (detection.y1 - self.pad_y) / self.scale,
            x2: (detection.x2 - self.pad_x) / self.scale,
            y2: (detection.y2 - self.pad_y) / self.scale,
            ..detection.clone()
        }
        .clamped(src_w, src_h)
    }
}

/// Image preprocessor for YOLO inference
#[derive(Clone)]
pub struct Preprocessor {
    target_width: i32,
    target_height: i32,
}

impl Preprocessor {
    /// Create a new preprocessor with target dimensions
    pub fn new(target_width: i32, target_height: i32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Letterbox an image to target size preserving aspect ratio
    pub fn letterbox(&self, src: &core::Mat) -> YcResult<(core::Mat, Letterbox)> {
        if src.empty() {
            return Err(YoloCamError::EmptyFrame);
        }

        let src_size = src.size()?;
        let (letterbox, new_w, new_h) = Letterbox::fit(
            src_size.width,
            src_size.height,
            self.target_width,
            self.target_height,
        );

        let mut dst = core::Mat::new_rows_cols_with_default(
            self.target_height,
            self.target_width,
            src.typ(),
            core::Scalar::all(PAD_VALUE),
        )?;

        let mut resized = core::Mat::default();
        imgproc::resize(
            src,
            &mut resized,
            core::Size::new(new_w, new_h),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let roi_rect = core::Rect::new(
            letterbox.pad_x as i32,
            letterbox.pad_y as i32,
            new_w,
            new_h,
        );
        let mut roi = dst.roi_mut(roi_rect)?;
        resized.copy_to(&mut roi)?;

        Ok((dst, letterbox))
    }

    /// Convert an 8-bit RGB image to a normalized float tensor in HWC order
    pub fn rgb_to_tensor(&self, mat: &core::Mat) -> YcResult<Vec<f32>> {
        let data = mat.data_bytes()?;
        let total = (self.target_width * self.target_height * 3) as usize;

        if data.len() < total {
            return Err(YoloCamError::Preprocessing(format!(
                "image data too small: {} < {}",
                data.len(),
                total
            )));
        }

        Ok(data[..total]
            .par_iter()
            .map(|&pixel| pixel as f32 / 255.0)
            .collect())
    }

    /// Convert HWC (Height-Width-Channel) to CHW (Channel-Height-Width) format
    pub fn hwc_to_chw(&self, hwc_data: &[f32]) -> YcResult<Vec<f32>> {
        let plane = (self.target_height * self.target_width) as usize;
        let channels = 3;

        if hwc_data.len() != plane * channels {
            return Err(YoloCamError::Preprocessing(format!(
                "data size mismatch: {} != {}",
                hwc_data.len(),
                plane * channels
            )));
        }

        let mut chw_data = vec![0.0f32; plane * channels];
        chw_data
            .par_chunks_mut(plane)
            .enumerate()
            .for_each(|(c, channel)| {
                for (i, value) in channel.iter_mut().enumerate() {
                    *value = hwc_data[i * channels + c];
                }
            });

        Ok(chw_data)
    }

    /// Full pipeline for a BGR camera frame: letterbox, BGR to RGB, normalize, CHW
    pub fn process(&self, src: &core::Mat) -> YcResult<(Vec<f32>, Letterbox)> {
        if src.typ() != core::CV_8UC3 {
            return Err(YoloCamError::Preprocessing(format!(
                "expected 8-bit 3-channel frame, got type {}",
                src.typ()
            )));
        }

        let (letterboxed, letterbox) = self.letterbox(src)?;
        let mut rgb = core::Mat::default();
        imgproc::cvt_color_def(&letterboxed, &mut rgb, imgproc::COLOR_BGR2RGB)?;

        let normalized = self.rgb_to_tensor(&rgb)?;
        let chw_data = self.hwc_to_chw(&normalized)?;
        Ok((chw_data, letterbox))
    }

    /// Get the target dimensions
    pub fn target_size(&self) -> (i32, i32) {
        (self.target_width, self.target_height)
    }
}

/// Default preprocessor for 640x640 YOLO models
impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(640, 640)
    }
}
