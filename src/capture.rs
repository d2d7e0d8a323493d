//! OpenCV-backed camera capture

use crate::config::CaptureConfig;
use crate::error::{YcResult, YoloCamError};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture},
};
use tracing::{debug, info, warn};

/// Source of BGR frames for the detection loop
pub trait FrameSource {
    /// Read the next frame into `frame`. `Ok(false)` means the read failed or
    /// produced nothing; the caller skips that iteration.
    fn read_frame(&mut self, frame: &mut Mat) -> YcResult<bool>;

    /// Release the underlying device. Calling it twice is a no-op.
    fn release(&mut self) -> YcResult<()>;

    fn is_open(&self) -> bool;
}

/// A webcam opened through OpenCV's `VideoCapture`
pub struct Camera {
    capture: VideoCapture,
    device_index: i32,
    released: bool,
}

impl Camera {
    /// Open the camera at `config.device_index` and request the configured resolution
    pub fn open(config: &CaptureConfig) -> YcResult<Self> {
        let device_index = config.device_index;
        let capture = VideoCapture::new(device_index, videoio::CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(YoloCamError::CameraNotFound { device_index });
        }

        let mut camera = Self {
            capture,
            device_index,
            released: false,
        };
        camera.request_resolution(config.width, config.height);
        Ok(camera)
    }

    /// Ask for a capture size; drivers round to the closest supported mode
    fn request_resolution(&mut self, width: u32, height: u32) {
        for (prop, value, name) in [
            (videoio::CAP_PROP_FRAME_WIDTH, width, "width"),
            (videoio::CAP_PROP_FRAME_HEIGHT, height, "height"),
        ] {
            match self.capture.set(prop, value as f64) {
                Ok(true) => {}
                Ok(false) => debug!("Camera ignored requested frame {} {}", name, value),
                Err(e) => warn!("Failed to set camera frame {}: {}", name, e),
            }
        }

        let actual_w = self.capture.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0);
        let actual_h = self.capture.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0);
        info!(
            "Camera {} opened: requested {}x{}, delivering {}x{}",
            self.device_index, width, height, actual_w, actual_h
        );
    }
}

impl FrameSource for Camera {
    fn read_frame(&mut self, frame: &mut Mat) -> YcResult<bool> {
        if self.released {
            return Ok(false);
        }

        match self.capture.read(frame) {
            Ok(true) => Ok(!frame.empty()),
            Ok(false) => Ok(false),
            Err(e) => {
                debug!("Frame read error: {}", e);
                Ok(false)
            }
        }
    }

    fn release(&mut self) -> YcResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.capture.release()?;
        info!("Camera {} released", self.device_index);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.released
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release camera {}: {}", self.device_index, e);
        }
    }
}
