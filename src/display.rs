//! Fullscreen preview window built on OpenCV highgui

use crate::config::DisplayConfig;
use crate::error::{YcResult, YoloCamError};
use opencv::{core::Mat, highgui, prelude::*};
use tracing::{debug, warn};

/// Destination for annotated frames, plus the keyboard attached to it
pub trait FrameSink {
    fn show(&mut self, frame: &Mat) -> YcResult<()>;

    /// Pump window events and return the key pressed, if any
    fn poll_key(&mut self) -> YcResult<Option<i32>>;

    /// Close the window. Calling it twice is a no-op.
    fn close(&mut self) -> YcResult<()>;
}

/// True if `key` (as returned by `wait_key`) is the configured quit key.
///
/// Only the low byte is compared; some backends set modifier bits above it.
pub fn is_quit_key(key: i32, quit_key: char) -> bool {
    key >= 0 && (key & 0xFF) as u32 == quit_key as u32
}

/// A named OpenCV window
pub struct Window {
    name: String,
    wait_ms: i32,
    closed: bool,
}

impl Window {
    /// Create the window once, going fullscreen when configured
    pub fn open(config: &DisplayConfig) -> YcResult<Self> {
        highgui::named_window(&config.window_name, highgui::WINDOW_NORMAL).map_err(|e| {
            YoloCamError::Display(format!(
                "cannot create window '{}': {}",
                config.window_name, e
            ))
        })?;

        // From here on Drop destroys the window if setup fails
        let window = Self {
            name: config.window_name.clone(),
            wait_ms: config.wait_ms,
            closed: false,
        };

        if config.fullscreen {
            highgui::set_window_property(
                &window.name,
                highgui::WND_PROP_FULLSCREEN,
                highgui::WINDOW_FULLSCREEN as f64,
            )
            .map_err(|e| {
                YoloCamError::Display(format!(
                    "cannot make window '{}' fullscreen: {}",
                    window.name, e
                ))
            })?;
        }

        debug!(
            "Window '{}' created (fullscreen: {})",
            window.name, config.fullscreen
        );
        Ok(window)
    }
}

impl FrameSink for Window {
    fn show(&mut self, frame: &Mat) -> YcResult<()> {
        if frame.empty() {
            return Err(YoloCamError::EmptyFrame);
        }
        highgui::imshow(&self.name, frame)?;
        Ok(())
    }

    fn poll_key(&mut self) -> YcResult<Option<i32>> {
        let key = highgui::wait_key(self.wait_ms)?;
        Ok((key >= 0).then_some(key))
    }

    fn close(&mut self) -> YcResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        highgui::destroy_all_windows()?;
        Ok(())
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close window '{}': {}", self.name, e);
        }
    }
}
