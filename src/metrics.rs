//! Performance metrics for the detection loop
//!
//! Frame counters, inference latency and a rolling FPS estimate, plus
//! reporters that publish them through `tracing` or as JSON.

use crate::error::{YcResult, YoloCamError};
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

/// Number of recent frames used for the FPS estimate
const FPS_WINDOW: usize = 60;

/// Core loop metrics
#[derive(Debug)]
pub struct Metrics {
    frames_captured: usize,
    frames_skipped: usize,
    frames_processed: usize,
    inference_failures: usize,
    total_detections: usize,
    last_inference_ms: f64,
    total_inference_ms: f64,
    fps_calculator: FpsCalculator,
    started: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            frames_captured: 0,
            frames_skipped: 0,
            frames_processed: 0,
            inference_failures: 0,
            total_detections: 0,
            last_inference_ms: 0.0,
            total_inference_ms: 0.0,
            fps_calculator: FpsCalculator::new(FPS_WINDOW),
            started: Instant::now(),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame was read successfully
    pub fn record_capture(&mut self) {
        self.frames_captured += 1;
    }

    /// A read failed and the iteration was skipped
    pub fn record_skip(&mut self) {
        self.frames_skipped += 1;
    }

    /// A frame went through inference and was shown
    pub fn record_processed(&mut self, inference: Duration, detections: usize) {
        self.record_processed_at(Instant::now(), inference, detections);
    }

    pub fn record_processed_at(&mut self, now: Instant, inference: Duration, detections: usize) {
        let latency_ms = inference.as_secs_f64() * 1000.0;
        self.frames_processed += 1;
        self.total_detections += detections;
        self.last_inference_ms = latency_ms;
        self.total_inference_ms += latency_ms;
        self.fps_calculator.push(now);
    }

    /// Inference failed on a captured frame
    pub fn record_inference_failure(&mut self) {
        self.inference_failures += 1;
    }

    pub fn get_frames_captured(&self) -> usize {
        self.frames_captured
    }

    pub fn get_frames_skipped(&self) -> usize {
        self.frames_skipped
    }

    pub fn get_frames_processed(&self) -> usize {
        self.frames_processed
    }

    pub fn get_inference_failures(&self) -> usize {
        self.inference_failures
    }

    pub fn get_total_detections(&self) -> usize {
        self.total_detections
    }

    pub fn get_last_inference_ms(&self) -> f64 {
        self.last_inference_ms
    }

    /// Mean inference latency over all processed frames
    pub fn get_avg_inference_ms(&self) -> f64 {
        if self.frames_processed == 0 {
            0.0
        } else {
            self.total_inference_ms / self.frames_processed as f64
        }
    }

    /// Rolling FPS over the most recent processed frames
    pub fn get_fps(&self) -> f64 {
        self.fps_calculator.fps()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Percentage of read attempts that were skipped
    pub fn get_skip_rate(&self) -> f64 {
        let attempts = self.frames_captured + self.frames_skipped;
        if attempts == 0 {
            0.0
        } else {
            self.frames_skipped as f64 / attempts as f64 * 100.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            elapsed_s: self.elapsed().as_secs_f64(),
            frames_captured: self.frames_captured,
            frames_skipped: self.frames_skipped,
            frames_processed: self.frames_processed,
            inference_failures: self.inference_failures,
            total_detections: self.total_detections,
            fps: self.get_fps(),
            last_inference_ms: self.last_inference_ms,
            avg_inference_ms: self.get_avg_inference_ms(),
        }
    }

    /// Get formatted metrics summary
    pub fn format_summary(&self) -> String {
        format!(
            "FPS: {:.1} | Inference: {:.1}ms (avg {:.1}ms) | Frames: {} | Skipped: {} ({:.1}%) | Failures: {}",
            self.get_fps(),
            self.last_inference_ms,
            self.get_avg_inference_ms(),
            self.frames_processed,
            self.frames_skipped,
            self.get_skip_rate(),
            self.inference_failures
        )
    }
}

/// Serializable copy of the metrics at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub elapsed_s: f64,
    pub frames_captured: usize,
    pub frames_skipped: usize,
    pub frames_processed: usize,
    pub inference_failures: usize,
    pub total_detections: usize,
    pub fps: f64,
    pub last_inference_ms: f64,
    pub avg_inference_ms: f64,
}

/// FPS calculator using a rolling window of frame instants
#[derive(Debug)]
struct FpsCalculator {
    frame_times: VecDeque<Instant>,
    window_size: usize,
}

impl FpsCalculator {
    fn new(window_size: usize) -> Self {
        Self {
            frame_times: VecDeque::with_capacity(window_size),
            window_size: window_size.max(2),
        }
    }

    fn push(&mut self, now: Instant) {
        self.frame_times.push_back(now);
        if self.frame_times.len() > self.window_size {
            self.frame_times.pop_front();
        }
    }

    fn fps(&self) -> f64 {
        let (Some(first), Some(last)) = (self.frame_times.front(), self.frame_times.back()) else {
            return 0.0;
        };
        let span = last.duration_since(*first).as_secs_f64();
        if self.frame_times.len() < 2 || span <= 0.0 {
            return 0.0;
        }
        (self.frame_times.len() - 1) as f64 / span
    }
}

/// Times a single stage of the loop
pub struct FrameTimer {
    start: Instant,
}

impl FrameTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Metrics reporter trait for different output formats
pub trait MetricsReporter: Send + Sync {
    fn report(&self, metrics: &Metrics) -> YcResult<()>;

    fn name(&self) -> &str;
}

/// Publishes the summary line through `tracing`
#[derive(Debug, Default)]
pub struct LogReporter;

impl MetricsReporter for LogReporter {
    fn report(&self, metrics: &Metrics) -> YcResult<()> {
        info!("[METRICS] {}", metrics.format_summary());
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Writes one JSON object per report to any writer
pub struct JsonReporter<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonReporter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> MetricsReporter for JsonReporter<W> {
    fn report(&self, metrics: &Metrics) -> YcResult<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| YoloCamError::Io(std::io::Error::other("metrics writer poisoned")))?;

        serde_json::to_writer(&mut *writer, &metrics.snapshot())
            .map_err(|e| YoloCamError::Io(e.into()))?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "json"
    }
}
