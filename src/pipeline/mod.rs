//! The capture, inference and display loop

use crate::annotate::{summarize, Annotator};
use crate::capture::{Camera, FrameSource};
use crate::config::AppConfig;
use crate::display::{is_quit_key, FrameSink, Window};
use crate::error::{YcResult, YoloCamError};
use crate::inference::{InferenceBackend, OrtBackend};
use crate::metrics::{FrameTimer, JsonReporter, LogReporter, Metrics, MetricsReporter};
use crate::preprocessing::Preprocessor;
use crate::utils::{ClassNames, Detection};
use opencv::{core::Mat, prelude::*};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause after a failed read so a stalled camera does not spin the CPU
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Frame processor that combines preprocessing and inference
pub struct FrameProcessor {
    preprocessor: Preprocessor,
    inference_backend: Box<dyn InferenceBackend>,
}

impl FrameProcessor {
    /// Create a processor whose letterbox size matches the backend input
    pub fn new(inference_backend: Box<dyn InferenceBackend>) -> Self {
        let (width, height) = match inference_backend.input_shape() {
            [_, _, h, w] => (*w as i32, *h as i32),
            _ => Preprocessor::default().target_size(),
        };

        Self {
            preprocessor: Preprocessor::new(width, height),
            inference_backend,
        }
    }

    /// Run detection on a BGR frame; boxes come back in frame coordinates
    pub fn detect(&self, frame: &Mat) -> YcResult<Vec<Detection>> {
        let (tensor, letterbox) = self.preprocessor.process(frame)?;
        let detections = self.inference_backend.infer(&tensor)?;

        let (w, h) = (frame.cols() as f32, frame.rows() as f32);
        Ok(detections
            .iter()
            .map(|d| letterbox.to_source(d, w, h))
            .collect())
    }

    pub fn class_names(&self) -> &ClassNames {
        self.inference_backend.class_names()
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }
}

/// Drives frames from a source through detection to a sink until the quit key
pub struct DetectionLoop {
    processor: FrameProcessor,
    annotator: Annotator,
    quit_key: char,
    max_consecutive_failures: u32,
    report_interval: usize,
    reporters: Vec<Box<dyn MetricsReporter>>,
    metrics: Metrics,
}

impl DetectionLoop {
    pub fn new(processor: FrameProcessor, config: &AppConfig) -> Self {
        Self {
            processor,
            annotator: Annotator::new(&config.display),
            quit_key: config.display.quit_key,
            max_consecutive_failures: config.capture.max_consecutive_failures,
            report_interval: 0,
            reporters: Vec::new(),
            metrics: Metrics::new(),
        }
    }

    /// Report metrics every `frames` processed frames (0 disables periodic reports)
    pub fn with_report_interval(mut self, frames: usize) -> Self {
        self.report_interval = frames;
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn MetricsReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn into_metrics(self) -> Metrics {
        self.metrics
    }

    /// Run until the quit key is pressed.
    ///
    /// Failed reads are skipped without showing anything or polling the
    /// keyboard. After `max_consecutive_failures` of them in a row the loop
    /// gives up with [`YoloCamError::CaptureLost`].
    pub fn run<S, D>(&mut self, source: &mut S, sink: &mut D) -> YcResult<()>
    where
        S: FrameSource + ?Sized,
        D: FrameSink + ?Sized,
    {
        let mut frame = Mat::default();
        let mut consecutive_failures = 0u32;

        loop {
            if !source.read_frame(&mut frame)? {
                self.metrics.record_skip();
                consecutive_failures += 1;
                debug!("Frame read failed ({} in a row)", consecutive_failures);

                if self.max_consecutive_failures > 0
                    && consecutive_failures >= self.max_consecutive_failures
                {
                    return Err(YoloCamError::CaptureLost(consecutive_failures));
                }
                std::thread::sleep(READ_RETRY_DELAY);
                continue;
            }
            consecutive_failures = 0;
            self.metrics.record_capture();

            self.process_frame(&mut frame)?;
            sink.show(&frame)?;
            self.maybe_report();

            if let Some(key) = sink.poll_key()? {
                if is_quit_key(key, self.quit_key) {
                    info!("Quit key '{}' pressed", self.quit_key);
                    return Ok(());
                }
            }
        }
    }

    /// [`run`](Self::run), then release the source and close the sink whatever
    /// the outcome. The loop's own error takes precedence over cleanup errors.
    pub fn run_to_completion<S, D>(&mut self, source: &mut S, sink: &mut D) -> YcResult<()>
    where
        S: FrameSource + ?Sized,
        D: FrameSink + ?Sized,
    {
        let result = self.run(source, sink);

        let released = source.release();
        let closed = sink.close();

        result?;
        released?;
        closed
    }

    /// [`run_to_completion`](Self::run_to_completion), then hand the final
    /// metrics to every reporter. Reports go out on error exits too.
    pub fn run_and_report<S, D>(
        mut self,
        source: &mut S,
        sink: &mut D,
        reporters: &[&dyn MetricsReporter],
    ) -> YcResult<Metrics>
    where
        S: FrameSource + ?Sized,
        D: FrameSink + ?Sized,
    {
        let result = self.run_to_completion(source, sink);
        let metrics = self.into_metrics();

        for reporter in reporters {
            if let Err(e) = reporter.report(&metrics) {
                warn!("Final report via '{}' failed: {}", reporter.name(), e);
            }
        }

        result.map(|()| metrics)
    }

    /// Detect and annotate in place; an inference failure leaves the frame untouched
    fn process_frame(&mut self, frame: &mut Mat) -> YcResult<()> {
        let timer = FrameTimer::start();
        match self.processor.detect(frame) {
            Ok(detections) => {
                let elapsed = timer.elapsed();
                let names = self.processor.class_names();
                debug!(
                    "{}, {:.1}ms",
                    summarize(frame.cols(), frame.rows(), &detections, names),
                    elapsed.as_secs_f64() * 1000.0
                );

                self.annotator.annotate(frame, &detections, names)?;
                self.metrics.record_processed(elapsed, detections.len());
            }
            Err(e) => {
                warn!("Detection failed, showing raw frame: {}", e);
                self.metrics.record_inference_failure();
            }
        }
        Ok(())
    }

    fn maybe_report(&self) {
        let processed = self.metrics.get_frames_processed();
        if self.report_interval == 0 || processed == 0 || processed % self.report_interval != 0 {
            return;
        }
        for reporter in &self.reporters {
            if let Err(e) = reporter.report(&self.metrics) {
                warn!("Metrics reporter '{}' failed: {}", reporter.name(), e);
            }
        }
    }
}

/// Options that only affect reporting
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Log a metrics line every N processed frames (0 = only at exit)
    pub report_interval: usize,
    /// Write a JSON summary to stdout when the run ends
    pub json_summary: bool,
}

/// Open the camera, load the model, show the window and run until quit.
///
/// The camera and window are released and the final metrics reported on
/// every exit path once the loop has started.
pub fn run(config: &AppConfig, options: &RunOptions) -> YcResult<Metrics> {
    config.validate()?;

    let mut camera = Camera::open(&config.capture)?;

    let mut backend = OrtBackend::from_config(&config.inference)?;
    backend.load_model(config.model_path())?;
    info!(
        "Loaded model {} ({} classes)",
        config.model_path().display(),
        backend.class_names().len()
    );
    let processor = FrameProcessor::new(Box::new(backend));

    let mut window = Window::open(&config.display)?;

    let detection_loop = DetectionLoop::new(processor, config)
        .with_report_interval(options.report_interval)
        .with_reporter(Box::new(LogReporter));

    info!(
        "Running; press '{}' in the window to quit",
        config.display.quit_key
    );

    let json = options
        .json_summary
        .then(|| JsonReporter::new(std::io::stdout()));
    let mut reporters: Vec<&dyn MetricsReporter> = Vec::new();
    reporters.push(&LogReporter);
    if let Some(json) = &json {
        reporters.push(json);
    }

    detection_loop.run_and_report(&mut camera, &mut window, &reporters)
}
