//! Detection loop behaviour against scripted frame sources and sinks

use opencv::core::{self, Mat, Scalar};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use yolocam::{
    AppConfig, ClassNames, Detection, DetectionLoop, FrameProcessor, FrameSink, FrameSource,
    InferenceBackend, InferenceError, JsonReporter, Metrics, MetricsReporter, YcResult,
    YoloCamError,
};

const FRAME_ROWS: i32 = 48;
const FRAME_COLS: i32 = 64;

/// Replays a fixed sequence of read outcomes, then errors out
struct ScriptedSource {
    reads: VecDeque<bool>,
    released: bool,
}

impl ScriptedSource {
    fn new(reads: &[bool]) -> Self {
        Self {
            reads: reads.iter().copied().collect(),
            released: false,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self, frame: &mut Mat) -> YcResult<bool> {
        match self.reads.pop_front() {
            Some(true) => {
                *frame = Mat::new_rows_cols_with_default(
                    FRAME_ROWS,
                    FRAME_COLS,
                    core::CV_8UC3,
                    Scalar::all(0.0),
                )?;
                Ok(true)
            }
            Some(false) => Ok(false),
            None => Err(YoloCamError::EmptyFrame),
        }
    }

    fn release(&mut self) -> YcResult<()> {
        self.released = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.released
    }
}

/// Records what was shown and hands out scripted key presses
#[derive(Default)]
struct RecordingSink {
    keys: VecDeque<Option<i32>>,
    shown_sums: Vec<f64>,
    polls: usize,
    closed: bool,
}

impl RecordingSink {
    fn with_keys(keys: &[Option<i32>]) -> Self {
        Self {
            keys: keys.iter().copied().collect(),
            ..Default::default()
        }
    }
}

impl FrameSink for RecordingSink {
    fn show(&mut self, frame: &Mat) -> YcResult<()> {
        let sum = core::sum_elems(frame)?;
        self.shown_sums.push(sum.0.iter().sum());
        Ok(())
    }

    fn poll_key(&mut self) -> YcResult<Option<i32>> {
        self.polls += 1;
        Ok(self.keys.pop_front().flatten())
    }

    fn close(&mut self) -> YcResult<()> {
        self.closed = true;
        Ok(())
    }
}

/// Returns the same detections (in model-input pixels) for every frame
struct FixedBackend {
    detections: Vec<Detection>,
    fail: bool,
    input_shape: Vec<usize>,
    class_names: ClassNames,
    confidence_threshold: f32,
}

impl FixedBackend {
    fn returning(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            fail: false,
            input_shape: vec![1, 3, 64, 64],
            class_names: ClassNames::coco(),
            confidence_threshold: 0.4,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::returning(Vec::new())
        }
    }
}

impl InferenceBackend for FixedBackend {
    fn load_model(&mut self, _path: &Path) -> Result<(), InferenceError> {
        Ok(())
    }

    fn infer(&self, input: &[f32]) -> Result<Vec<Detection>, InferenceError> {
        if self.fail {
            return Err(InferenceError::InferenceFailed("scripted failure".to_string()));
        }
        let expected: usize = self.input_shape.iter().product();
        assert_eq!(input.len(), expected);
        Ok(self.detections.clone())
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn class_names(&self) -> &ClassNames {
        &self.class_names
    }

    fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    fn set_confidence_threshold(&mut self, threshold: f32) {
        self.confidence_threshold = threshold;
    }
}

struct CountingReporter(Arc<AtomicUsize>);

impl MetricsReporter for CountingReporter {
    fn report(&self, _metrics: &Metrics) -> YcResult<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "counting"
    }
}

fn person() -> Detection {
    // Model space; the 48-row frame is padded by 8 rows top and bottom
    Detection::new(10.0, 18.0, 30.0, 38.0, 0.87, 0)
}

fn detection_loop(backend: FixedBackend, config: &AppConfig) -> DetectionLoop {
    DetectionLoop::new(FrameProcessor::new(Box::new(backend)), config)
}

fn key(c: char) -> Option<i32> {
    Some(c as i32)
}

#[test]
fn test_quit_key_stops_loop() {
    let config = AppConfig::default();
    let mut dl = detection_loop(FixedBackend::returning(vec![person()]), &config);
    let mut source = ScriptedSource::new(&[true, true, true]);
    let mut sink = RecordingSink::with_keys(&[None, key('q')]);

    dl.run(&mut source, &mut sink).unwrap();

    assert_eq!(sink.shown_sums.len(), 2);
    assert_eq!(sink.polls, 2);
    // The third frame was never read
    assert_eq!(source.reads.len(), 1);

    let metrics = dl.metrics();
    assert_eq!(metrics.get_frames_captured(), 2);
    assert_eq!(metrics.get_frames_processed(), 2);
    assert_eq!(metrics.get_total_detections(), 2);
    assert_eq!(metrics.get_inference_failures(), 0);
}

#[test]
fn test_quit_key_with_modifier_bits() {
    let config = AppConfig::default();
    let mut dl = detection_loop(FixedBackend::returning(Vec::new()), &config);
    let mut source = ScriptedSource::new(&[true, true]);
    let mut sink = RecordingSink::with_keys(&[Some(0x0010_0000 | 'q' as i32)]);

    dl.run(&mut source, &mut sink).unwrap();
    assert_eq!(sink.shown_sums.len(), 1);
}

#[test]
fn test_other_keys_are_ignored() {
    let config = AppConfig::default();
    let mut dl = detection_loop(FixedBackend::returning(Vec::new()), &config);
    let mut source = ScriptedSource::new(&[true; 4]);
    let mut sink = RecordingSink::with_keys(&[key('a'), Some(27), key('Q'), key('q')]);

    dl.run(&mut source, &mut sink).unwrap();
    assert_eq!(sink.shown_sums.len(), 4);
}

#[test]
fn test_configured_quit_key() {
    let mut config = AppConfig::default();
    config.display.quit_key = 'x';
    let mut dl = detection_loop(FixedBackend::returning(Vec::new()), &config);
    let mut source = ScriptedSource::new(&[true; 3]);
    let mut sink = RecordingSink::with_keys(&[key('q'), key('x')]);

    dl.run(&mut source, &mut sink).unwrap();
    assert_eq!(sink.shown_sums.len(), 2);
}

#[test]
fn test_failed_reads_are_skipped() {
    let config = AppConfig::default();
    let mut dl = detection_loop(FixedBackend::returning(vec![person()]), &config);
    let mut source = ScriptedSource::new(&[false, true, false, true]);
    let mut sink = RecordingSink::with_keys(&[None, key('q')]);

    dl.run(&mut source, &mut sink).unwrap();

    // Neither shown nor polled on a failed read
    assert_eq!(sink.shown_sums.len(), 2);
    assert_eq!(sink.polls, 2);

    let metrics = dl.metrics();
    assert_eq!(metrics.get_frames_skipped(), 2);
    assert_eq!(metrics.get_frames_captured(), 2);
    assert_eq!(metrics.get_frames_processed(), 2);
}

#[test]
fn test_capture_lost_after_consecutive_failures() {
    let mut config = AppConfig::default();
    config.capture.max_consecutive_failures = 3;
    let mut dl = detection_loop(FixedBackend::returning(Vec::new()), &config);
    let mut source = ScriptedSource::new(&[true, false, false, false, true]);
    let mut sink = RecordingSink::default();

    match dl.run(&mut source, &mut sink) {
        Err(YoloCamError::CaptureLost(n)) => assert_eq!(n, 3),
        other => panic!("Expected CaptureLost, got {:?}", other),
    }
    assert_eq!(sink.shown_sums.len(), 1);
    assert_eq!(dl.metrics().get_frames_skipped(), 3);
}

#[test]
fn test_good_read_resets_failure_count() {
    let mut config = AppConfig::default();
    config.capture.max_consecutive_failures = 3;
    let mut dl = detection_loop(FixedBackend::returning(Vec::new()), &config);
    let mut source = ScriptedSource::new(&[false, false, true, false, false, true]);
    let mut sink = RecordingSink::with_keys(&[None, key('q')]);

    dl.run(&mut source, &mut sink).unwrap();
    assert_eq!(dl.metrics().get_frames_skipped(), 4);
}

#[test]
fn test_inference_failure_shows_raw_frame() {
    let config = AppConfig::default();
    let mut dl = detection_loop(FixedBackend::failing(), &config);
    let mut source = ScriptedSource::new(&[true, true]);
    let mut sink = RecordingSink::with_keys(&[None, key('q')]);

    dl.run(&mut source, &mut sink).unwrap();

    // Frames are black and nothing was drawn on them
    assert_eq!(sink.shown_sums, vec![0.0, 0.0]);
    let metrics = dl.metrics();
    assert_eq!(metrics.get_inference_failures(), 2);
    assert_eq!(metrics.get_frames_processed(), 0);
    assert_eq!(metrics.get_frames_captured(), 2);
}

#[test]
fn test_detections_are_drawn() {
    let config = AppConfig::default();
    let mut dl = detection_loop(FixedBackend::returning(vec![person()]), &config);
    let mut source = ScriptedSource::new(&[true]);
    let mut sink = RecordingSink::with_keys(&[key('q')]);

    dl.run(&mut source, &mut sink).unwrap();
    assert!(sink.shown_sums[0] > 0.0);
}

#[test]
fn test_empty_result_leaves_frame_untouched() {
    let config = AppConfig::default();
    let mut dl = detection_loop(FixedBackend::returning(Vec::new()), &config);
    let mut source = ScriptedSource::new(&[true]);
    let mut sink = RecordingSink::with_keys(&[key('q')]);

    dl.run(&mut source, &mut sink).unwrap();
    assert_eq!(sink.shown_sums, vec![0.0]);
}

#[test]
fn test_source_error_propagates() {
    let config = AppConfig::default();
    let mut dl = detection_loop(FixedBackend::returning(Vec::new()), &config);
    let mut source = ScriptedSource::new(&[]);
    let mut sink = RecordingSink::default();

    assert!(matches!(
        dl.run(&mut source, &mut sink),
        Err(YoloCamError::EmptyFrame)
    ));
    assert!(sink.shown_sums.is_empty());
}

#[test]
fn test_periodic_reports() {
    let config = AppConfig::default();
    let reports = Arc::new(AtomicUsize::new(0));
    let mut dl = detection_loop(FixedBackend::returning(Vec::new()), &config)
        .with_report_interval(2)
        .with_reporter(Box::new(CountingReporter(reports.clone())));
    let mut source = ScriptedSource::new(&[true; 5]);
    let mut sink = RecordingSink::with_keys(&[None, None, None, None, key('q')]);

    dl.run(&mut source, &mut sink).unwrap();

    // After the 2nd and 4th processed frames
    assert_eq!(reports.load(Ordering::SeqCst), 2);
    assert_eq!(dl.into_metrics().get_frames_processed(), 5);
}

#[test]
fn test_processor_maps_boxes_to_frame() {
    let processor = FrameProcessor::new(Box::new(FixedBackend::returning(vec![person()])));
    let frame =
        Mat::new_rows_cols_with_default(FRAME_ROWS, FRAME_COLS, core::CV_8UC3, Scalar::all(0.0))
            .unwrap();

    let detections = processor.detect(&frame).unwrap();

    assert_eq!(detections.len(), 1);
    let d = &detections[0];
    assert_eq!((d.x1, d.y1, d.x2, d.y2), (10.0, 10.0, 30.0, 30.0));
    assert_eq!(processor.class_names().name(d.class_id), "person");
}

#[test]
fn test_resources_released_on_quit() {
    let config = AppConfig::default();
    let mut dl = detection_loop(FixedBackend::returning(Vec::new()), &config);
    let mut source = ScriptedSource::new(&[true]);
    let mut sink = RecordingSink::with_keys(&[key('q')]);

    dl.run_to_completion(&mut source, &mut sink).unwrap();

    assert!(!source.is_open());
    assert!(sink.closed);
}

#[test]
fn test_resources_released_on_error() {
    let mut config = AppConfig::default();
    config.capture.max_consecutive_failures = 2;
    let mut dl = detection_loop(FixedBackend::returning(Vec::new()), &config);
    let mut source = ScriptedSource::new(&[false, false]);
    let mut sink = RecordingSink::default();

    let result = dl.run_to_completion(&mut source, &mut sink);

    assert!(matches!(result, Err(YoloCamError::CaptureLost(2))));
    assert!(!source.is_open());
    assert!(sink.closed);
}

#[test]
fn test_final_report_sent_when_capture_is_lost() {
    let mut config = AppConfig::default();
    config.capture.max_consecutive_failures = 3;
    let dl = detection_loop(FixedBackend::returning(vec![person()]), &config);
    let mut source = ScriptedSource::new(&[true, false, false, false]);
    let mut sink = RecordingSink::default();

    let reports = Arc::new(AtomicUsize::new(0));
    let counting = CountingReporter(reports.clone());
    let json = JsonReporter::new(Vec::new());

    let result = dl.run_and_report(&mut source, &mut sink, &[&counting, &json]);

    assert!(matches!(result, Err(YoloCamError::CaptureLost(3))));
    assert_eq!(reports.load(Ordering::SeqCst), 1);
    assert!(!source.is_open());
    assert!(sink.closed);

    let output = String::from_utf8(json.into_inner()).unwrap();
    let summary: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
    assert_eq!(summary["frames_captured"], 1);
    assert_eq!(summary["frames_skipped"], 3);
    assert_eq!(summary["total_detections"], 1);
}

#[test]
fn test_final_report_on_quit_returns_metrics() {
    let config = AppConfig::default();
    let dl = detection_loop(FixedBackend::returning(Vec::new()), &config);
    let mut source = ScriptedSource::new(&[true, true]);
    let mut sink = RecordingSink::with_keys(&[None, key('q')]);

    let reports = Arc::new(AtomicUsize::new(0));
    let counting = CountingReporter(reports.clone());

    let metrics = dl
        .run_and_report(&mut source, &mut sink, &[&counting])
        .unwrap();

    assert_eq!(metrics.get_frames_processed(), 2);
    assert_eq!(reports.load(Ordering::SeqCst), 1);
}
