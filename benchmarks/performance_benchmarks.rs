//! Criterion benchmarks for the per-frame hot path

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use opencv::core;
use yolocam::inference::{ModelPostProcessor, YoloPostProcessor};
use yolocam::{Annotator, ClassNames, Detection, DisplayConfig, Preprocessor};

fn camera_frame(width: i32, height: i32) -> core::Mat {
    core::Mat::new_rows_cols_with_default(height, width, core::CV_8UC3, core::Scalar::all(128.0))
        .unwrap()
}

/// Letterbox to 640x640 across common webcam resolutions
fn bench_letterbox(c: &mut Criterion) {
    let preprocessor = Preprocessor::new(640, 640);
    let mut group = c.benchmark_group("letterbox");

    for (name, width, height) in [("VGA", 640, 480), ("HD", 1280, 720), ("FullHD", 1920, 1080)] {
        let frame = camera_frame(width, height);
        group.throughput(Throughput::Elements((width * height) as u64));
        group.bench_with_input(BenchmarkId::new("letterbox", name), &frame, |b, frame| {
            b.iter(|| preprocessor.letterbox(black_box(frame)).unwrap());
        });
    }
    group.finish();
}

/// Full BGR frame to normalised CHW tensor
fn bench_preprocess(c: &mut Criterion) {
    let preprocessor = Preprocessor::new(640, 640);
    let mut group = c.benchmark_group("preprocess");

    for (name, width, height) in [("VGA", 640, 480), ("640x640", 640, 640)] {
        let frame = camera_frame(width, height);
        group.bench_with_input(BenchmarkId::new("process", name), &frame, |b, frame| {
            b.iter(|| preprocessor.process(black_box(frame)).unwrap());
        });
    }

    let hwc: Vec<f32> = (0..640 * 640 * 3).map(|i| (i % 256) as f32 / 255.0).collect();
    group.throughput(Throughput::Elements(hwc.len() as u64));
    group.bench_function("hwc_to_chw", |b| {
        b.iter(|| preprocessor.hwc_to_chw(black_box(&hwc)).unwrap());
    });
    group.finish();
}

/// Synthetic `[1, 84, 8400]` head with `hits` confident anchors in small clusters
fn yolo_output(hits: usize) -> Vec<f32> {
    let (channels, anchors) = (84, 8400);
    let mut output = vec![0.0f32; channels * anchors];
    for i in 0..hits {
        let anchor = (i * 97) % anchors;
        let cluster = (i / 4) as f32;
        output[anchor] = 40.0 + (cluster * 37.0) % 560.0;
        output[anchors + anchor] = 40.0 + (cluster * 53.0) % 560.0;
        output[2 * anchors + anchor] = 60.0;
        output[3 * anchors + anchor] = 80.0;
        output[(4 + i % 80) * anchors + anchor] = 0.5 + (i % 50) as f32 / 100.0;
    }
    output
}

/// Decode and class-aware NMS over a standard YOLOv8 head
fn bench_postprocess(c: &mut Criterion) {
    let processor = YoloPostProcessor::default();
    let shape = [1usize, 84, 8400];
    let mut group = c.benchmark_group("postprocess");

    for hits in [0usize, 50, 500] {
        let output = yolo_output(hits);
        group.bench_with_input(BenchmarkId::new("decode", hits), &output, |b, output| {
            b.iter(|| {
                processor
                    .process_raw_output(black_box(output), &shape, 0.4)
                    .unwrap()
            });
        });

        let decoded = processor.process_raw_output(&output, &shape, 0.4).unwrap();
        group.bench_with_input(BenchmarkId::new("nms", hits), &decoded, |b, decoded| {
            b.iter(|| processor.apply_nms(black_box(decoded.clone())));
        });
    }
    group.finish();
}

/// Drawing boxes and labels onto a VGA frame
fn bench_annotate(c: &mut Criterion) {
    let annotator = Annotator::new(&DisplayConfig::default());
    let names = ClassNames::coco();
    let detections: Vec<Detection> = (0..20)
        .map(|i| {
            let x = (i % 5) as f32 * 120.0;
            let y = (i / 5) as f32 * 110.0;
            Detection::new(x + 10.0, y + 20.0, x + 100.0, y + 100.0, 0.87, i)
        })
        .collect();
    let frame = camera_frame(640, 480);

    c.bench_function("annotate_20_boxes", |b| {
        b.iter(|| {
            let mut canvas = frame.clone();
            annotator
                .annotate(&mut canvas, black_box(&detections), &names)
                .unwrap();
            canvas
        });
    });
}

criterion_group!(
    benches,
    bench_letterbox,
    bench_preprocess,
    bench_postprocess,
    bench_annotate
);

criterion_main!(benches);
