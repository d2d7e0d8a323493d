//! Decoding YOLOv8 detection head outputs into boxes

use yolocam::inference::{anchor_count, InferenceError, ModelPostProcessor, YoloPostProcessor};

/// One synthetic anchor: centre box, class and its score
struct Anchor {
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
    class: usize,
    score: f32,
}

fn anchor(cx: f32, cy: f32, w: f32, h: f32, class: usize, score: f32) -> Anchor {
    Anchor {
        cx,
        cy,
        w,
        h,
        class,
        score,
    }
}

/// Synthetic heads are sized for a 32x32 input, i.e. 21 anchors
const INPUT: usize = 32;

fn head_anchors(anchors: &[Anchor]) -> usize {
    let n = anchor_count(INPUT, INPUT);
    assert!(anchors.len() <= n, "too many anchors for a {}px head", INPUT);
    n
}

/// `[1, 4 + nc, N]` as exported by Ultralytics
fn channel_major(nc: usize, anchors: &[Anchor]) -> (Vec<f32>, Vec<usize>) {
    let n = head_anchors(anchors);
    let mut output = vec![0.0f32; (4 + nc) * n];
    for (i, a) in anchors.iter().enumerate() {
        output[i] = a.cx;
        output[n + i] = a.cy;
        output[2 * n + i] = a.w;
        output[3 * n + i] = a.h;
        output[(4 + a.class) * n + i] = a.score;
    }
    (output, vec![1, 4 + nc, n])
}

/// `[1, N, 4 + nc]`
fn anchor_major(nc: usize, anchors: &[Anchor]) -> (Vec<f32>, Vec<usize>) {
    let stride = 4 + nc;
    let n = head_anchors(anchors);
    let mut output = vec![0.0f32; stride * n];
    for (i, a) in anchors.iter().enumerate() {
        let row = &mut output[i * stride..(i + 1) * stride];
        row[..4].copy_from_slice(&[a.cx, a.cy, a.w, a.h]);
        row[4 + a.class] = a.score;
    }
    (output, vec![1, n, stride])
}

#[test]
fn test_center_boxes_become_corners() {
    let processor = YoloPostProcessor::default();
    let (output, shape) = channel_major(80, &[anchor(320.0, 240.0, 100.0, 50.0, 0, 0.9)]);

    let detections = processor.process_raw_output(&output, &shape, 0.4).unwrap();

    assert_eq!(detections.len(), 1);
    let d = &detections[0];
    assert_eq!((d.x1, d.y1, d.x2, d.y2), (270.0, 215.0, 370.0, 265.0));
    assert_eq!(d.class_id, 0);
    assert!((d.score - 0.9).abs() < 1e-6);
}

#[test]
fn test_more_classes_than_anchors() {
    // An 80-class model at 32x32 gives [1, 84, 21]
    let processor = YoloPostProcessor::default().with_input_size(INPUT, INPUT);
    let (output, shape) = channel_major(80, &[anchor(16.0, 12.0, 8.0, 6.0, 79, 0.8)]);
    assert_eq!(shape, vec![1, 84, 21]);

    let detections = processor.process_raw_output(&output, &shape, 0.4).unwrap();

    assert_eq!(detections.len(), 1);
    let d = &detections[0];
    assert_eq!(d.class_id, 79);
    assert_eq!((d.x1, d.y1, d.x2, d.y2), (12.0, 9.0, 20.0, 15.0));
    assert_eq!(processor.class_count(&shape).unwrap(), 80);
}

#[test]
fn test_best_class_wins() {
    let processor = YoloPostProcessor::default();
    let (mut output, shape) = channel_major(3, &[anchor(50.0, 50.0, 20.0, 20.0, 2, 0.8)]);
    // Same anchor, weaker score on class 1
    output[5 * shape[2]] = 0.6;

    let detections = processor.process_raw_output(&output, &shape, 0.4).unwrap();

    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].class_id, 2);
}

#[test]
fn test_confidence_threshold_filters() {
    let processor = YoloPostProcessor::default();
    let (output, shape) = channel_major(
        2,
        &[
            anchor(10.0, 10.0, 4.0, 4.0, 0, 0.39),
            anchor(50.0, 50.0, 4.0, 4.0, 1, 0.4),
            anchor(90.0, 90.0, 4.0, 4.0, 0, 0.95),
        ],
    );

    let detections = processor.process_raw_output(&output, &shape, 0.4).unwrap();

    // The threshold itself is kept
    assert_eq!(detections.len(), 2);
    assert!(detections.iter().all(|d| d.score >= 0.4));
}

#[test]
fn test_both_layouts_decode_the_same() {
    let processor = YoloPostProcessor::default();
    let anchors = [
        anchor(100.0, 100.0, 40.0, 60.0, 1, 0.7),
        anchor(300.0, 200.0, 80.0, 20.0, 3, 0.55),
        anchor(500.0, 400.0, 10.0, 10.0, 0, 0.1),
    ];

    let processor = processor.with_input_size(INPUT, INPUT);
    let (cm, cm_shape) = channel_major(4, &anchors);
    let (am, am_shape) = anchor_major(4, &anchors);

    let from_cm = processor.process_raw_output(&cm, &cm_shape, 0.25).unwrap();
    let from_am = processor.process_raw_output(&am, &am_shape, 0.25).unwrap();

    assert_eq!(from_cm.len(), 2);
    assert_eq!(from_cm, from_am);
}

#[test]
fn test_nms_is_class_aware() {
    let processor = YoloPostProcessor::new(0.5, 300);
    let (output, shape) = channel_major(
        2,
        &[
            anchor(100.0, 100.0, 50.0, 50.0, 0, 0.9),
            anchor(102.0, 101.0, 50.0, 50.0, 0, 0.8),
            // Same place, different class: survives
            anchor(101.0, 100.0, 50.0, 50.0, 1, 0.7),
            anchor(400.0, 400.0, 50.0, 50.0, 0, 0.6),
        ],
    );

    let detections = processor.process_raw_output(&output, &shape, 0.4).unwrap();
    let kept = processor.apply_nms(detections);

    assert_eq!(kept.len(), 3);
    let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
    assert!((scores[0] - 0.9).abs() < 1e-6);
    assert!(!scores.iter().any(|s| (s - 0.8).abs() < 1e-6));
    assert!(kept.iter().any(|d| d.class_id == 1));
}

#[test]
fn test_nms_caps_detection_count() {
    let processor = YoloPostProcessor::new(0.7, 5);
    let anchors: Vec<Anchor> = (0..20)
        .map(|i| anchor(20.0 + i as f32 * 30.0, 20.0, 10.0, 10.0, 0, 0.5 + i as f32 * 0.01))
        .collect();
    let (output, shape) = channel_major(1, &anchors);

    let detections = processor.process_raw_output(&output, &shape, 0.4).unwrap();
    assert_eq!(detections.len(), 20);

    let kept = processor.apply_nms(detections);
    assert_eq!(kept.len(), 5);
    // Highest scores first
    assert!(kept.windows(2).all(|w| w[0].score >= w[1].score));
    assert!((kept[0].score - 0.69).abs() < 1e-5);
}

#[test]
fn test_empty_scene() {
    let processor = YoloPostProcessor::default();
    let output = vec![0.0f32; 84 * 8400];

    let detections = processor
        .process_raw_output(&output, &[1, 84, 8400], 0.4)
        .unwrap();
    assert!(detections.is_empty());
    assert!(processor.apply_nms(detections).is_empty());
}

#[test]
fn test_length_mismatch_is_rejected() {
    let processor = YoloPostProcessor::default();
    let output = vec![0.0f32; 100];

    match processor.process_raw_output(&output, &[1, 84, 8400], 0.4) {
        Err(InferenceError::InvalidOutputFormat(msg)) => assert!(msg.contains("100")),
        other => panic!("Expected InvalidOutputFormat, got {:?}", other),
    }
}

#[test]
fn test_unsupported_shapes_are_rejected() {
    let processor = YoloPostProcessor::default();

    for shape in [vec![1, 3, 640, 640], vec![1, 4, 10], vec![2, 84, 8400]] {
        let len: usize = shape.iter().product();
        let output = vec![0.0f32; len];
        assert!(
            processor.process_raw_output(&output, &shape, 0.4).is_err(),
            "shape {:?} should be rejected",
            shape
        );
    }
}
