//! Bounding box and label rendering on camera frames

use crate::config::DisplayConfig;
use crate::error::YcResult;
use crate::utils::{ClassNames, Detection};
use opencv::{
    core::{Mat, Point, Scalar},
    imgproc,
    prelude::*,
};

/// Ultralytics default palette, RGB hex
const PALETTE_HEX: [&str; 20] = [
    "FF3838", "FF9D97", "FF701F", "FFB21D", "CFD231", "48F90A", "92CC17", "3DDB86", "1A9334",
    "00D4BB", "2C99A8", "00C2FF", "344593", "6473FF", "0018EC", "8438FF", "520085", "CB38FF",
    "FF95C8", "FF37C7",
];

const FONT: i32 = imgproc::FONT_HERSHEY_SIMPLEX;

/// Per-class colours
#[derive(Debug, Clone)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
}

impl Palette {
    pub fn ultralytics() -> Self {
        let colors = PALETTE_HEX
            .iter()
            .map(|hex| {
                let value = u32::from_str_radix(hex, 16).unwrap_or(0);
                [(value >> 16) as u8, (value >> 8) as u8, value as u8]
            })
            .collect();
        Self { colors }
    }

    /// RGB colour for a class id
    pub fn rgb(&self, class_id: i32) -> [u8; 3] {
        let idx = class_id.rem_euclid(self.colors.len() as i32) as usize;
        self.colors[idx]
    }

    /// The same colour as an OpenCV BGR scalar
    pub fn bgr(&self, class_id: i32) -> Scalar {
        let [r, g, b] = self.rgb(class_id);
        Scalar::new(b as f64, g as f64, r as f64, 0.0)
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::ultralytics()
    }
}

/// Where a label background and its text go relative to a box corner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelPlacement {
    pub background_tl: (i32, i32),
    pub background_br: (i32, i32),
    pub text_origin: (i32, i32),
    /// Label sits above the box rather than inside it
    pub outside: bool,
}

impl LabelPlacement {
    /// Place a `text_w x text_h` label at the top-left corner `(x1, y1)` of a box.
    /// The label goes above the box when there is room, otherwise inside it,
    /// and is shifted left so it never runs off the right edge.
    pub fn place(x1: i32, y1: i32, text_w: i32, text_h: i32, frame_w: i32) -> Self {
        let h = text_h + 3;
        let outside = y1 >= h;
        let x = x1.min(frame_w - text_w).max(0);

        let (background_br, text_origin) = if outside {
            ((x + text_w, y1 - h), (x, y1 - 2))
        } else {
            ((x + text_w, y1 + h), (x, y1 + h - 1))
        };

        Self {
            background_tl: (x, y1),
            background_br,
            text_origin,
            outside,
        }
    }
}

/// Draws detections onto frames
#[derive(Debug, Clone)]
pub struct Annotator {
    line_width: Option<u32>,
    show_labels: bool,
    show_confidence: bool,
    palette: Palette,
}

impl Annotator {
    pub fn new(config: &DisplayConfig) -> Self {
        Self {
            line_width: config.line_width,
            show_labels: config.show_labels,
            show_confidence: config.show_confidence,
            palette: Palette::default(),
        }
    }

    /// Box line width for a frame size, scaled like Ultralytics plots
    pub fn line_width_for(&self, width: i32, height: i32) -> i32 {
        match self.line_width {
            Some(lw) => lw as i32,
            None => ((((width + height) as f64) / 2.0 * 0.003).round() as i32).max(2),
        }
    }

    /// Label for a detection, or `None` when labels are switched off
    pub fn label_text(&self, detection: &Detection, names: &ClassNames) -> Option<String> {
        match (self.show_labels, self.show_confidence) {
            (true, true) => Some(format!(
                "{} {:.2}",
                names.name(detection.class_id),
                detection.score
            )),
            (true, false) => Some(names.name(detection.class_id).into_owned()),
            (false, true) => Some(format!("{:.2}", detection.score)),
            (false, false) => None,
        }
    }

    /// Draw every detection onto `frame` in place
    pub fn annotate(
        &self,
        frame: &mut Mat,
        detections: &[Detection],
        names: &ClassNames,
    ) -> YcResult<()> {
        let size = frame.size()?;
        let lw = self.line_width_for(size.width, size.height);

        for detection in detections {
            let color = self.palette.bgr(detection.class_id);
            let p1 = Point::new(detection.x1.round() as i32, detection.y1.round() as i32);
            let p2 = Point::new(detection.x2.round() as i32, detection.y2.round() as i32);

            imgproc::rectangle_points(frame, p1, p2, color, lw, imgproc::LINE_AA, 0)?;

            if let Some(label) = self.label_text(detection, names) {
                self.draw_label(frame, &label, p1, lw, color, size.width)?;
            }
        }

        Ok(())
    }

    fn draw_label(
        &self,
        frame: &mut Mat,
        label: &str,
        corner: Point,
        lw: i32,
        color: Scalar,
        frame_w: i32,
    ) -> YcResult<()> {
        let thickness = (lw - 1).max(1);
        let scale = lw as f64 / 3.0;

        let mut baseline = 0;
        let text_size = imgproc::get_text_size(label, FONT, scale, thickness, &mut baseline)?;
        let placement =
            LabelPlacement::place(corner.x, corner.y, text_size.width, text_size.height, frame_w);

        let (tl, br, origin) = (
            placement.background_tl,
            placement.background_br,
            placement.text_origin,
        );
        imgproc::rectangle_points(
            frame,
            Point::new(tl.0, tl.1),
            Point::new(br.0, br.1),
            color,
            imgproc::FILLED,
            imgproc::LINE_AA,
            0,
        )?;
        imgproc::put_text(
            frame,
            label,
            Point::new(origin.0, origin.1),
            FONT,
            scale,
            Scalar::new(255.0, 255.0, 255.0, 0.0),
            thickness,
            imgproc::LINE_AA,
            false,
        )?;

        Ok(())
    }
}

/// One-line per-frame summary, e.g. `640x480: 2 persons, 1 cup`
pub fn summarize(width: i32, height: i32, detections: &[Detection], names: &ClassNames) -> String {
    let mut counts: Vec<(i32, usize)> = Vec::new();
    for detection in detections {
        match counts.iter_mut().find(|(id, _)| *id == detection.class_id) {
            Some((_, count)) => *count += 1,
            None => counts.push((detection.class_id, 1)),
        }
    }
    counts.sort_by_key(|(id, _)| *id);

    if counts.is_empty() {
        return format!("{}x{}: (no detections)", width, height);
    }

    let parts: Vec<String> = counts
        .iter()
        .map(|(id, count)| {
            let plural = if *count > 1 { "s" } else { "" };
            format!("{} {}{}", count, names.name(*id), plural)
        })
        .collect();
    format!("{}x{}: {}", width, height, parts.join(", "))
}
