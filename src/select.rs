//! Detection filtering and selection.
//!
//! Keeps only boxes of the target class, colors them from a fixed palette, picks
//! the most confident one and builds the `DetectionState` observers see. A
//! non-empty selection also yields a capture request for the best box.

use anyhow::{anyhow, Result};
use std::fmt;

use crate::capture::CaptureRequest;
use crate::detect::{BoundingBox, DetectionOutcome};
use crate::frame::Frame;

/// Status color used when nothing of interest is on screen.
pub const NEUTRAL_COLOR: Color = Color::rgb(0xFF, 0xFF, 0xFF);

/// Color for labels missing from the palette.
pub const DEFAULT_LABEL_COLOR: Color = Color::rgb(0xFF, 0x57, 0x22);

const PALETTE: &[(&str, Color)] = &[
    ("car", Color::rgb(0x4C, 0xAF, 0x50)),
    ("person", Color::rgb(0x21, 0x96, 0xF3)),
    ("dog", Color::rgb(0xFF, 0x98, 0x00)),
    ("bottle", Color::rgb(0xFF, 0x98, 0x00)),
    ("phone", Color::rgb(0x9C, 0x27, 0xB0)),
    ("laptop", Color::rgb(0x60, 0x7D, 0x8B)),
    ("remote", Color::rgb(0x79, 0x55, 0x48)),
    ("book", Color::rgb(0x8B, 0xC3, 0x4A)),
    ("chair", Color::rgb(0xFF, 0x57, 0x22)),
    ("table", Color::rgb(0x79, 0x55, 0x48)),
    ("food", Color::rgb(0xFF, 0x57, 0x22)),
    ("ring", Color::rgb(0xE9, 0x1E, 0x63)),
    ("unknown object", Color::rgb(0x9E, 0x9E, 0x9E)),
    ("object", Color::rgb(0xFF, 0x98, 0x00)),
];

/// Palette lookup by case-insensitive label.
pub fn color_for_label(label: &str) -> Color {
    let label = label.to_lowercase();
    PALETTE
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, color)| *color)
        .unwrap_or(DEFAULT_LABEL_COLOR)
}

// ----------------------------------------------------------------------------
// Color / Rect
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Axis-aligned rectangle in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

// ----------------------------------------------------------------------------
// DetectionBox / DetectionState
// ----------------------------------------------------------------------------

/// A colored detection ready for the overlay. `rect` is in source-frame pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionBox {
    pub label: String,
    pub confidence: f32,
    pub rect: Rect,
    pub color: Color,
}

impl DetectionBox {
    /// Chip text, e.g. `car 81%`.
    pub fn caption(&self) -> String {
        format!("{} {}%", self.label, percent(self.confidence))
    }
}

/// What observers see after one frame cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionState {
    pub text: String,
    pub color: Color,
    /// Rendering order equals detection order.
    pub boxes: Vec<DetectionBox>,
    /// Source frame size the box rectangles refer to; zero when unknown.
    pub frame_width: u32,
    pub frame_height: u32,
}

impl DetectionState {
    /// State when the detector found nothing at all.
    pub fn no_objects() -> Self {
        Self::neutral("No objects detected".to_string())
    }

    fn neutral(text: String) -> Self {
        Self {
            text,
            color: NEUTRAL_COLOR,
            boxes: Vec::new(),
            frame_width: 0,
            frame_height: 0,
        }
    }
}

impl Default for DetectionState {
    fn default() -> Self {
        Self::no_objects()
    }
}

/// Output of one selection: the observable state and, at most, one capture request.
#[derive(Debug)]
pub struct Selection {
    pub state: DetectionState,
    pub capture: Option<CaptureRequest>,
}

// ----------------------------------------------------------------------------
// DetectionSelector
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct DetectionSelector {
    target_class: String,
}

impl DetectionSelector {
    pub fn new(target_class: impl Into<String>) -> Result<Self> {
        let target_class = target_class.into().trim().to_string();
        if target_class.is_empty() {
            return Err(anyhow!("target class cannot be empty"));
        }
        Ok(Self { target_class })
    }

    pub fn target_class(&self) -> &str {
        &self.target_class
    }

    /// Route a detection outcome.
    pub fn apply(&self, outcome: DetectionOutcome) -> Selection {
        match outcome {
            DetectionOutcome::Empty => Selection {
                state: DetectionState::no_objects(),
                capture: None,
            },
            DetectionOutcome::Detected { boxes, frame } => self.select(&boxes, &frame),
        }
    }

    /// Filter, color and rank `boxes` detected on `frame`.
    pub fn select(&self, boxes: &[BoundingBox], frame: &Frame) -> Selection {
        let target = self.target_class.to_lowercase();
        let matching: Vec<&BoundingBox> = boxes
            .iter()
            .filter(|b| b.label.to_lowercase() == target)
            .collect();

        if matching.is_empty() {
            return Selection {
                state: DetectionState::neutral(format!("No {} detected", self.target_class)),
                capture: None,
            };
        }

        let (fw, fh) = (frame.width() as f32, frame.height() as f32);
        let detection_boxes: Vec<DetectionBox> = matching
            .iter()
            .map(|b| DetectionBox {
                label: b.label.clone(),
                confidence: b.confidence,
                rect: Rect::new(b.x1 * fw, b.y1 * fh, b.x2 * fw, b.y2 * fh),
                color: color_for_label(&b.label),
            })
            .collect();

        let best = &detection_boxes[best_index(&detection_boxes)];
        let text = format!(
            "{} detected ({}%)",
            capitalize(&self.target_class),
            percent(best.confidence)
        );
        let capture = CaptureRequest::new(best.label.clone(), frame);
        let color = best.color;

        Selection {
            state: DetectionState {
                text,
                color,
                boxes: detection_boxes,
                frame_width: frame.width(),
                frame_height: frame.height(),
            },
            capture: Some(capture),
        }
    }
}

/// Strictly-greater scan: on equal confidence the earlier box stays best.
fn best_index(boxes: &[DetectionBox]) -> usize {
    let mut best = 0;
    for (index, candidate) in boxes.iter().enumerate().skip(1) {
        if candidate.confidence > boxes[best].confidence {
            best = index;
        }
    }
    best
}

/// Confidence as a truncated integer percentage.
pub fn percent(confidence: f32) -> i32 {
    (confidence * 100.0) as i32
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn frame() -> Frame {
        Frame::new(RgbImage::new(200, 100), 0, 1)
    }

    fn selector() -> DetectionSelector {
        DetectionSelector::new("car").unwrap()
    }

    #[test]
    fn filters_case_insensitively() {
        let boxes = vec![
            BoundingBox::new("CAR", 0.5, 0.0, 0.0, 0.1, 0.1),
            BoundingBox::new("person", 0.9, 0.0, 0.0, 0.1, 0.1),
            BoundingBox::new("Car", 0.6, 0.0, 0.0, 0.1, 0.1),
        ];
        let selection = selector().select(&boxes, &frame());
        let labels: Vec<&str> = selection.state.boxes.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["CAR", "Car"]);
    }

    #[test]
    fn ties_keep_first_box() {
        let boxes = vec![
            BoundingBox::new("car", 0.40, 0.0, 0.0, 0.1, 0.1),
            BoundingBox::new("car", 0.95, 0.1, 0.1, 0.2, 0.2),
            BoundingBox::new("car", 0.95, 0.5, 0.5, 0.6, 0.6),
        ];
        let selection = selector().select(&boxes, &frame());
        assert_eq!(best_index(&selection.state.boxes), 1);
        assert_eq!(selection.state.text, "Car detected (95%)");
    }

    #[test]
    fn single_car_scenario() {
        let boxes = vec![BoundingBox::new("car", 0.81, 0.1, 0.1, 0.5, 0.6)];
        let selection = selector().select(&boxes, &frame());

        assert_eq!(selection.state.text, "Car detected (81%)");
        assert_eq!(selection.state.color.to_hex(), "#4CAF50");
        assert_eq!(selection.state.boxes.len(), 1);
        let only = &selection.state.boxes[0];
        assert_eq!(only.color, color_for_label("car"));
        let expected = [20.0, 10.0, 100.0, 60.0];
        let actual = [only.rect.left, only.rect.top, only.rect.right, only.rect.bottom];
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-3, "{a} != {e}");
        }

        let capture = selection.capture.expect("capture request");
        assert_eq!(capture.label, "car");
        assert_eq!(capture.sequence, 1);
    }

    #[test]
    fn no_match_is_neutral_without_capture() {
        let boxes = vec![BoundingBox::new("person", 0.9, 0.0, 0.0, 0.5, 0.5)];
        let selection = selector().select(&boxes, &frame());
        assert_eq!(selection.state.text, "No car detected");
        assert_eq!(selection.state.color, NEUTRAL_COLOR);
        assert!(selection.state.boxes.is_empty());
        assert!(selection.capture.is_none());
    }

    #[test]
    fn empty_outcome_reports_no_objects() {
        let selection = selector().apply(DetectionOutcome::Empty);
        assert_eq!(selection.state.text, "No objects detected");
        assert_eq!(selection.state.color.to_hex(), "#FFFFFF");
        assert!(selection.capture.is_none());
    }

    #[test]
    fn selection_is_deterministic() {
        let boxes = vec![
            BoundingBox::new("car", 0.7, 0.0, 0.0, 0.1, 0.1),
            BoundingBox::new("car", 0.9, 0.2, 0.2, 0.3, 0.3),
        ];
        let first = selector().select(&boxes, &frame());
        let second = selector().select(&boxes, &frame());
        assert_eq!(first.state, second.state);
    }

    #[test]
    fn palette_falls_back_to_default() {
        assert_eq!(color_for_label("Person").to_hex(), "#2196F3");
        assert_eq!(color_for_label("zebra"), DEFAULT_LABEL_COLOR);
    }

    #[test]
    fn hex_is_uppercase_and_zero_padded() {
        assert_eq!(Color::rgb(0xE9, 0x1E, 0x63).to_hex(), "#E91E63");
        assert_eq!(Color::rgb(0, 0x0A, 0xFF).to_hex(), "#000AFF");
    }

    #[test]
    fn empty_target_class_is_rejected() {
        assert!(DetectionSelector::new("  ").is_err());
    }
}
