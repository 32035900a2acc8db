use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// One detected object. Coordinates are normalized to 0..1 of the frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(label: impl Into<String>, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            x1,
            y1,
            x2,
            y2,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// Result of one detection call. Exactly one variant per call.
#[derive(Debug)]
pub enum DetectionOutcome {
    /// The model found nothing.
    Empty,
    /// Non-empty box list plus the (possibly rotated) frame they refer to.
    Detected { boxes: Vec<BoundingBox>, frame: Frame },
}

impl DetectionOutcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, DetectionOutcome::Empty)
    }
}
