//! Overlay rendering.
//!
//! `OverlayMapper` scales detection rectangles from source-frame pixels into the
//! destination surface and turns each box into drawing primitives: the box
//! outline, a label chip above its top edge and the caption on the chip.
//! The primitives are plain `RenderOp` values; any `Canvas` can execute them.

mod raster;

pub use raster::{GlyphFont, RasterCanvas};

use crate::select::{Color, DetectionBox, DetectionState, Rect};

/// Outline width of detection boxes.
pub const STROKE_WIDTH: f32 = 4.0;
/// Padding between the caption and the edge of its chip.
pub const CHIP_PADDING: f32 = 5.0;
/// Caption baseline distance above the box top.
pub const LABEL_BASELINE_OFFSET: f32 = 10.0;
/// Caption color.
pub const TEXT_COLOR: Color = Color::rgb(0xFF, 0xFF, 0xFF);

/// One drawing primitive in surface pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderOp {
    StrokeRect {
        rect: Rect,
        color: Color,
        width: f32,
    },
    FillRect {
        rect: Rect,
        color: Color,
    },
    /// Text starting at `x` with its baseline at `baseline`.
    Text {
        x: f32,
        baseline: f32,
        text: String,
        color: Color,
    },
}

/// Measures rendered text.
pub trait TextMeasure {
    /// `(width, height)` of the text's bounds in pixels.
    fn measure(&self, text: &str) -> (f32, f32);
}

/// Executes render ops.
pub trait Canvas {
    fn stroke_rect(&mut self, rect: &Rect, color: Color, width: f32);
    fn fill_rect(&mut self, rect: &Rect, color: Color);
    fn draw_text(&mut self, x: f32, baseline: f32, text: &str, color: Color);

    fn draw_ops(&mut self, ops: &[RenderOp]) {
        for op in ops {
            match op {
                RenderOp::StrokeRect { rect, color, width } => self.stroke_rect(rect, *color, *width),
                RenderOp::FillRect { rect, color } => self.fill_rect(rect, *color),
                RenderOp::Text {
                    x,
                    baseline,
                    text,
                    color,
                } => self.draw_text(*x, *baseline, text, *color),
            }
        }
    }
}

/// Maps source-frame rectangles onto a surface.
///
/// Horizontal and vertical scale are independent (surface / source). Until both
/// sizes are known the scale is 1 and rectangles pass through unchanged.
#[derive(Clone, Debug)]
pub struct OverlayMapper {
    surface: Option<(u32, u32)>,
    source: Option<(u32, u32)>,
    scale_x: f32,
    scale_y: f32,
}

impl Default for OverlayMapper {
    fn default() -> Self {
        Self {
            surface: None,
            source: None,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

impl OverlayMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_surface_size(&mut self, width: u32, height: u32) {
        self.surface = non_zero(width, height);
        self.recompute();
    }

    pub fn set_source_size(&mut self, width: u32, height: u32) {
        self.source = non_zero(width, height);
        self.recompute();
    }

    pub fn scale(&self) -> (f32, f32) {
        (self.scale_x, self.scale_y)
    }

    fn recompute(&mut self) {
        (self.scale_x, self.scale_y) = match (self.surface, self.source) {
            (Some((sw, sh)), Some((fw, fh))) => (sw as f32 / fw as f32, sh as f32 / fh as f32),
            _ => (1.0, 1.0),
        };
    }

    pub fn map_rect(&self, rect: &Rect) -> Rect {
        Rect::new(
            rect.left * self.scale_x,
            rect.top * self.scale_y,
            rect.right * self.scale_x,
            rect.bottom * self.scale_y,
        )
    }

    /// Render a full detection state, picking up its source frame size first.
    pub fn render_state(&mut self, state: &DetectionState, measure: &dyn TextMeasure) -> Vec<RenderOp> {
        if state.frame_width > 0 && state.frame_height > 0 {
            self.set_source_size(state.frame_width, state.frame_height);
        }
        self.render(&state.boxes, measure)
    }

    /// Ops for the given boxes, in box order: outline, chip, caption.
    pub fn render(&self, boxes: &[DetectionBox], measure: &dyn TextMeasure) -> Vec<RenderOp> {
        let mut ops = Vec::with_capacity(boxes.len() * 3);
        for detection in boxes {
            let rect = self.map_rect(&detection.rect);
            ops.push(RenderOp::StrokeRect {
                rect,
                color: detection.color,
                width: STROKE_WIDTH,
            });

            let caption = detection.caption();
            let (text_width, text_height) = measure.measure(&caption);
            let x = rect.left;
            let baseline = rect.top - LABEL_BASELINE_OFFSET;
            ops.push(RenderOp::FillRect {
                rect: Rect::new(
                    x - CHIP_PADDING,
                    baseline - text_height - CHIP_PADDING,
                    x + text_width + CHIP_PADDING,
                    baseline + CHIP_PADDING,
                ),
                color: detection.color,
            });
            ops.push(RenderOp::Text {
                x,
                baseline,
                text: caption,
                color: TEXT_COLOR,
            });
        }
        ops
    }
}

fn non_zero(width: u32, height: u32) -> Option<(u32, u32)> {
    (width > 0 && height > 0).then_some((width, height))
}
