use image::{Rgb, RgbImage};

use super::{Canvas, TextMeasure};
use crate::select::{Color, Rect};

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;

/// 5x7 bitmap font, upper-cased, drawn at an integer scale.
#[derive(Clone, Copy, Debug)]
pub struct GlyphFont {
    pub scale: u32,
}

impl Default for GlyphFont {
    fn default() -> Self {
        Self { scale: 2 }
    }
}

impl TextMeasure for GlyphFont {
    fn measure(&self, text: &str) -> (f32, f32) {
        let chars = text.chars().count() as u32;
        let width = (chars * GLYPH_ADVANCE).saturating_sub(1) * self.scale;
        (width as f32, (GLYPH_HEIGHT * self.scale) as f32)
    }
}

/// `Canvas` over an in-memory RGB image. Everything outside the image is clipped.
pub struct RasterCanvas {
    image: RgbImage,
    font: GlyphFont,
}

impl RasterCanvas {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            font: GlyphFont::default(),
        }
    }

    pub fn font(&self) -> &GlyphFont {
        &self.font
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    fn fill_px(&mut self, left: i64, top: i64, right: i64, bottom: i64, color: Rgb<u8>) {
        let width = self.image.width() as i64;
        let height = self.image.height() as i64;
        let (left, right) = (left.max(0), right.min(width));
        let (top, bottom) = (top.max(0), bottom.min(height));
        for y in top..bottom {
            for x in left..right {
                self.image.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

fn pixel(color: Color) -> Rgb<u8> {
    Rgb([color.r, color.g, color.b])
}

impl Canvas for RasterCanvas {
    fn stroke_rect(&mut self, rect: &Rect, color: Color, width: f32) {
        let color = pixel(color);
        let half = (width / 2.0).max(0.5);
        let (left, top) = (rect.left.round() as i64, rect.top.round() as i64);
        let (right, bottom) = (rect.right.round() as i64, rect.bottom.round() as i64);
        let inner = (half.floor() as i64).max(0);
        let outer = half.ceil() as i64;
        // Top, bottom, left, right bands centered on the edges.
        self.fill_px(left - outer, top - outer, right + outer, top + inner.max(1), color);
        self.fill_px(left - outer, bottom - inner, right + outer, bottom + outer, color);
        self.fill_px(left - outer, top - outer, left + inner.max(1), bottom + outer, color);
        self.fill_px(right - inner, top - outer, right + outer, bottom + outer, color);
    }

    fn fill_rect(&mut self, rect: &Rect, color: Color) {
        self.fill_px(
            rect.left.round() as i64,
            rect.top.round() as i64,
            rect.right.round() as i64,
            rect.bottom.round() as i64,
            pixel(color),
        );
    }

    fn draw_text(&mut self, x: f32, baseline: f32, text: &str, color: Color) {
        let color = pixel(color);
        let scale = self.font.scale.max(1) as i64;
        let top = baseline.round() as i64 - GLYPH_HEIGHT as i64 * scale;
        let mut cursor = x.round() as i64;
        for ch in text.chars().flat_map(char::to_uppercase) {
            if let Some(rows) = glyph_bits(ch) {
                for (row, pattern) in rows.iter().enumerate() {
                    for col in 0..GLYPH_WIDTH {
                        if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                            let px = cursor + col as i64 * scale;
                            let py = top + row as i64 * scale;
                            self.fill_px(px, py, px + scale, py + scale, color);
                        }
                    }
                }
            }
            cursor += GLYPH_ADVANCE as i64 * scale;
        }
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b11011, 0b10001],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b11001, 0b11010, 0b00010, 0b00100, 0b01000, 0b01011, 0b10011],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        _ => return None,
    };
    Some(rows)
}
