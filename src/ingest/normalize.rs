use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use crate::codec::{decode_jpeg, encode_jpeg, CONVERSION_JPEG_QUALITY};
use crate::frame::{CameraFrame, Frame, Plane};

/// Single-plane NV21 image: full luma plane followed by interleaved V/U samples.
#[derive(Clone, Debug)]
pub struct Nv21Image {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Nv21Image {
    /// Pack a Y/U/V camera frame into NV21.
    ///
    /// Chroma is written V first, then U, which is the reverse of the raw plane
    /// index order. Plane strides are honoured, so planar and semi-planar chroma
    /// both pack correctly.
    pub fn from_camera_frame(frame: &CameraFrame) -> Result<Self> {
        let (w, h) = checked_dims(frame.width, frame.height)?;
        let (cw, ch) = chroma_dims(w, h);
        let [y_plane, u_plane, v_plane] = frame.planes();

        let luma_len = w
            .checked_mul(h)
            .ok_or_else(|| anyhow!("NV21 frame dimensions overflow"))?;
        let mut data = Vec::with_capacity(luma_len + 2 * cw * ch);

        for row in 0..h {
            if y_plane.pixel_stride == 1 {
                let start = row * y_plane.row_stride;
                let line = y_plane
                    .data
                    .get(start..start + w)
                    .ok_or_else(|| anyhow!("luma plane too short at row {row}"))?;
                data.extend_from_slice(line);
            } else {
                for col in 0..w {
                    data.push(plane_sample(y_plane, row, col, "luma")?);
                }
            }
        }

        for row in 0..ch {
            for col in 0..cw {
                data.push(plane_sample(v_plane, row, col, "V")?);
                data.push(plane_sample(u_plane, row, col, "U")?);
            }
        }

        Ok(Self {
            data,
            width: frame.width,
            height: frame.height,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Convert to RGB (BT.601 full range).
    pub fn to_rgb(&self) -> Result<RgbImage> {
        let (w, h) = checked_dims(self.width, self.height)?;
        let (cw, ch) = chroma_dims(w, h);
        let y_len = w * h;
        let expected = y_len + 2 * cw * ch;
        if self.data.len() != expected {
            return Err(anyhow!(
                "NV21 frame length mismatch: expected {}, got {}",
                expected,
                self.data.len()
            ));
        }

        let mut rgb = vec![0u8; y_len * 3];
        for j in 0..h {
            for i in 0..w {
                let y = self.data[j * w + i] as f32;
                let vu_index = y_len + (j / 2) * cw * 2 + (i / 2) * 2;
                let v = self.data[vu_index] as f32 - 128.0;
                let u = self.data[vu_index + 1] as f32 - 128.0;

                let r = y + 1.402_f32 * v;
                let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
                let b = y + 1.772_f32 * u;

                let offset = (j * w + i) * 3;
                rgb[offset] = clamp_to_u8(r);
                rgb[offset + 1] = clamp_to_u8(g);
                rgb[offset + 2] = clamp_to_u8(b);
            }
        }

        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", self.width, self.height))
    }

    /// Materialize as a JPEG byte stream.
    pub fn compress_to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        encode_jpeg(&self.to_rgb()?, quality)
    }
}

/// Convert a camera frame into a decoded `Frame`.
///
/// The camera frame is consumed and released before this returns, whether or
/// not conversion succeeded.
pub fn convert_camera_frame(frame: CameraFrame) -> Result<Frame> {
    let rotation_degrees = frame.rotation_degrees;
    let sequence = frame.sequence;
    let decoded = decode_camera_frame(&frame);
    drop(frame);
    let image = decoded.with_context(|| format!("frame #{sequence} conversion failed"))?;
    Ok(Frame::new(image, rotation_degrees, sequence))
}

fn decode_camera_frame(frame: &CameraFrame) -> Result<RgbImage> {
    let nv21 = Nv21Image::from_camera_frame(frame)?;
    let jpeg = nv21.compress_to_jpeg(CONVERSION_JPEG_QUALITY)?;
    decode_jpeg(&jpeg)
}

/// Split an RGB image into planar Y/U/V 4:2:0 planes (pixel stride 1).
///
/// Chroma is the average of each 2x2 block.
pub fn rgb_to_yuv420_planes(image: &RgbImage) -> [Plane; 3] {
    let w = image.width() as usize;
    let h = image.height() as usize;
    let (cw, ch) = chroma_dims(w, h);

    let mut y_data = Vec::with_capacity(w * h);
    for pixel in image.pixels() {
        let [r, g, b] = pixel.0.map(f32::from);
        y_data.push(clamp_to_u8(0.299 * r + 0.587 * g + 0.114 * b));
    }

    let mut u_data = Vec::with_capacity(cw * ch);
    let mut v_data = Vec::with_capacity(cw * ch);
    for cy in 0..ch {
        for cx in 0..cw {
            let (mut r, mut g, mut b, mut n) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
            for y in (cy * 2)..((cy * 2 + 2).min(h)) {
                for x in (cx * 2)..((cx * 2 + 2).min(w)) {
                    let [pr, pg, pb] = image.get_pixel(x as u32, y as u32).0;
                    r += pr as f32;
                    g += pg as f32;
                    b += pb as f32;
                    n += 1.0;
                }
            }
            let (r, g, b) = (r / n, g / n, b / n);
            u_data.push(clamp_to_u8(-0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0));
            v_data.push(clamp_to_u8(0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0));
        }
    }

    [
        Plane::new(y_data, w, 1),
        Plane::new(u_data, cw, 1),
        Plane::new(v_data, cw, 1),
    ]
}

fn plane_sample(plane: &Plane, row: usize, col: usize, name: &str) -> Result<u8> {
    let index = row * plane.row_stride + col * plane.pixel_stride;
    plane
        .data
        .get(index)
        .copied()
        .ok_or_else(|| anyhow!("{name} plane too short at row {row}, col {col}"))
}

fn checked_dims(width: u32, height: u32) -> Result<(usize, usize)> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame has empty dimensions {width}x{height}"));
    }
    Ok((width as usize, height as usize))
}

fn chroma_dims(w: usize, h: usize) -> (usize, usize) {
    (w.div_ceil(2), h.div_ceil(2))
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
