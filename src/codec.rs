//! JPEG helpers shared by frame conversion and capture persistence.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use std::io::Write;

/// Quality used for the in-memory intermediate during frame conversion.
pub const CONVERSION_JPEG_QUALITY: u8 = 100;

/// Quality used for persisted captures.
pub const CAPTURE_JPEG_QUALITY: u8 = 90;

/// Encode an RGB image as JPEG into `writer`.
pub fn write_jpeg<W: Write>(writer: W, image: &RgbImage, quality: u8) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(anyhow!("cannot encode an empty image"));
    }
    let quality = quality.clamp(1, 100);
    JpegEncoder::new_with_quality(writer, quality)
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))
}

/// Encode an RGB image as an in-memory JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_jpeg(&mut buffer, image, quality)?;
    Ok(buffer)
}

/// Decode JPEG bytes into an RGB image.
pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .context("JPEG decode failed")?;
    Ok(decoded.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn encoded_jpeg_decodes_with_same_dimensions() -> Result<()> {
        let image = RgbImage::from_pixel(16, 8, Rgb([40, 120, 200]));
        let bytes = encode_jpeg(&image, CAPTURE_JPEG_QUALITY)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let decoded = decode_jpeg(&bytes)?;
        assert_eq!(decoded.dimensions(), (16, 8));
        Ok(())
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_jpeg(b"not a jpeg").is_err());
    }
}
