//! Synthetic camera for `stub://` sources.
//!
//! Renders a moving gradient with a bright block, converts it to planar YUV and
//! hands it out as `CameraFrame`s leased from a `BufferPool`, the same way a real
//! camera would.

use anyhow::Result;
use image::{Rgb, RgbImage};

use super::normalize::rgb_to_yuv420_planes;
use super::SourceStats;
use crate::frame::{BufferPool, CameraFrame};

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://camera".to_string(),
            width: 640,
            height: 480,
            rotation_degrees: 0,
        }
    }
}

pub struct SyntheticCamera {
    config: SyntheticConfig,
    pool: BufferPool,
    frame_count: u64,
    dropped: u64,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig, pool: BufferPool) -> Self {
        Self {
            config,
            pool,
            frame_count: 0,
            dropped: 0,
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticCamera: connected to {} ({}x{})",
            self.config.name,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    /// Produce the next frame, or `None` when every pool buffer is still leased.
    pub fn next_frame(&mut self) -> Result<Option<CameraFrame>> {
        let Some(lease) = self.pool.try_lease() else {
            self.dropped += 1;
            log::debug!("SyntheticCamera: buffer pool exhausted, frame dropped");
            return Ok(None);
        };
        self.frame_count += 1;
        let scene = self.render_scene();
        Ok(Some(CameraFrame::new(
            rgb_to_yuv420_planes(&scene),
            self.config.width,
            self.config.height,
            self.config.rotation_degrees,
            self.frame_count,
            lease,
        )))
    }

    fn render_scene(&self) -> RgbImage {
        let (w, h) = (self.config.width, self.config.height);
        let shift = self.frame_count.wrapping_mul(4);
        let phase = (shift % 256) as u32;
        let mut image = RgbImage::from_fn(w, h, |x, y| {
            let r = (x.wrapping_add(phase) % 256) as u8;
            let g = (y % 256) as u8;
            Rgb([r, g, 96])
        });

        // A block that drifts across the scene.
        let block_w = (w / 5).max(1);
        let block_h = (h / 4).max(1);
        let span = u64::from(w.saturating_sub(block_w).max(1));
        let left = (shift % span) as u32;
        let top = h / 3;
        for y in top..(top + block_h).min(h) {
            for x in left..(left + block_w).min(w) {
                image.put_pixel(x, y, Rgb([240, 240, 240]));
            }
        }
        image
    }

    pub fn is_healthy(&self) -> bool {
        true
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_dropped: self.dropped,
            source: self.config.name.clone(),
        }
    }
}
