//! Local image directory source.
//!
//! Replays JPEG/PNG files from a directory (sorted by name, looping), converting
//! each decoded image to planar YUV so it takes the same conversion path as
//! live camera frames.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::normalize::rgb_to_yuv420_planes;
use super::SourceStats;
use crate::frame::{BufferPool, CameraFrame};

#[derive(Clone, Debug)]
pub struct ImageDirConfig {
    pub dir: PathBuf,
    pub rotation_degrees: u32,
}

pub struct ImageDirSource {
    config: ImageDirConfig,
    pool: BufferPool,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    dropped: u64,
    last_error: Option<String>,
}

impl ImageDirSource {
    pub fn new(config: ImageDirConfig, pool: BufferPool) -> Self {
        Self {
            config,
            pool,
            files: Vec::new(),
            cursor: 0,
            frame_count: 0,
            dropped: 0,
            last_error: None,
        }
    }

    /// Scan the directory for images.
    pub fn connect(&mut self) -> Result<()> {
        let files = list_images(&self.config.dir)?;
        if files.is_empty() {
            return Err(anyhow!(
                "no .jpg/.jpeg/.png images found in {}",
                self.config.dir.display()
            ));
        }
        log::info!(
            "ImageDirSource: {} images in {}",
            files.len(),
            self.config.dir.display()
        );
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Option<CameraFrame>> {
        if self.files.is_empty() {
            return Err(anyhow!("image dir source not connected; call connect() first"));
        }
        let Some(lease) = self.pool.try_lease() else {
            self.dropped += 1;
            return Ok(None);
        };

        let path = &self.files[self.cursor];
        self.cursor = (self.cursor + 1) % self.files.len();
        let image = match image::open(path) {
            Ok(image) => image.to_rgb8(),
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(anyhow!("failed to decode {}: {}", path.display(), err));
            }
        };
        self.last_error = None;
        self.frame_count += 1;

        Ok(Some(CameraFrame::new(
            rgb_to_yuv420_planes(&image),
            image.width(),
            image.height(),
            self.config.rotation_degrees,
            self.frame_count,
            lease,
        )))
    }

    pub fn is_healthy(&self) -> bool {
        !self.files.is_empty() && self.last_error.is_none()
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_dropped: self.dropped,
            source: self.config.dir.display().to_string(),
        }
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read image dir {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
            .unwrap_or(false);
        if path.is_file() && is_image {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
