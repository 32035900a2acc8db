//! Frame ingestion.
//!
//! Sources hand out multi-plane `CameraFrame`s leased from a `BufferPool`:
//! - `stub://<name>`: synthetic camera (testing, demos)
//! - a local directory path: replays the images found there
//!
//! `convert_camera_frame` turns a camera frame into a decoded RGB `Frame`
//! and releases the camera buffer on every path.

pub mod image_dir;
mod normalize;
pub mod synthetic;

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::frame::{BufferPool, CameraFrame};

pub use image_dir::{ImageDirConfig, ImageDirSource};
pub use normalize::{convert_camera_frame, rgb_to_yuv420_planes, Nv21Image};
pub use synthetic::{SyntheticCamera, SyntheticConfig};

/// Configuration for the single active frame source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://<name>` or a local directory of images.
    pub url: String,
    pub target_fps: u32,
    /// Synthetic frame size; image directories use each file's own size.
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u32,
    pub pool_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
            rotation_degrees: 0,
            pool_size: crate::frame::DEFAULT_POOL_BUFFERS,
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    /// Frames the source could not deliver because the buffer pool was exhausted.
    pub frames_dropped: u64,
    pub source: String,
}

/// The active frame source.
pub struct CameraSource {
    backend: SourceBackend,
    pool: BufferPool,
}

enum SourceBackend {
    Synthetic(SyntheticCamera),
    ImageDir(ImageDirSource),
}

impl CameraSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let pool = BufferPool::new(config.pool_size);
        let url = config.url.trim();
        if url.is_empty() {
            return Err(anyhow!("frame source url cannot be empty"));
        }
        let backend = if url.starts_with("stub://") {
            SourceBackend::Synthetic(SyntheticCamera::new(
                SyntheticConfig {
                    name: url.to_string(),
                    width: config.width,
                    height: config.height,
                    rotation_degrees: config.rotation_degrees,
                },
                pool.clone(),
            ))
        } else if url.contains("://") {
            return Err(anyhow!(
                "unsupported frame source '{}'; expected stub:// or a local directory",
                url
            ));
        } else {
            SourceBackend::ImageDir(ImageDirSource::new(
                ImageDirConfig {
                    dir: PathBuf::from(url),
                    rotation_degrees: config.rotation_degrees,
                },
                pool.clone(),
            ))
        };
        Ok(Self { backend, pool })
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.connect(),
            SourceBackend::ImageDir(source) => source.connect(),
        }
    }

    /// Capture the next frame. `None` means the camera had no free buffer.
    pub fn next_frame(&mut self) -> Result<Option<CameraFrame>> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_frame(),
            SourceBackend::ImageDir(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.is_healthy(),
            SourceBackend::ImageDir(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.stats(),
            SourceBackend::ImageDir(source) => source.stats(),
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }
}

/// Minimum spacing between frames for a target rate.
pub fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis(1000 / target_fps as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_remote_urls() {
        let config = SourceConfig {
            url: "rtsp://camera".to_string(),
            ..SourceConfig::default()
        };
        assert!(CameraSource::new(&config).is_err());
    }

    #[test]
    fn stub_source_shares_pool() -> Result<()> {
        let config = SourceConfig {
            width: 16,
            height: 16,
            pool_size: 1,
            ..SourceConfig::default()
        };
        let mut source = CameraSource::new(&config)?;
        source.connect()?;
        let frame = source.next_frame()?;
        assert!(frame.is_some());
        assert_eq!(source.pool().outstanding(), 1);
        drop(frame);
        assert_eq!(source.pool().outstanding(), 0);
        Ok(())
    }

    #[test]
    fn frame_interval_matches_rate() {
        assert_eq!(frame_interval(10), Duration::from_millis(100));
        assert_eq!(frame_interval(0), Duration::from_millis(0));
    }
}
