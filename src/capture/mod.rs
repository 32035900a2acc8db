//! Capture subsystem.
//!
//! The frame loop posts `CaptureRequest`s; a `CaptureWorker` thread persists
//! them through a `CaptureStore` and publishes a `CaptureStatus` that returns
//! to idle a few seconds after each outcome.

mod status;
mod storage;
mod worker;

use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::frame::Frame;

pub use status::CaptureStatus;
pub use storage::{
    capture_file_name, ensure_free_space, CaptureStore, FilesystemSpace, FixedSpace, SpaceProbe,
    StorageLayout, CAPTURE_DIR_NAME, SPACE_SAFETY_FACTOR,
};
pub use worker::{CaptureSettings, CaptureWorker};

/// Image to persist, tagged with the detected label.
///
/// The pixels are shared with the detection frame, never mutated.
#[derive(Clone)]
pub struct CaptureRequest {
    pub label: String,
    pub image: Arc<RgbImage>,
    /// Sequence number of the frame the image came from.
    pub sequence: u64,
}

impl CaptureRequest {
    pub fn new(label: impl Into<String>, frame: &Frame) -> Self {
        Self {
            label: label.into(),
            image: frame.shared_image(),
            sequence: frame.sequence,
        }
    }
}

impl std::fmt::Debug for CaptureRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureRequest")
            .field("label", &self.label)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture directory {dir} unavailable: {reason}")]
    StorageUnavailable { dir: PathBuf, reason: String },
    #[error("insufficient storage: {available} bytes free, {required} required")]
    InsufficientSpace { available: u64, required: u64 },
    #[error("failed to encode capture: {0}")]
    EncodeFailed(String),
    #[error("capture {0} missing or empty after write")]
    VerificationFailed(PathBuf),
    #[error("capture cancelled")]
    Cancelled,
}

impl CaptureError {
    /// Short status text shown to the user.
    pub fn status_reason(&self) -> &'static str {
        match self {
            CaptureError::StorageUnavailable { .. } => "Storage not available",
            _ => "Failed to save image",
        }
    }
}
