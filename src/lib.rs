//! camwatch
//!
//! Real-time camera detection pipeline with guarded capture persistence.
//!
//! # Architecture
//!
//! Frames flow through one dedicated frame loop:
//!
//! 1. **Ingest**: a camera hands over a multi-plane YUV frame; it is packed as
//!    NV21, compressed to a JPEG intermediate and decoded to RGB. The camera
//!    buffer is released exactly once, whatever happens.
//! 2. **Detect**: a `DetectorBackend` turns the upright image into normalized,
//!    labeled boxes (`Empty` or `Detected`).
//! 3. **Select**: boxes of the target class are colored and ranked; the most
//!    confident one names the status text and the capture.
//! 4. **Render**: `OverlayMapper` scales boxes onto a surface as draw ops.
//! 5. **Capture**: a worker thread persists the frame as JPEG after checking
//!    storage, and reports a status that resets to idle after a delay.
//!
//! The camera side and the frame loop meet in a single-slot mailbox that keeps
//! only the newest frame. Results reach observers through last-value-wins
//! channels.
//!
//! # Module Structure
//!
//! - `frame`: camera frames, buffer pool leases, decoded frames
//! - `ingest`: frame sources and YUV to RGB conversion
//! - `detect`: detector backends and the detection engine
//! - `select`: class filtering, palette, best-box selection
//! - `overlay`: coordinate mapping and rendering
//! - `capture`: storage resolution, space guard, persistence, status
//! - `channel`: mailbox, last-value observable, cancellation
//! - `pipeline`: threads and telemetry
//! - `config`: daemon configuration

pub mod capture;
pub mod channel;
pub mod codec;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod pipeline;
pub mod select;

pub use capture::{
    CaptureError, CaptureRequest, CaptureSettings, CaptureStatus, CaptureStore, CaptureWorker,
    FilesystemSpace, FixedSpace, SpaceProbe, StorageLayout,
};
pub use channel::{CancelToken, Latest, Mailbox};
pub use config::{CamwatchConfig, DetectorKind};
pub use detect::{BoundingBox, DetectionEngine, DetectionOutcome, DetectorBackend, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use frame::{BufferPool, CameraFrame, Frame, Plane, PoolLease};
pub use ingest::{convert_camera_frame, CameraSource, SourceConfig};
pub use overlay::{Canvas, OverlayMapper, RasterCanvas, RenderOp, TextMeasure};
pub use pipeline::{DetectionSnapshot, Pipeline, PipelineHandle, PipelineStats, Telemetry};
pub use select::{Color, DetectionBox, DetectionSelector, DetectionState, Rect};
