mod backend;
pub mod backends;
mod engine;
pub mod labels;
mod result;
pub mod yolo;

pub use backend::DetectorBackend;
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use engine::{apply_rotation, DetectionEngine};
pub use labels::load_labels;
pub use result::{BoundingBox, DetectionOutcome};
