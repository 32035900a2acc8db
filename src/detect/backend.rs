use anyhow::Result;
use image::RgbImage;

use crate::detect::result::BoundingBox;

/// Detector backend trait.
///
/// A backend is an opaque inference capability: given an image it produces
/// labeled, confidence-scored, normalized boxes. `setup` loads model
/// artifacts and runs once before the first `detect`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Load model artifacts (model file, label list).
    fn setup(&mut self) -> Result<()>;

    /// Run detection on a frame.
    ///
    /// Implementations must treat the image as read-only and ephemeral.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>>;
}
