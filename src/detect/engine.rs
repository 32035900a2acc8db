use anyhow::{anyhow, Context, Result};
use image::imageops;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionOutcome;
use crate::frame::Frame;

/// Wraps one detector backend.
///
/// `setup` must run before `detect`. `detect` takes `&mut self`, so one engine
/// never runs two inferences at once against its backend.
pub struct DetectionEngine {
    backend: Box<dyn DetectorBackend>,
    ready: bool,
}

impl DetectionEngine {
    pub fn new<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            backend,
            ready: false,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Load model artifacts. Idempotent.
    pub fn setup(&mut self) -> Result<()> {
        if self.ready {
            return Ok(());
        }
        self.backend
            .setup()
            .with_context(|| format!("detector '{}' setup failed", self.backend.name()))?;
        self.ready = true;
        log::info!("detector '{}' ready", self.backend.name());
        Ok(())
    }

    /// Run detection on a frame.
    ///
    /// The frame's rotation hint is applied first (0, 90, 180 or 270 degrees
    /// clockwise, no cropping). A detector that was never set up is an error.
    pub fn detect(&mut self, frame: Frame) -> Result<DetectionOutcome> {
        if !self.ready {
            return Err(anyhow!(
                "detector '{}' used before setup()",
                self.backend.name()
            ));
        }
        let frame = apply_rotation(frame)?;
        let boxes = self.backend.detect(frame.image())?;
        if boxes.is_empty() {
            Ok(DetectionOutcome::Empty)
        } else {
            Ok(DetectionOutcome::Detected { boxes, frame })
        }
    }
}

/// Rotate a frame upright. The returned frame carries a zero rotation hint.
pub fn apply_rotation(frame: Frame) -> Result<Frame> {
    let rotated = match frame.rotation_degrees {
        0 => return Ok(frame),
        90 => imageops::rotate90(frame.image()),
        180 => imageops::rotate180(frame.image()),
        270 => imageops::rotate270(frame.image()),
        other => {
            return Err(anyhow!(
                "unsupported rotation {other} degrees; expected 0, 90, 180 or 270"
            ))
        }
    };
    Ok(Frame::new(rotated, 0, frame.sequence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedBackend;
    use crate::detect::result::BoundingBox;
    use image::{Rgb, RgbImage};

    fn frame(width: u32, height: u32, rotation: u32) -> Frame {
        Frame::new(RgbImage::new(width, height), rotation, 1)
    }

    #[test]
    fn detect_before_setup_fails() {
        let mut engine = DetectionEngine::new(ScriptedBackend::default());
        assert!(engine.detect(frame(4, 4, 0)).is_err());
    }

    #[test]
    fn empty_box_list_is_empty_outcome() -> Result<()> {
        let mut engine = DetectionEngine::new(ScriptedBackend::default());
        engine.setup()?;
        assert!(engine.detect(frame(4, 4, 0))?.is_empty());
        Ok(())
    }

    #[test]
    fn detected_outcome_carries_rotated_frame() -> Result<()> {
        let car = BoundingBox::new("car", 0.7, 0.0, 0.0, 0.5, 0.5);
        let mut engine = DetectionEngine::new(ScriptedBackend::new(vec![car.clone()]));
        engine.setup()?;

        match engine.detect(frame(6, 2, 90))? {
            DetectionOutcome::Detected { boxes, frame } => {
                assert_eq!(boxes, vec![car]);
                assert_eq!((frame.width(), frame.height()), (2, 6));
                assert_eq!(frame.rotation_degrees, 0);
            }
            DetectionOutcome::Empty => panic!("expected detections"),
        }
        Ok(())
    }

    #[test]
    fn rotation_keeps_every_pixel() -> Result<()> {
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        let rotated = apply_rotation(Frame::new(image, 90, 1))?;
        // Top-left moves to top-right under a clockwise quarter turn.
        assert_eq!(rotated.image().get_pixel(1, 0).0, [255, 0, 0]);

        let turned = apply_rotation(Frame::new(RgbImage::new(3, 2), 180, 1))?;
        assert_eq!((turned.width(), turned.height()), (3, 2));
        Ok(())
    }

    #[test]
    fn odd_rotation_is_rejected() {
        assert!(apply_rotation(frame(2, 2, 45)).is_err());
    }

    #[test]
    fn backend_failure_surfaces_as_error() -> Result<()> {
        let mut engine = DetectionEngine::new(ScriptedBackend::default().then_fail("boom"));
        engine.setup()?;
        assert!(engine.detect(frame(2, 2, 0)).is_err());
        Ok(())
    }
}
