use anyhow::{anyhow, Result};
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::BoundingBox;

/// Scripted backend for demos and tests.
///
/// Each call pops the next queued response; once the queue is empty every call
/// returns the fixed box list.
pub struct ScriptedBackend {
    fixed: Vec<BoundingBox>,
    queue: VecDeque<Result<Vec<BoundingBox>, String>>,
    calls: Arc<AtomicU64>,
}

impl ScriptedBackend {
    pub fn new(fixed: Vec<BoundingBox>) -> Self {
        Self {
            fixed,
            queue: VecDeque::new(),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue a one-shot response.
    pub fn then_boxes(mut self, boxes: Vec<BoundingBox>) -> Self {
        self.queue.push_back(Ok(boxes));
        self
    }

    /// Queue a one-shot inference failure.
    pub fn then_fail(mut self, reason: impl Into<String>) -> Self {
        self.queue.push_back(Err(reason.into()));
        self
    }

    /// Shared counter of `detect` calls, readable after the backend moves threads.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.calls)
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.queue.pop_front() {
            Some(Ok(boxes)) => Ok(boxes),
            Some(Err(reason)) => Err(anyhow!("scripted inference failure: {reason}")),
            None => Ok(self.fixed.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_responses_precede_fixed_boxes() {
        let car = BoundingBox::new("car", 0.8, 0.1, 0.1, 0.4, 0.4);
        let mut backend = ScriptedBackend::new(vec![car.clone()])
            .then_boxes(Vec::new())
            .then_fail("model crashed");
        let counter = backend.call_counter();
        let image = RgbImage::new(2, 2);

        assert!(backend.detect(&image).unwrap().is_empty());
        assert!(backend.detect(&image).is_err());
        assert_eq!(backend.detect(&image).unwrap(), vec![car]);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
