//! Frame pipeline wiring.
//!
//! A `Pipeline` owns the detector, the selector and the capture store. `spawn`
//! starts the frame loop thread (which in turn owns the capture worker) and
//! returns a `PipelineHandle` the camera side submits frames to.
//!
//! Backpressure is keep-only-latest: a frame still waiting when a newer one is
//! submitted is dropped, which returns its buffer to the camera pool.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::capture::{CaptureSettings, CaptureStatus, CaptureStore, CaptureWorker};
use crate::channel::{CancelToken, Latest, Mailbox};
use crate::detect::{apply_rotation, DetectionEngine, DetectionOutcome};
use crate::frame::{CameraFrame, Frame};
use crate::ingest::convert_camera_frame;
use crate::select::{DetectionBox, DetectionSelector, DetectionState};

const FRAME_POLL: Duration = Duration::from_millis(50);

// ----------------------------------------------------------------------------
// Telemetry
// ----------------------------------------------------------------------------

/// Result of one completed frame cycle: the selector's state and the upright
/// frame it was computed from.
#[derive(Clone, Debug, Default)]
pub struct DetectionSnapshot {
    pub state: DetectionState,
    /// `None` until the first frame completes.
    pub frame: Option<Frame>,
}

/// Last-value-wins channels read by the presentation side.
///
/// Text, color, boxes and the frame they belong to are published as one
/// `DetectionSnapshot`, so a reader never mixes values from two different
/// frames.
#[derive(Clone)]
pub struct Telemetry {
    pub detection: Latest<DetectionSnapshot>,
    pub capture_status: Latest<CaptureStatus>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            detection: Latest::new(DetectionSnapshot::default()),
            capture_status: Latest::new(CaptureStatus::Idle),
        }
    }

    pub fn detection_state(&self) -> DetectionState {
        self.detection.get().state
    }

    pub fn detection_text(&self) -> String {
        self.detection.get().state.text
    }

    /// Status color as `#RRGGBB`.
    pub fn detection_color(&self) -> String {
        self.detection.get().state.color.to_hex()
    }

    pub fn detection_boxes(&self) -> Vec<DetectionBox> {
        self.detection.get().state.boxes
    }

    pub fn capture_status_text(&self) -> String {
        self.capture_status.get().to_string()
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Stats
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StatsCounters {
    frames_submitted: AtomicU64,
    frames_displaced: AtomicU64,
    frames_processed: AtomicU64,
    conversion_failures: AtomicU64,
    detection_failures: AtomicU64,
    captures_requested: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_submitted: u64,
    /// Frames replaced in the mailbox before the loop picked them up.
    pub frames_displaced: u64,
    pub frames_processed: u64,
    pub conversion_failures: u64,
    pub detection_failures: u64,
    pub captures_requested: u64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_displaced: self.frames_displaced.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            conversion_failures: self.conversion_failures.load(Ordering::Relaxed),
            detection_failures: self.detection_failures.load(Ordering::Relaxed),
            captures_requested: self.captures_requested.load(Ordering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

pub struct Pipeline {
    engine: DetectionEngine,
    selector: DetectionSelector,
    store: CaptureStore,
    capture: CaptureSettings,
    telemetry: Telemetry,
}

impl Pipeline {
    pub fn new(
        engine: DetectionEngine,
        selector: DetectionSelector,
        store: CaptureStore,
        capture: CaptureSettings,
    ) -> Self {
        Self {
            engine,
            selector,
            store,
            capture,
            telemetry: Telemetry::new(),
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Set up the detector and start the frame loop and capture worker.
    pub fn spawn(mut self) -> Result<PipelineHandle> {
        self.engine.setup()?;
        let backend = self.engine.backend_name();
        let target = self.selector.target_class().to_string();

        let cancel = CancelToken::new();
        let frames = Mailbox::new();
        let stats = Arc::new(StatsCounters::default());
        let capture = CaptureWorker::spawn(
            self.store,
            self.capture,
            self.telemetry.capture_status.clone(),
            cancel.clone(),
        )?;

        let frame_loop = FrameLoop {
            engine: self.engine,
            selector: self.selector,
            capture,
            frames: frames.clone(),
            telemetry: self.telemetry.clone(),
            stats: Arc::clone(&stats),
            cancel: cancel.clone(),
        };
        let join = thread::Builder::new()
            .name("camwatch-frames".to_string())
            .spawn(move || frame_loop.run())
            .context("failed to spawn frame loop")?;

        log::info!(
            "pipeline started (detector '{}', target '{}')",
            backend,
            target
        );
        Ok(PipelineHandle {
            frames,
            telemetry: self.telemetry,
            stats,
            cancel,
            join: Some(join),
        })
    }
}

// ----------------------------------------------------------------------------
// Frame loop
// ----------------------------------------------------------------------------

struct FrameLoop {
    engine: DetectionEngine,
    selector: DetectionSelector,
    capture: CaptureWorker,
    frames: Mailbox<CameraFrame>,
    telemetry: Telemetry,
    stats: Arc<StatsCounters>,
    cancel: CancelToken,
}

impl FrameLoop {
    fn run(mut self) {
        while !self.cancel.is_cancelled() {
            if let Some(camera_frame) = self.frames.recv_timeout(FRAME_POLL) {
                self.process(camera_frame);
            }
        }
        // Dropping `self.capture` cancels and joins the capture worker.
        log::debug!("frame loop stopped");
    }

    fn process(&mut self, camera_frame: CameraFrame) {
        let sequence = camera_frame.sequence;
        let frame = match convert_camera_frame(camera_frame).and_then(apply_rotation) {
            Ok(frame) => frame,
            Err(err) => {
                StatsCounters::bump(&self.stats.conversion_failures);
                log::warn!("skipping frame #{}: {:#}", sequence, err);
                return;
            }
        };

        let outcome = match self.engine.detect(frame.clone()) {
            Ok(outcome) => outcome,
            Err(err) => {
                StatsCounters::bump(&self.stats.detection_failures);
                log::warn!("detection failed on frame #{}: {:#}", sequence, err);
                DetectionOutcome::Empty
            }
        };

        let selection = self.selector.apply(outcome);
        self.telemetry.detection.publish(DetectionSnapshot {
            state: selection.state,
            frame: Some(frame),
        });
        if let Some(request) = selection.capture {
            StatsCounters::bump(&self.stats.captures_requested);
            self.capture.request(request);
        }
        StatsCounters::bump(&self.stats.frames_processed);
    }
}

// ----------------------------------------------------------------------------
// PipelineHandle
// ----------------------------------------------------------------------------

/// Running pipeline. Dropping the handle stops both threads.
pub struct PipelineHandle {
    frames: Mailbox<CameraFrame>,
    telemetry: Telemetry,
    stats: Arc<StatsCounters>,
    cancel: CancelToken,
    join: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Hand a camera frame to the frame loop, displacing any frame still waiting.
    pub fn submit(&self, frame: CameraFrame) {
        StatsCounters::bump(&self.stats.frames_submitted);
        if let Some(stale) = self.frames.post(frame) {
            StatsCounters::bump(&self.stats.frames_displaced);
            log::debug!("dropping frame #{} for a newer one", stale.sequence);
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Cancel in-flight work and join the frame loop and capture worker.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        // Frames still queued go back to the pool.
        drop(self.frames.try_take());
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("frame loop thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("pipeline shutdown failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FixedSpace, StorageLayout};
    use crate::detect::{BoundingBox, ScriptedBackend};
    use crate::frame::{BufferPool, Plane};
    use crate::ingest::rgb_to_yuv420_planes;
    use image::RgbImage;
    use std::time::Instant;

    fn pipeline(backend: ScriptedBackend, dir: &std::path::Path) -> Result<Pipeline> {
        Ok(Pipeline::new(
            DetectionEngine::new(backend),
            DetectionSelector::new("car")?,
            CaptureStore::new(StorageLayout::internal(dir), FixedSpace(u64::MAX)),
            CaptureSettings::default(),
        ))
    }

    fn camera_frame(pool: &BufferPool, sequence: u64) -> CameraFrame {
        let planes = rgb_to_yuv420_planes(&RgbImage::new(8, 8));
        let lease = pool.try_lease().expect("free buffer");
        CameraFrame::new(planes, 8, 8, 0, sequence, lease)
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn setup_failure_prevents_spawn() -> Result<()> {
        struct Broken;
        impl crate::detect::DetectorBackend for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn setup(&mut self) -> Result<()> {
                Err(anyhow!("no model"))
            }
            fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>> {
                Ok(Vec::new())
            }
        }

        let temp = tempfile::tempdir()?;
        let pipeline = Pipeline::new(
            DetectionEngine::new(Broken),
            DetectionSelector::new("car")?,
            CaptureStore::new(StorageLayout::internal(temp.path()), FixedSpace(u64::MAX)),
            CaptureSettings::default(),
        );
        assert!(pipeline.spawn().is_err());
        Ok(())
    }

    #[test]
    fn unconvertible_frame_is_skipped_and_released() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let handle = pipeline(ScriptedBackend::default(), temp.path())?.spawn()?;
        let pool = BufferPool::new(1);
        let lease = pool.try_lease().expect("free buffer");
        let truncated = [
            Plane::new(vec![0; 4], 8, 1),
            Plane::new(vec![128; 16], 4, 1),
            Plane::new(vec![128; 16], 4, 1),
        ];
        handle.submit(CameraFrame::new(truncated, 8, 8, 0, 1, lease));

        assert!(wait_until(|| handle.stats().conversion_failures == 1));
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.released(), 1);
        assert_eq!(handle.stats().frames_processed, 0);
        handle.shutdown()
    }

    #[test]
    fn detection_failure_clears_state() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let car = BoundingBox::new("car", 0.75, 0.1, 0.1, 0.5, 0.5);
        let backend = ScriptedBackend::new(Vec::new())
            .then_boxes(vec![car])
            .then_fail("inference crashed");
        let handle = pipeline(backend, temp.path())?.spawn()?;
        let pool = BufferPool::new(2);

        handle.submit(camera_frame(&pool, 1));
        assert!(wait_until(|| handle.stats().frames_processed == 1));
        assert_eq!(handle.telemetry().detection_text(), "Car detected (75%)");

        handle.submit(camera_frame(&pool, 2));
        assert!(wait_until(|| handle.stats().frames_processed == 2));
        assert_eq!(handle.stats().detection_failures, 1);
        assert_eq!(handle.telemetry().detection_text(), "No objects detected");
        assert!(handle.telemetry().detection_boxes().is_empty());
        handle.shutdown()?;
        assert_eq!(pool.outstanding(), 0);
        Ok(())
    }

    #[test]
    fn snapshot_state_always_matches_its_frame() -> Result<()> {
        use std::sync::atomic::AtomicBool;

        let temp = tempfile::tempdir()?;
        let car = BoundingBox::new("car", 0.9, 0.1, 0.1, 0.6, 0.6);
        let handle = pipeline(ScriptedBackend::new(vec![car]), temp.path())?.spawn()?;
        let telemetry = handle.telemetry().clone();
        let done = Arc::new(AtomicBool::new(false));
        let reader_done = Arc::clone(&done);
        let reader = thread::spawn(move || {
            let mut mismatches = 0u32;
            while !reader_done.load(Ordering::SeqCst) {
                let snapshot = telemetry.detection.get();
                if let Some(frame) = &snapshot.frame {
                    let state = &snapshot.state;
                    if (frame.width(), frame.height()) != (state.frame_width, state.frame_height) {
                        mismatches += 1;
                    }
                }
            }
            mismatches
        });

        let pool = BufferPool::new(2);
        for sequence in 0..40u64 {
            let (w, h) = if sequence % 2 == 0 { (8, 8) } else { (16, 12) };
            let planes = rgb_to_yuv420_planes(&RgbImage::new(w, h));
            assert!(wait_until(|| pool.outstanding() < pool.capacity()));
            let lease = pool.try_lease().expect("free buffer");
            handle.submit(CameraFrame::new(planes, w, h, 0, sequence, lease));
        }
        handle.shutdown()?;
        done.store(true, Ordering::SeqCst);

        assert_eq!(reader.join().expect("reader thread"), 0);
        Ok(())
    }

    #[test]
    fn shutdown_releases_queued_frames() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let handle = pipeline(ScriptedBackend::default(), temp.path())?.spawn()?;
        let pool = BufferPool::new(4);
        for sequence in 0..4 {
            handle.submit(camera_frame(&pool, sequence));
        }
        handle.shutdown()?;
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.released(), 4);
        Ok(())
    }
}
