use std::thread;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};

use camwatch::capture::{CaptureStatus, CAPTURE_DIR_NAME};
use camwatch::ingest::rgb_to_yuv420_planes;
use camwatch::{
    BoundingBox, BufferPool, CameraFrame, CaptureSettings, CaptureStore, DetectionEngine,
    DetectionSelector, FixedSpace, Pipeline, PipelineHandle, ScriptedBackend, StorageLayout,
};

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn camera_frame(pool: &BufferPool, sequence: u64) -> CameraFrame {
    let image = RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 128]));
    let lease = pool.try_lease().expect("free camera buffer");
    CameraFrame::new(rgb_to_yuv420_planes(&image), 64, 48, 0, sequence, lease)
}

fn spawn(backend: ScriptedBackend, root: &std::path::Path) -> PipelineHandle {
    Pipeline::new(
        DetectionEngine::new(backend),
        DetectionSelector::new("car").expect("selector"),
        CaptureStore::new(StorageLayout::internal(root), FixedSpace(u64::MAX)),
        CaptureSettings {
            min_interval: Duration::ZERO,
            status_reset: Duration::from_millis(500),
        },
    )
    .spawn()
    .expect("pipeline")
}

fn capture_files(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    let dir = root.join(CAPTURE_DIR_NAME);
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn car_detection_updates_telemetry_and_saves_one_capture() {
    let root = tempfile::tempdir().expect("temp root");
    let backend = ScriptedBackend::new(vec![BoundingBox::new("car", 0.81, 0.25, 0.25, 0.75, 0.75)]);
    let calls = backend.call_counter();
    let handle = spawn(backend, root.path());
    let pool = BufferPool::new(2);

    handle.submit(camera_frame(&pool, 1));
    assert!(wait_until(|| handle.stats().frames_processed == 1));

    let telemetry = handle.telemetry();
    assert_eq!(telemetry.detection_text(), "Car detected (81%)");
    assert_eq!(telemetry.detection_color(), "#4CAF50");
    let boxes = telemetry.detection_boxes();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].color.to_hex(), "#4CAF50");
    assert_eq!(handle.stats().captures_requested, 1);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    assert!(wait_until(|| telemetry.capture_status.get()
        == CaptureStatus::Saved("car".into())));
    assert_eq!(telemetry.capture_status_text(), "car image saved!");
    assert!(wait_until(|| telemetry.capture_status.get().is_idle()));

    let files = capture_files(root.path());
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("car_") && name.ends_with(".jpg"), "{name}");
    let saved = image::open(&files[0]).expect("capture decodes").to_rgb8();
    assert_eq!(saved.dimensions(), (64, 48));

    handle.shutdown().expect("shutdown");
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.released(), 1);
}

#[test]
fn non_target_detection_requests_no_capture() {
    let root = tempfile::tempdir().expect("temp root");
    let backend = ScriptedBackend::new(vec![BoundingBox::new("person", 0.9, 0.1, 0.1, 0.3, 0.9)]);
    let handle = spawn(backend, root.path());
    let pool = BufferPool::new(1);

    handle.submit(camera_frame(&pool, 1));
    assert!(wait_until(|| handle.stats().frames_processed == 1));

    let telemetry = handle.telemetry();
    assert_eq!(telemetry.detection_text(), "No car detected");
    assert_eq!(telemetry.detection_color(), "#FFFFFF");
    assert!(telemetry.detection_boxes().is_empty());
    assert_eq!(handle.stats().captures_requested, 0);
    assert!(telemetry.capture_status.get().is_idle());

    handle.shutdown().expect("shutdown");
    assert!(capture_files(root.path()).is_empty());
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn every_camera_buffer_is_released_exactly_once() {
    let root = tempfile::tempdir().expect("temp root");
    let handle = spawn(ScriptedBackend::default(), root.path());
    let pool = BufferPool::new(3);

    let mut submitted = 0u64;
    for sequence in 0..30 {
        if wait_until(|| pool.outstanding() < pool.capacity()) {
            handle.submit(camera_frame(&pool, sequence));
            submitted += 1;
        }
    }
    handle.shutdown().expect("shutdown");

    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.released(), submitted);
}

#[test]
fn storage_failure_reports_status_and_keeps_running() {
    let root = tempfile::tempdir().expect("temp root");
    let blocker = root.path().join("not-a-dir");
    std::fs::write(&blocker, b"occupied").expect("write blocker");

    let handle = Pipeline::new(
        DetectionEngine::new(ScriptedBackend::new(vec![BoundingBox::new(
            "car", 0.7, 0.1, 0.1, 0.4, 0.4,
        )])),
        DetectionSelector::new("car").expect("selector"),
        CaptureStore::new(StorageLayout::internal(&blocker), FixedSpace(u64::MAX)),
        CaptureSettings::default(),
    )
    .spawn()
    .expect("pipeline");
    let pool = BufferPool::new(2);

    handle.submit(camera_frame(&pool, 1));
    let telemetry = handle.telemetry();
    assert!(wait_until(|| telemetry.capture_status_text() == "Storage not available"));

    handle.submit(camera_frame(&pool, 2));
    assert!(wait_until(|| handle.stats().frames_processed == 2));
    assert!(handle.is_running());
    handle.shutdown().expect("shutdown");
}
