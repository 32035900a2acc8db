//! camwatchd - headless camera detection daemon.
//!
//! This daemon:
//! 1. Pulls frames from the configured source (synthetic camera or image directory)
//! 2. Runs them through the detection pipeline, keeping only the newest frame
//! 3. Logs detection and capture status changes
//! 4. Optionally rewrites an annotated preview JPEG after each detection change
//!
//! Qualifying frames are saved under `<storage>/YOLOCaptures`.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use image::imageops;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camwatch::codec::{write_jpeg, CAPTURE_JPEG_QUALITY};
use camwatch::config::OverlaySettings;
use camwatch::ingest::frame_interval;
use camwatch::{
    CamwatchConfig, CameraSource, Canvas, CaptureStore, DetectionSelector, DetectionSnapshot,
    DetectorKind, FilesystemSpace, OverlayMapper, Pipeline, PipelineHandle, RasterCanvas,
    Telemetry,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Detect a target class in camera frames and save matching frames"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "CAMWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source: stub://<name> or a directory of images.
    #[arg(long)]
    source: Option<String>,

    /// Class to watch for, e.g. "car".
    #[arg(long)]
    target_class: Option<String>,

    /// Detector backend: stub or tract.
    #[arg(long)]
    backend: Option<String>,

    #[arg(long)]
    model_path: Option<PathBuf>,

    #[arg(long)]
    labels_path: Option<PathBuf>,

    /// Write an annotated preview JPEG here.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Stop after submitting this many frames (0 = run until Ctrl-C).
    #[arg(long, default_value = "0")]
    max_frames: u64,

    /// Print saved captures and exit.
    #[arg(long)]
    list_captures: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = CamwatchConfig::load_from(args.config.as_deref())?;
    apply_args(&mut cfg, &args)?;
    cfg.validate()?;

    let store = CaptureStore::new(cfg.storage.layout(), FilesystemSpace);
    if args.list_captures {
        for path in store.list_captures()? {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let mut source = CameraSource::new(&cfg.source)?;
    source.connect()?;

    let engine = cfg.detector.build_engine()?;
    let selector = DetectionSelector::new(cfg.target_class.clone())?;
    let handle = Pipeline::new(engine, selector, store, cfg.capture).spawn()?;
    log::info!(
        "camwatchd running: source={} target={} fps={}",
        cfg.source.url,
        cfg.target_class,
        cfg.source.target_fps
    );

    let mut presenter = Presenter::new(handle.telemetry().clone(), &cfg.overlay);
    let result = run(&args, &cfg, &mut source, &handle, &mut presenter, &running);

    log::info!("shutting down");
    let stats = handle.stats();
    handle.shutdown()?;
    presenter.poll();
    log::info!(
        "frames submitted={} processed={} displaced={} captures requested={}",
        stats.frames_submitted,
        stats.frames_processed,
        stats.frames_displaced,
        stats.captures_requested
    );
    result
}

fn apply_args(cfg: &mut CamwatchConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        cfg.source.url = source.clone();
    }
    if let Some(class) = &args.target_class {
        cfg.target_class = class.clone();
    }
    if let Some(backend) = &args.backend {
        cfg.detector.backend = DetectorKind::parse(backend)?;
    }
    if let Some(path) = &args.model_path {
        cfg.detector.model_path = Some(path.clone());
    }
    if let Some(path) = &args.labels_path {
        cfg.detector.labels_path = Some(path.clone());
    }
    if let Some(path) = &args.preview {
        cfg.overlay.preview_path = Some(path.clone());
    }
    Ok(())
}

fn run(
    args: &Args,
    cfg: &CamwatchConfig,
    source: &mut CameraSource,
    handle: &PipelineHandle,
    presenter: &mut Presenter,
    running: &AtomicBool,
) -> Result<()> {
    let interval = frame_interval(cfg.source.target_fps);
    let mut submitted = 0u64;
    let mut last_health_log = Instant::now();

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        match source.next_frame() {
            Ok(Some(frame)) => {
                handle.submit(frame);
                submitted += 1;
            }
            Ok(None) => log::debug!(
                "camera starved: all {} buffers in use",
                source.pool().capacity()
            ),
            Err(err) => log::warn!("frame source error: {:#}", err),
        }

        presenter.poll();

        if !handle.is_running() {
            return Err(anyhow!("frame loop exited unexpectedly"));
        }
        if args.max_frames > 0 && submitted >= args.max_frames {
            log::info!("submitted {} frames, stopping", submitted);
            break;
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let source_stats = source.stats();
            let stats = handle.stats();
            log::info!(
                "source health={} frames={} dropped={} source={} | processed={} conversion_failures={} detection_failures={}",
                source.is_healthy(),
                source_stats.frames_captured,
                source_stats.frames_dropped,
                source_stats.source,
                stats.frames_processed,
                stats.conversion_failures,
                stats.detection_failures
            );
            last_health_log = Instant::now();
        }

        std::thread::sleep(interval.saturating_sub(started.elapsed()));
    }
    Ok(())
}

/// Headless stand-in for a UI: logs telemetry changes and draws the preview.
struct Presenter {
    telemetry: Telemetry,
    detection_seen: u64,
    status_seen: u64,
    last_text: String,
    mapper: OverlayMapper,
    overlay: OverlaySettings,
}

impl Presenter {
    fn new(telemetry: Telemetry, overlay: &OverlaySettings) -> Self {
        let mut mapper = OverlayMapper::new();
        if overlay.surface_width > 0 && overlay.surface_height > 0 {
            mapper.set_surface_size(overlay.surface_width, overlay.surface_height);
        }
        Self {
            telemetry,
            detection_seen: 0,
            status_seen: 0,
            last_text: String::new(),
            mapper,
            overlay: overlay.clone(),
        }
    }

    fn poll(&mut self) {
        if let Some(snapshot) = self.telemetry.detection.changed_since(&mut self.detection_seen) {
            let state = &snapshot.state;
            if state.text != self.last_text {
                log::info!("{} [{}]", state.text, state.color);
                self.last_text = state.text.clone();
            }
            if let Err(err) = self.write_preview(&snapshot) {
                log::warn!("preview not written: {:#}", err);
            }
        }
        if let Some(status) = self.telemetry.capture_status.changed_since(&mut self.status_seen) {
            if !status.is_idle() {
                log::info!("capture: {}", status);
            }
        }
    }

    fn write_preview(&mut self, snapshot: &DetectionSnapshot) -> Result<()> {
        let Some(path) = self.overlay.preview_path.as_ref() else {
            return Ok(());
        };
        let Some(frame) = snapshot.frame.as_ref() else {
            return Ok(());
        };

        let base = if self.overlay.surface_width > 0 && self.overlay.surface_height > 0 {
            imageops::resize(
                frame.image(),
                self.overlay.surface_width,
                self.overlay.surface_height,
                imageops::FilterType::Triangle,
            )
        } else {
            self.mapper.set_surface_size(frame.width(), frame.height());
            frame.image().clone()
        };

        let mut canvas = RasterCanvas::new(base);
        let ops = self.mapper.render_state(&snapshot.state, canvas.font());
        canvas.draw_ops(&ops);

        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create preview {}", path.display()))?;
        write_jpeg(
            std::io::BufWriter::new(file),
            canvas.image(),
            CAPTURE_JPEG_QUALITY,
        )
    }
}
