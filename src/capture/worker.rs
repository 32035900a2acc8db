use anyhow::{Context, Result};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{CaptureError, CaptureRequest, CaptureStatus, CaptureStore};
use crate::channel::{CancelToken, Latest, Mailbox};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug)]
pub struct CaptureSettings {
    /// Requests arriving sooner than this after the last started capture are dropped.
    pub min_interval: Duration,
    /// How long a Saved/Failed status stays visible before returning to Idle.
    pub status_reset: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::ZERO,
            status_reset: Duration::from_secs(3),
        }
    }
}

/// Background thread that persists capture requests one at a time.
///
/// Pending requests sit in a single-slot mailbox: a newer request replaces one
/// that has not started yet. A capture in progress is never interrupted except
/// by shutdown.
pub struct CaptureWorker {
    requests: Mailbox<CaptureRequest>,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    pub fn spawn(
        store: CaptureStore,
        settings: CaptureSettings,
        status: Latest<CaptureStatus>,
        cancel: CancelToken,
    ) -> Result<Self> {
        let requests = Mailbox::new();
        let worker_requests = requests.clone();
        let worker_cancel = cancel.clone();
        log::info!("capture directory: {}", store.capture_dir().display());
        let handle = thread::Builder::new()
            .name("camwatch-capture".to_string())
            .spawn(move || run(store, settings, worker_requests, status, worker_cancel))
            .context("failed to spawn capture worker")?;
        Ok(Self {
            requests,
            cancel,
            handle: Some(handle),
        })
    }

    /// Queue a capture. A request still waiting to start is superseded.
    pub fn request(&self, request: CaptureRequest) {
        if let Some(stale) = self.requests.post(request) {
            log::debug!(
                "capture of {} (frame {}) superseded before it started",
                stale.label,
                stale.sequence
            );
        }
    }

    /// Cancel outstanding work and wait for the thread to exit.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("capture worker panicked");
            }
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    store: CaptureStore,
    settings: CaptureSettings,
    requests: Mailbox<CaptureRequest>,
    status: Latest<CaptureStatus>,
    cancel: CancelToken,
) {
    let mut reset_at: Option<Instant> = None;
    let mut last_started: Option<Instant> = None;

    while !cancel.is_cancelled() {
        let wait = match reset_at {
            Some(at) => at.saturating_duration_since(Instant::now()).min(POLL_INTERVAL),
            None => POLL_INTERVAL,
        };

        let Some(request) = requests.recv_timeout(wait) else {
            if reset_at.is_some_and(|at| Instant::now() >= at) {
                status.publish(CaptureStatus::Idle);
                reset_at = None;
            }
            continue;
        };

        let now = Instant::now();
        if let Some(last) = last_started {
            if now.duration_since(last) < settings.min_interval {
                log::debug!("capture of {} throttled", request.label);
                continue;
            }
        }
        last_started = Some(now);

        status.publish(CaptureStatus::Capturing(request.label.clone()));
        match store.save(&request.image, &request.label, &cancel) {
            Ok(path) => {
                log::info!("saved {} capture to {}", request.label, path.display());
                status.publish(CaptureStatus::Saved(request.label.clone()));
            }
            Err(CaptureError::Cancelled) => {
                log::info!("capture of {} cancelled", request.label);
                status.publish(CaptureStatus::Idle);
                break;
            }
            Err(err) => {
                log::warn!("capture of {} failed: {}", request.label, err);
                status.publish(CaptureStatus::Failed(err.status_reason().to_string()));
            }
        }
        reset_at = Some(Instant::now() + settings.status_reset);
    }
    log::debug!("capture worker stopped");
}
