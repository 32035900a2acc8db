//! Cross-thread hand-off primitives.
//!
//! - `Mailbox`: single-slot queue where a new post displaces the waiting value.
//!   This is the keep-only-latest backpressure used between the camera and the
//!   frame loop, and between the frame loop and the capture worker.
//! - `Latest`: last-value-wins observable used for telemetry channels.
//! - `CancelToken`: cooperative cancellation shared with worker threads.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Single-slot, overwrite-on-post channel.
///
/// Cloning yields another handle to the same slot.
pub struct Mailbox<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Self { tx, rx }
    }

    /// Post a value. If a value was still waiting it is evicted and returned,
    /// so the caller decides how to dispose of it.
    pub fn post(&self, value: T) -> Option<T> {
        let mut displaced = None;
        let mut pending = value;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return displaced,
                Err(TrySendError::Full(value)) => {
                    pending = value;
                    if let Ok(stale) = self.rx.try_recv() {
                        // Racing producers can evict twice; the older eviction is dropped here.
                        drop(displaced.replace(stale));
                    }
                }
                // Both ends live in `self`, so the channel cannot disconnect.
                Err(TrySendError::Disconnected(value)) => return Some(value),
            }
        }
    }

    /// Wait up to `timeout` for a value.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Some(value),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take the waiting value, if any, without blocking.
    pub fn try_take(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Last-value-wins observable.
///
/// Writers overwrite; readers see the most recent value. A version counter lets
/// a reader tell whether anything was published since it last looked.
pub struct Latest<T> {
    inner: Arc<LatestInner<T>>,
}

struct LatestInner<T> {
    value: Mutex<T>,
    version: AtomicU64,
}

impl<T> Clone for Latest<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Latest<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(LatestInner {
                value: Mutex::new(initial),
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Publish a value. Fire-and-forget; never blocks on readers.
    pub fn publish(&self, value: T) {
        let mut guard = self
            .inner
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = value;
        self.inner.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.inner
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of publishes so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Returns the current value if something was published after `seen`,
    /// updating `seen` to the observed version.
    pub fn changed_since(&self, seen: &mut u64) -> Option<T> {
        let version = self.version();
        if version == *seen {
            return None;
        }
        *seen = version;
        Some(self.get())
    }
}

/// Cooperative cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
