//! Frame ownership.
//!
//! - `CameraFrame`: multi-plane YUV handle as the camera delivers it. It holds a
//!   `PoolLease`; dropping the frame hands the buffer back to its `BufferPool`.
//!   Since the lease is released in `Drop`, every exit path releases it exactly once.
//! - `BufferPool`: bounded pool of camera buffers. Once every buffer is leased
//!   the camera cannot deliver new frames until one is released.
//! - `Frame`: decoded RGB image plus rotation hint, owned by one detection cycle.

use image::RgbImage;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default number of buffers a camera may have in flight.
pub const DEFAULT_POOL_BUFFERS: usize = 4;

// ----------------------------------------------------------------------------
// BufferPool / PoolLease
// ----------------------------------------------------------------------------

/// Bounded buffer pool shared between a camera and its consumers.
#[derive(Clone, Debug)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    capacity: usize,
    outstanding: AtomicUsize,
    released: AtomicU64,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity: capacity.max(1),
                outstanding: AtomicUsize::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Lease a buffer. Returns `None` when the pool is exhausted.
    pub fn try_lease(&self) -> Option<PoolLease> {
        let mut current = self.inner.outstanding.load(Ordering::Acquire);
        loop {
            if current >= self.inner.capacity {
                return None;
            }
            match self.inner.outstanding.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(PoolLease {
                        pool: Arc::clone(&self.inner),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Buffers currently leased.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Total releases since the pool was created.
    pub fn released(&self) -> u64 {
        self.inner.released.load(Ordering::Acquire)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_BUFFERS)
    }
}

/// One leased camera buffer. Not `Clone`: a lease is released exactly once.
#[derive(Debug)]
pub struct PoolLease {
    pool: Arc<PoolInner>,
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.pool.released.fetch_add(1, Ordering::AcqRel);
    }
}

// ----------------------------------------------------------------------------
// CameraFrame
// ----------------------------------------------------------------------------

/// One image plane with the strides the camera reported.
#[derive(Clone, Debug)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes between the starts of two consecutive rows.
    pub row_stride: usize,
    /// Bytes between two consecutive samples in a row.
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }
}

/// Multi-plane YUV 4:2:0 camera frame (Y, U, V plane order).
///
/// There is no `Clone`: the frame owns its pool lease.
#[derive(Debug)]
pub struct CameraFrame {
    planes: [Plane; 3],
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation needed to display the frame upright.
    pub rotation_degrees: u32,
    /// Monotonic frame number assigned by the source.
    pub sequence: u64,
    _lease: PoolLease,
}

impl CameraFrame {
    pub fn new(
        planes: [Plane; 3],
        width: u32,
        height: u32,
        rotation_degrees: u32,
        sequence: u64,
        lease: PoolLease,
    ) -> Self {
        Self {
            planes,
            width,
            height,
            rotation_degrees,
            sequence,
            _lease: lease,
        }
    }

    /// Planes in Y, U, V order.
    pub fn planes(&self) -> &[Plane; 3] {
        &self.planes
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Decoded RGB frame for one detection cycle.
///
/// Pixels sit behind an `Arc` so a capture request can hold them without a copy;
/// the image is never mutated after decode.
#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
    pub rotation_degrees: u32,
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, rotation_degrees: u32, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            rotation_degrees,
            sequence,
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn shared_image(&self) -> Arc<RgbImage> {
        Arc::clone(&self.image)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_enforces_capacity() {
        let pool = BufferPool::new(2);
        let a = pool.try_lease().expect("first lease");
        let _b = pool.try_lease().expect("second lease");
        assert!(pool.try_lease().is_none());
        assert_eq!(pool.outstanding(), 2);

        drop(a);
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(pool.released(), 1);
        assert!(pool.try_lease().is_some());
    }

    #[test]
    fn dropping_camera_frame_releases_once() {
        let pool = BufferPool::new(1);
        let lease = pool.try_lease().unwrap();
        let planes = [
            Plane::new(vec![0; 4], 2, 1),
            Plane::new(vec![128], 1, 1),
            Plane::new(vec![128], 1, 1),
        ];
        let frame = CameraFrame::new(planes, 2, 2, 0, 1, lease);
        assert_eq!(pool.outstanding(), 1);
        drop(frame);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.released(), 1);
    }

    #[test]
    fn frame_reports_dimensions() {
        let frame = Frame::new(RgbImage::new(4, 3), 0, 7);
        assert_eq!((frame.width(), frame.height()), (4, 3));
        assert_eq!(frame.sequence, 7);
    }
}
