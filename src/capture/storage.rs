//! Capture persistence.
//!
//! Resolves the capture directory, checks free space and writability, writes
//! the JPEG through a `.part` sibling and verifies the result before reporting
//! success. A failed capture never leaves a file at its final path.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use image::RgbImage;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::CaptureError;
use crate::channel::CancelToken;
use crate::codec::{write_jpeg, CAPTURE_JPEG_QUALITY};

/// Directory name created under the selected storage root.
pub const CAPTURE_DIR_NAME: &str = "YOLOCaptures";

/// Free space must be at least this multiple of the raw pixel buffer.
pub const SPACE_SAFETY_FACTOR: u64 = 2;

const WRITE_PROBE_NAME: &str = ".camwatch-write-probe";

// ----------------------------------------------------------------------------
// Directory resolution
// ----------------------------------------------------------------------------

/// Storage roots the capture directory may live under.
#[derive(Clone, Debug)]
pub struct StorageLayout {
    pub external_mounted: bool,
    /// Whether the platform supports app-scoped external storage.
    pub scoped_storage: bool,
    pub scoped_pictures_dir: Option<PathBuf>,
    pub legacy_external_root: Option<PathBuf>,
    pub internal_dir: PathBuf,
}

impl StorageLayout {
    /// Internal storage only.
    pub fn internal(dir: impl Into<PathBuf>) -> Self {
        Self {
            external_mounted: false,
            scoped_storage: false,
            scoped_pictures_dir: None,
            legacy_external_root: None,
            internal_dir: dir.into(),
        }
    }

    /// Storage root the captures go under, before `CAPTURE_DIR_NAME` is appended.
    ///
    /// Scoped external pictures when external storage is mounted and scoped
    /// storage is supported; legacy external root when mounted without scoped
    /// support; internal storage otherwise.
    pub fn storage_root(&self) -> &Path {
        if self.external_mounted {
            if self.scoped_storage {
                if let Some(dir) = &self.scoped_pictures_dir {
                    return dir;
                }
            } else if let Some(root) = &self.legacy_external_root {
                return root;
            }
        }
        &self.internal_dir
    }

    pub fn capture_dir(&self) -> PathBuf {
        self.storage_root().join(CAPTURE_DIR_NAME)
    }
}

// ----------------------------------------------------------------------------
// Free space
// ----------------------------------------------------------------------------

/// Reports free bytes on the filesystem holding a directory.
pub trait SpaceProbe: Send {
    fn available_bytes(&self, dir: &Path) -> io::Result<u64>;
}

/// `statvfs`-backed probe.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilesystemSpace;

impl SpaceProbe for FilesystemSpace {
    #[cfg(unix)]
    fn available_bytes(&self, dir: &Path) -> io::Result<u64> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(dir.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL byte"))?;
        // SAFETY: `stat` is a plain C struct that statvfs fully initializes on success,
        // and `c_path` outlives the call.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        #[allow(clippy::unnecessary_cast)]
        Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
    }

    #[cfg(not(unix))]
    fn available_bytes(&self, _dir: &Path) -> io::Result<u64> {
        log::debug!("free space unknown on this platform; skipping space guard");
        Ok(u64::MAX)
    }
}

/// Probe that always reports the same number of free bytes.
#[derive(Clone, Copy, Debug)]
pub struct FixedSpace(pub u64);

impl SpaceProbe for FixedSpace {
    fn available_bytes(&self, _dir: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// Proceed iff `available >= SPACE_SAFETY_FACTOR * buffer_bytes`.
pub fn ensure_free_space(buffer_bytes: u64, available: u64) -> Result<(), CaptureError> {
    let required = buffer_bytes.saturating_mul(SPACE_SAFETY_FACTOR);
    if available < required {
        return Err(CaptureError::InsufficientSpace {
            available,
            required,
        });
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// File naming
// ----------------------------------------------------------------------------

/// `<label>_<YYYYMMDD_HHmmss>.jpg`.
///
/// Two captures of one label within the same second get the same name and the
/// later one overwrites the earlier. Path separators in the label become `_`.
pub fn capture_file_name(label: &str, at: &NaiveDateTime) -> String {
    let label: String = label
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("{}_{}.jpg", label, at.format("%Y%m%d_%H%M%S"))
}

// ----------------------------------------------------------------------------
// CaptureStore
// ----------------------------------------------------------------------------

pub struct CaptureStore {
    layout: StorageLayout,
    probe: Box<dyn SpaceProbe>,
}

impl CaptureStore {
    pub fn new<P: SpaceProbe + 'static>(layout: StorageLayout, probe: P) -> Self {
        Self {
            layout,
            probe: Box::new(probe),
        }
    }

    pub fn capture_dir(&self) -> PathBuf {
        self.layout.capture_dir()
    }

    /// Create the capture directory if needed and confirm it accepts writes.
    pub fn prepare_dir(&self) -> Result<PathBuf, CaptureError> {
        let dir = self.capture_dir();
        let unavailable = |reason: String| CaptureError::StorageUnavailable {
            dir: dir.clone(),
            reason,
        };
        fs::create_dir_all(&dir).map_err(|e| unavailable(format!("create failed: {e}")))?;
        if !dir.is_dir() {
            return Err(unavailable("not a directory".to_string()));
        }

        let probe = dir.join(WRITE_PROBE_NAME);
        File::create(&probe).map_err(|e| unavailable(format!("not writable: {e}")))?;
        if let Err(err) = fs::remove_file(&probe) {
            log::debug!("could not remove write probe {}: {}", probe.display(), err);
        }
        Ok(dir)
    }

    /// Persist `image` for `label`, stamped with the current local time.
    pub fn save(
        &self,
        image: &RgbImage,
        label: &str,
        cancel: &CancelToken,
    ) -> Result<PathBuf, CaptureError> {
        self.save_at(image, label, Local::now().naive_local(), cancel)
    }

    /// Persist `image` for `label` with an explicit timestamp.
    pub fn save_at(
        &self,
        image: &RgbImage,
        label: &str,
        at: NaiveDateTime,
        cancel: &CancelToken,
    ) -> Result<PathBuf, CaptureError> {
        check_cancel(cancel)?;
        let dir = self.prepare_dir()?;

        let available = self
            .probe
            .available_bytes(&dir)
            .map_err(|e| CaptureError::StorageUnavailable {
                dir: dir.clone(),
                reason: format!("free space query failed: {e}"),
            })?;
        ensure_free_space(image.as_raw().len() as u64, available)?;

        let path = dir.join(capture_file_name(label, &at));
        let part = part_path(&path);

        check_cancel(cancel)?;
        if let Err(err) = encode_to(&part, image) {
            discard(&part);
            return Err(CaptureError::EncodeFailed(format!("{err:#}")));
        }

        if let Err(err) = check_cancel(cancel) {
            discard(&part);
            return Err(err);
        }
        if let Err(err) = fs::rename(&part, &path) {
            discard(&part);
            return Err(CaptureError::EncodeFailed(format!("rename failed: {err}")));
        }

        let written = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            discard(&path);
            return Err(CaptureError::VerificationFailed(path));
        }
        Ok(path)
    }

    /// Saved captures, sorted by file name.
    pub fn list_captures(&self) -> Result<Vec<PathBuf>> {
        let dir = self.capture_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed to read capture dir {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("jpg") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn encode_to(path: &Path, image: &RgbImage) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_jpeg(&mut writer, image, CAPTURE_JPEG_QUALITY)?;
    writer.flush().context("flush capture")?;
    writer
        .into_inner()
        .map_err(|e| e.into_error())
        .context("flush capture")?
        .sync_all()
        .context("sync capture")?;
    Ok(())
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            log::warn!("failed to remove {}: {}", path.display(), err);
        }
    }
}

fn check_cancel(cancel: &CancelToken) -> Result<(), CaptureError> {
    if cancel.is_cancelled() {
        Err(CaptureError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::Rgb;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(12, 4, 5)
            .unwrap()
    }

    fn test_image() -> RgbImage {
        RgbImage::from_fn(32, 16, |x, y| Rgb([(x * 8) as u8, (y * 16) as u8, 90]))
    }

    #[test]
    fn resolution_prefers_scoped_then_legacy_then_internal() {
        let mut layout = StorageLayout {
            external_mounted: true,
            scoped_storage: true,
            scoped_pictures_dir: Some(PathBuf::from("/ext/app/Pictures")),
            legacy_external_root: Some(PathBuf::from("/ext")),
            internal_dir: PathBuf::from("/data/app"),
        };
        assert_eq!(layout.capture_dir(), PathBuf::from("/ext/app/Pictures/YOLOCaptures"));

        layout.scoped_storage = false;
        assert_eq!(layout.capture_dir(), PathBuf::from("/ext/YOLOCaptures"));

        layout.external_mounted = false;
        assert_eq!(layout.capture_dir(), PathBuf::from("/data/app/YOLOCaptures"));
    }

    #[test]
    fn free_space_guard_boundary() {
        let buffer = 1_000;
        assert!(ensure_free_space(buffer, 2_000).is_ok());
        assert!(matches!(
            ensure_free_space(buffer, 1_999),
            Err(CaptureError::InsufficientSpace {
                available: 1_999,
                required: 2_000
            })
        ));
    }

    #[test]
    fn same_second_captures_share_a_name() {
        let at = noon();
        let first = capture_file_name("car", &at);
        let second = capture_file_name("car", &at);
        assert_eq!(first, "car_20240309_120405.jpg");
        assert_eq!(first, second);
    }

    #[test]
    fn label_separators_are_replaced() {
        assert_eq!(capture_file_name("a/b", &noon()), "a_b_20240309_120405.jpg");
    }

    #[test]
    fn saved_capture_decodes() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CaptureStore::new(StorageLayout::internal(temp.path()), FixedSpace(u64::MAX));
        let path = store.save_at(&test_image(), "car", noon(), &CancelToken::new())?;

        assert_eq!(path, temp.path().join("YOLOCaptures/car_20240309_120405.jpg"));
        assert!(fs::metadata(&path)?.len() > 0);
        let decoded = image::open(&path)?.to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 16));
        assert_eq!(store.list_captures()?, vec![path]);
        Ok(())
    }

    #[test]
    fn same_second_capture_overwrites() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CaptureStore::new(StorageLayout::internal(temp.path()), FixedSpace(u64::MAX));
        let cancel = CancelToken::new();
        let first = store.save_at(&test_image(), "car", noon(), &cancel)?;
        let second = store.save_at(&RgbImage::new(8, 8), "car", noon(), &cancel)?;
        assert_eq!(first, second);
        assert_eq!(store.list_captures()?.len(), 1);
        assert_eq!(image::open(&second)?.to_rgb8().dimensions(), (8, 8));
        Ok(())
    }

    #[test]
    fn insufficient_space_writes_nothing() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let image = test_image();
        let needed = image.as_raw().len() as u64 * 2;
        let store = CaptureStore::new(StorageLayout::internal(temp.path()), FixedSpace(needed - 1));

        let err = store
            .save_at(&image, "car", noon(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, CaptureError::InsufficientSpace { .. }));
        assert!(store.list_captures()?.is_empty());
        assert_eq!(fs::read_dir(store.capture_dir())?.count(), 0);
        Ok(())
    }

    #[test]
    fn exact_double_space_proceeds() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let image = test_image();
        let needed = image.as_raw().len() as u64 * 2;
        let store = CaptureStore::new(StorageLayout::internal(temp.path()), FixedSpace(needed));
        store.save_at(&image, "car", noon(), &CancelToken::new())?;
        Ok(())
    }

    #[test]
    fn storage_root_that_is_a_file_is_unavailable() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("blocked");
        fs::write(&blocker, b"file, not dir")?;
        let store = CaptureStore::new(StorageLayout::internal(&blocker), FixedSpace(u64::MAX));

        let err = store
            .save_at(&test_image(), "car", noon(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, CaptureError::StorageUnavailable { .. }));
        Ok(())
    }

    #[test]
    fn cancelled_capture_touches_nothing() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CaptureStore::new(StorageLayout::internal(temp.path()), FixedSpace(u64::MAX));
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = store.save_at(&test_image(), "car", noon(), &cancel).unwrap_err();
        assert!(matches!(err, CaptureError::Cancelled));
        assert!(!store.capture_dir().exists());
        Ok(())
    }

    #[test]
    fn encode_failure_leaves_no_part_file() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CaptureStore::new(StorageLayout::internal(temp.path()), FixedSpace(u64::MAX));
        // Zero-sized images cannot be JPEG encoded.
        let err = store
            .save_at(&RgbImage::new(0, 0), "car", noon(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, CaptureError::EncodeFailed(_)));
        assert_eq!(fs::read_dir(store.capture_dir())?.count(), 0);
        Ok(())
    }

    #[test]
    fn real_filesystem_reports_space() -> Result<()> {
        let temp = tempfile::tempdir()?;
        assert!(FilesystemSpace.available_bytes(temp.path())? > 0);
        Ok(())
    }
}
