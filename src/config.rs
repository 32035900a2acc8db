use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{CaptureSettings, StorageLayout};
use crate::detect::{BoundingBox, DetectionEngine, ScriptedBackend};
use crate::ingest::SourceConfig;

const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_TARGET_CLASS: &str = "car";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_INTERNAL_DIR: &str = "camwatch-data";
const DEFAULT_STATUS_RESET_MS: u64 = 3_000;

#[derive(Debug, Deserialize, Default)]
struct CamwatchConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    selector: Option<SelectorConfigFile>,
    storage: Option<StorageConfigFile>,
    capture: Option<CaptureConfigFile>,
    overlay: Option<OverlayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    rotation_degrees: Option<u32>,
    pool_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_size: Option<u32>,
    stub_boxes: Option<Vec<BoundingBox>>,
}

#[derive(Debug, Deserialize, Default)]
struct SelectorConfigFile {
    target_class: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    external_root: Option<PathBuf>,
    scoped_pictures_dir: Option<PathBuf>,
    internal_dir: Option<PathBuf>,
    scoped_storage: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    min_interval_ms: Option<u64>,
    status_reset_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    surface_width: Option<u32>,
    surface_height: Option<u32>,
    preview_path: Option<PathBuf>,
}

/// Daemon configuration: optional file, then environment, then validation.
#[derive(Debug, Clone)]
pub struct CamwatchConfig {
    pub source: SourceConfig,
    pub detector: DetectorSettings,
    pub target_class: String,
    pub storage: StorageSettings,
    pub capture: CaptureSettings,
    pub overlay: OverlaySettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    /// Scripted boxes; no model files needed.
    Stub,
    /// ONNX model through tract (feature `backend-tract`).
    Tract,
}

impl DetectorKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "stub" => Ok(DetectorKind::Stub),
            "tract" => Ok(DetectorKind::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected 'stub' or 'tract'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_size: u32,
    /// Boxes the stub backend reports for every frame.
    pub stub_boxes: Vec<BoundingBox>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Root of removable/external storage; absent or missing means unmounted.
    pub external_root: Option<PathBuf>,
    pub scoped_pictures_dir: Option<PathBuf>,
    pub internal_dir: PathBuf,
    pub scoped_storage: bool,
}

impl StorageSettings {
    /// Resolve against the filesystem as it is right now.
    pub fn layout(&self) -> StorageLayout {
        let external_mounted = self
            .external_root
            .as_ref()
            .is_some_and(|root| root.is_dir());
        let scoped_pictures_dir = self.scoped_pictures_dir.clone().or_else(|| {
            self.external_root
                .as_ref()
                .map(|root| root.join("Pictures"))
        });
        StorageLayout {
            external_mounted,
            scoped_storage: self.scoped_storage,
            scoped_pictures_dir,
            legacy_external_root: self.external_root.clone(),
            internal_dir: self.internal_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverlaySettings {
    /// Preview surface size; zero means "same as the frame".
    pub surface_width: u32,
    pub surface_height: u32,
    /// Annotated JPEG rewritten after each detection change.
    pub preview_path: Option<PathBuf>,
}

impl CamwatchConfig {
    /// Load from the file named by `CAMWATCH_CONFIG`, if any.
    pub fn load() -> Result<Self> {
        let config_path = env_non_empty("CAMWATCH_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (JSON, or TOML by extension), then apply
    /// environment overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CamwatchConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let source = SourceConfig {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            width: source_file.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            rotation_degrees: source_file.rotation_degrees.unwrap_or(0),
            pool_size: source_file
                .pool_size
                .unwrap_or(crate::frame::DEFAULT_POOL_BUFFERS),
        };

        let detector_file = file.detector.unwrap_or_default();
        let backend = match detector_file.backend.as_deref() {
            Some(name) => DetectorKind::parse(name)?,
            None => DetectorKind::Stub,
        };
        let detector = DetectorSettings {
            backend,
            model_path: detector_file.model_path,
            labels_path: detector_file.labels_path,
            input_size: detector_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            stub_boxes: detector_file.stub_boxes.unwrap_or_else(default_stub_boxes),
        };

        let target_class = file
            .selector
            .and_then(|selector| selector.target_class)
            .unwrap_or_else(|| DEFAULT_TARGET_CLASS.to_string());

        let storage_file = file.storage.unwrap_or_default();
        let storage = StorageSettings {
            external_root: storage_file.external_root,
            scoped_pictures_dir: storage_file.scoped_pictures_dir,
            internal_dir: storage_file
                .internal_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INTERNAL_DIR)),
            scoped_storage: storage_file.scoped_storage.unwrap_or(true),
        };

        let capture_file = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            min_interval: Duration::from_millis(capture_file.min_interval_ms.unwrap_or(0)),
            status_reset: Duration::from_millis(
                capture_file
                    .status_reset_ms
                    .unwrap_or(DEFAULT_STATUS_RESET_MS),
            ),
        };

        let overlay_file = file.overlay.unwrap_or_default();
        let overlay = OverlaySettings {
            surface_width: overlay_file.surface_width.unwrap_or(0),
            surface_height: overlay_file.surface_height.unwrap_or(0),
            preview_path: overlay_file.preview_path,
        };

        Ok(Self {
            source,
            detector,
            target_class,
            storage,
            capture,
            overlay,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_non_empty("CAMWATCH_SOURCE") {
            self.source.url = url;
        }
        if let Some(class) = env_non_empty("CAMWATCH_TARGET_CLASS") {
            self.target_class = class;
        }
        if let Some(backend) = env_non_empty("CAMWATCH_BACKEND") {
            self.detector.backend = DetectorKind::parse(&backend)?;
        }
        if let Some(path) = env_non_empty("CAMWATCH_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_non_empty("CAMWATCH_LABELS_PATH") {
            self.detector.labels_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = env_non_empty("CAMWATCH_INTERNAL_DIR") {
            self.storage.internal_dir = PathBuf::from(dir);
        }
        if let Some(root) = env_non_empty("CAMWATCH_EXTERNAL_ROOT") {
            self.storage.external_root = Some(PathBuf::from(root));
        }
        if let Some(interval) = env_non_empty("CAMWATCH_MIN_CAPTURE_INTERVAL_MS") {
            let millis: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("CAMWATCH_MIN_CAPTURE_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.capture.min_interval = Duration::from_millis(millis);
        }
        Ok(())
    }

    /// Check invariants. Also run by the daemon after CLI overrides.
    pub fn validate(&mut self) -> Result<()> {
        self.target_class = self.target_class.trim().to_string();
        if self.target_class.is_empty() {
            return Err(anyhow!("target class cannot be empty"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be at least 1"));
        }
        if !matches!(self.source.rotation_degrees, 0 | 90 | 180 | 270) {
            return Err(anyhow!(
                "rotation_degrees must be 0, 90, 180 or 270 (got {})",
                self.source.rotation_degrees
            ));
        }
        if self.source.pool_size == 0 {
            return Err(anyhow!("source pool_size must be at least 1"));
        }
        if self.detector.backend == DetectorKind::Tract {
            if self.detector.model_path.is_none() {
                return Err(anyhow!("tract backend requires detector.model_path"));
            }
            if self.detector.labels_path.is_none() {
                return Err(anyhow!("tract backend requires detector.labels_path"));
            }
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        Ok(())
    }
}

impl DetectorSettings {
    /// Instantiate the configured backend. Model files load later, in `setup`.
    pub fn build_engine(&self) -> Result<DetectionEngine> {
        match self.backend {
            DetectorKind::Stub => Ok(DetectionEngine::new(ScriptedBackend::new(
                self.stub_boxes.clone(),
            ))),
            DetectorKind::Tract => self.build_tract(),
        }
    }

    #[cfg(feature = "backend-tract")]
    fn build_tract(&self) -> Result<DetectionEngine> {
        let model_path = self
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("tract backend requires detector.model_path"))?;
        let labels_path = self
            .labels_path
            .as_ref()
            .ok_or_else(|| anyhow!("tract backend requires detector.labels_path"))?;
        Ok(DetectionEngine::new(crate::detect::TractBackend::new(
            model_path,
            labels_path,
            self.input_size,
        )))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn build_tract(&self) -> Result<DetectionEngine> {
        Err(anyhow!(
            "tract backend requested but this build lacks the 'backend-tract' feature"
        ))
    }
}

fn default_stub_boxes() -> Vec<BoundingBox> {
    vec![BoundingBox::new(DEFAULT_TARGET_CLASS, 0.81, 0.25, 0.3, 0.75, 0.8)]
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<CamwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
