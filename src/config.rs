use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_VEHICLE_CLASSES};
use crate::frame::FrameLimits;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_MAX_CONNECTIONS: usize = 8;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_COORDINATE_DIR: &str = "adminResources/parking-coordinate";
const DEFAULT_BACKEND: &str = "tract";
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServiceConfigFile {
    api: Option<ApiConfigFile>,
    detector: Option<DetectorConfigFile>,
    storage: Option<StorageConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
    max_body_bytes: Option<usize>,
    max_connections: Option<usize>,
    request_timeout_secs: Option<u64>,
    max_image_width: Option<u32>,
    max_image_height: Option<u32>,
    max_image_alloc_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    vehicle_classes: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StorageConfigFile {
    coordinate_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_addr: String,
    pub max_body_bytes: usize,
    /// Connections handled at once; extra ones get 503.
    pub max_connections: usize,
    /// Deadline for receiving one complete request.
    pub request_timeout: Duration,
    pub frame_limits: FrameLimits,
    pub detector: DetectorSettings,
    pub coordinate_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Stub,
    Tract,
}

impl BackendKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: BackendKind,
    pub model_path: PathBuf,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub vehicle_classes: Vec<u32>,
}

impl ServiceConfig {
    /// Load from `PARKING_CONFIG` (TOML or JSON) and apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PARKING_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load an explicit config file, then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ServiceConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Result<Self> {
        let api = file.api.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();

        let backend = match detector.backend.as_deref() {
            Some(name) => BackendKind::parse(name)?,
            None => BackendKind::parse(DEFAULT_BACKEND)?,
        };
        let frame_defaults = FrameLimits::default();
        Ok(Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_body_bytes: api.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            max_connections: api.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
            request_timeout: Duration::from_secs(
                api.request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            frame_limits: FrameLimits {
                max_width: api.max_image_width.unwrap_or(frame_defaults.max_width),
                max_height: api.max_image_height.unwrap_or(frame_defaults.max_height),
                max_alloc_bytes: api
                    .max_image_alloc_bytes
                    .unwrap_or(frame_defaults.max_alloc_bytes),
            },
            detector: DetectorSettings {
                backend,
                model_path: detector
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                vehicle_classes: detector
                    .vehicle_classes
                    .unwrap_or_else(|| DEFAULT_VEHICLE_CLASSES.to_vec()),
            },
            coordinate_dir: storage
                .coordinate_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_COORDINATE_DIR)),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("PARKING_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(dir) = std::env::var("PARKING_COORDINATE_DIR") {
            if !dir.trim().is_empty() {
                self.coordinate_dir = PathBuf::from(dir);
            }
        }
        if let Ok(backend) = std::env::var("PARKING_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = BackendKind::parse(&backend)?;
            }
        }
        if let Ok(path) = std::env::var("PARKING_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = PathBuf::from(path);
            }
        }
        if let Ok(threshold) = std::env::var("PARKING_CONFIDENCE_THRESHOLD") {
            if !threshold.trim().is_empty() {
                self.detector.confidence_threshold =
                    threshold.trim().parse().map_err(|_| {
                        anyhow!("PARKING_CONFIDENCE_THRESHOLD must be a number between 0 and 1")
                    })?;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let threshold = self.detector.confidence_threshold;
        if !(0.0..1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence threshold must be in [0, 1), got {}",
                threshold
            ));
        }
        if self.detector.vehicle_classes.is_empty() {
            return Err(anyhow!("vehicle class list must not be empty"));
        }
        self.detector.vehicle_classes.sort_unstable();
        self.detector.vehicle_classes.dedup();

        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!(
                "model input size must be a positive multiple of 32, got {}",
                self.detector.input_size
            ));
        }
        if self.detector.backend == BackendKind::Tract
            && self.detector.model_path.as_os_str().is_empty()
        {
            return Err(anyhow!("tract backend requires a model path"));
        }
        if self.max_body_bytes == 0 {
            return Err(anyhow!("max_body_bytes must be greater than zero"));
        }
        if self.max_connections == 0 {
            return Err(anyhow!("max_connections must be greater than zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("request_timeout_secs must be greater than zero"));
        }
        let limits = &self.frame_limits;
        if limits.max_width == 0 || limits.max_height == 0 || limits.max_alloc_bytes == 0 {
            return Err(anyhow!("image limits must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
