use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::{BackendPreference, ModelArtifacts};
use crate::camera::{CameraConfig, CameraSource, CameraTable};

pub const CONFIG_ENV: &str = "COUNTD_CONFIG";

const DEFAULT_MODEL_PATH: &str = "models/best.pt";
const DEFAULT_TENSORRT_PATH: &str = "models/best.engine";
const DEFAULT_OPENVINO_PATH: &str = "models/best_openvino_model";
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_LINE_POSITION: f32 = 0.5;
const DEFAULT_LINE_WIDTH: f32 = 1.0;
const DEFAULT_MAX_FAILURES: u32 = 150;
const DEFAULT_TRACKER: &str = "bytetrack.yaml";
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 7;

#[derive(Debug, Deserialize, Default)]
struct CountdConfigFile {
    detection: Option<DetectionConfigFile>,
    cameras: Option<BTreeMap<String, CameraConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    model_path: Option<PathBuf>,
    model_path_tensorrt: Option<PathBuf>,
    model_path_openvino: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    count_line_position: Option<f32>,
    count_line_width: Option<f32>,
    preferred_backend: Option<BackendPreference>,
    max_detection_failures: Option<u32>,
    tracker_config: Option<String>,
    stop_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    id: Option<u32>,
    name: Option<String>,
    description: Option<String>,
    source: Option<SourceValue>,
    enabled: Option<bool>,
}

/// `source = 0` and `source = "0"` both mean device 0.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceValue {
    Index(u32),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct CountdConfig {
    pub cameras: CameraTable,
    pub detection: DetectionSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub model_path: PathBuf,
    pub model_path_tensorrt: PathBuf,
    pub model_path_openvino: PathBuf,
    pub confidence_threshold: f32,
    /// Counting line height as a fraction of frame height.
    pub count_line_position: f32,
    /// Counting zone width as a fraction of frame width, centered.
    pub count_line_width: f32,
    pub preferred_backend: BackendPreference,
    /// Consecutive failed reads tolerated before the stream is declared lost.
    pub max_detection_failures: u32,
    pub tracker_config: String,
    pub stop_timeout: Duration,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            model_path_tensorrt: PathBuf::from(DEFAULT_TENSORRT_PATH),
            model_path_openvino: PathBuf::from(DEFAULT_OPENVINO_PATH),
            confidence_threshold: DEFAULT_CONFIDENCE,
            count_line_position: DEFAULT_LINE_POSITION,
            count_line_width: DEFAULT_LINE_WIDTH,
            preferred_backend: BackendPreference::Auto,
            max_detection_failures: DEFAULT_MAX_FAILURES,
            tracker_config: DEFAULT_TRACKER.to_string(),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
        }
    }
}

impl DetectionSettings {
    pub fn artifacts(&self) -> ModelArtifacts {
        ModelArtifacts {
            base: self.model_path.clone(),
            tensorrt: self.model_path_tensorrt.clone(),
            openvino: self.model_path_openvino.clone(),
        }
    }
}

impl CountdConfig {
    /// Load from the file named by `COUNTD_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok().filter(|p| !p.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

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

    fn from_file(file: CountdConfigFile) -> Result<Self> {
        let d = file.detection.unwrap_or_default();
        let defaults = DetectionSettings::default();
        let detection = DetectionSettings {
            model_path: d.model_path.unwrap_or(defaults.model_path),
            model_path_tensorrt: d.model_path_tensorrt.unwrap_or(defaults.model_path_tensorrt),
            model_path_openvino: d.model_path_openvino.unwrap_or(defaults.model_path_openvino),
            confidence_threshold: d.confidence_threshold.unwrap_or(defaults.confidence_threshold),
            count_line_position: d.count_line_position.unwrap_or(defaults.count_line_position),
            count_line_width: d.count_line_width.unwrap_or(defaults.count_line_width),
            preferred_backend: d.preferred_backend.unwrap_or(defaults.preferred_backend),
            max_detection_failures: d
                .max_detection_failures
                .unwrap_or(defaults.max_detection_failures),
            tracker_config: d.tracker_config.unwrap_or(defaults.tracker_config),
            stop_timeout: d
                .stop_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.stop_timeout),
        };

        let cameras = match file.cameras {
            Some(entries) => camera_table(entries)?,
            None => default_cameras(),
        };

        Ok(Self { cameras, detection })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("COUNTD_BACKEND") {
            if !backend.trim().is_empty() {
                self.detection.preferred_backend = backend.parse()?;
            }
        }
        if let Ok(confidence) = std::env::var("COUNTD_CONFIDENCE") {
            self.detection.confidence_threshold = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("COUNTD_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(failures) = std::env::var("COUNTD_MAX_FAILURES") {
            self.detection.max_detection_failures = failures
                .trim()
                .parse()
                .map_err(|_| anyhow!("COUNTD_MAX_FAILURES must be a non-negative integer"))?;
        }
        if let Ok(timeout) = std::env::var("COUNTD_STOP_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("COUNTD_STOP_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.detection.stop_timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let d = &self.detection;
        check_fraction("confidence_threshold", d.confidence_threshold)?;
        check_fraction("count_line_position", d.count_line_position)?;
        check_fraction("count_line_width", d.count_line_width)?;
        if d.count_line_width == 0.0 {
            return Err(anyhow!("count_line_width must be greater than zero"));
        }
        if d.stop_timeout.is_zero() {
            return Err(anyhow!("stop timeout must be greater than zero"));
        }
        if d.tracker_config.trim().is_empty() {
            return Err(anyhow!("tracker_config must not be empty"));
        }
        Ok(())
    }
}

fn check_fraction(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be between 0 and 1 (got {})", name, value));
    }
    Ok(())
}

fn camera_table(entries: BTreeMap<String, CameraConfigFile>) -> Result<CameraTable> {
    let mut table = CameraTable::new();
    for (key, entry) in entries {
        let id = match entry.id {
            Some(id) => id,
            None => key
                .trim()
                .parse()
                .map_err(|_| anyhow!("camera '{}' needs a numeric id", key))?,
        };
        let source = match entry.source {
            Some(SourceValue::Index(index)) => CameraSource::Device(index),
            Some(SourceValue::Text(text)) => CameraSource::parse(&text),
            None => CameraSource::Missing,
        };
        if table.contains(id) {
            return Err(anyhow!("duplicate camera id {}", id));
        }
        let camera = CameraConfig {
            id,
            name: entry.name.unwrap_or_else(|| format!("Camera {}", id)),
            description: entry.description.unwrap_or_default(),
            source,
            enabled: entry.enabled.unwrap_or(true),
        };
        table.insert(camera);
    }
    Ok(table)
}

fn default_cameras() -> CameraTable {
    [
        (0, "Webcam", "Local development camera", "stub://webcam", true),
        (1, "Entrance", "Loading dock entrance", "stub://entrance", true),
        (2, "Exit", "Loading dock exit", "stub://exit", false),
    ]
    .into_iter()
    .map(|(id, name, description, source, enabled)| CameraConfig {
        id,
        name: name.to_string(),
        description: description.to_string(),
        source: CameraSource::parse(source),
        enabled,
    })
    .collect()
}

fn read_config_file(path: &Path) -> Result<CountdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
