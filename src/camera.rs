use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Where a camera's frames come from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSource {
    /// Local capture device index.
    Device(u32),
    /// Stream URL (rtsp, http, file, or `stub://` for synthetic frames).
    Stream(String),
    /// No source configured; the camera cannot be started.
    #[serde(rename = "none")]
    Missing,
}

impl CameraSource {
    /// Interpret a configured source string.
    ///
    /// Blank → `Missing`, an unsigned integer → `Device`, anything else → `Stream`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return CameraSource::Missing;
        }
        match trimmed.parse::<u32>() {
            Ok(index) => CameraSource::Device(index),
            Err(_) => CameraSource::Stream(trimmed.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, CameraSource::Missing)
    }
}

impl fmt::Display for CameraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSource::Device(index) => write!(f, "device {}", index),
            CameraSource::Stream(url) => f.write_str(&redact_source(url)),
            CameraSource::Missing => f.write_str("<none>"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CameraConfig {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub source: CameraSource,
    pub enabled: bool,
}

/// Read-only camera configuration lookup.
pub trait CameraProvider: Send + Sync {
    fn get_camera(&self, id: u32) -> Option<CameraConfig>;
    fn list_enabled_cameras(&self) -> Vec<CameraConfig>;
}

/// In-memory camera table, ordered by id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CameraTable {
    cameras: BTreeMap<u32, CameraConfig>,
}

impl CameraTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a camera, returning the entry it replaced.
    pub fn insert(&mut self, camera: CameraConfig) -> Option<CameraConfig> {
        self.cameras.insert(camera.id, camera)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.cameras.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CameraConfig> {
        self.cameras.values()
    }
}

impl FromIterator<CameraConfig> for CameraTable {
    fn from_iter<I: IntoIterator<Item = CameraConfig>>(iter: I) -> Self {
        let mut table = CameraTable::new();
        for camera in iter {
            table.insert(camera);
        }
        table
    }
}

impl CameraProvider for CameraTable {
    fn get_camera(&self, id: u32) -> Option<CameraConfig> {
        self.cameras.get(&id).cloned()
    }

    fn list_enabled_cameras(&self) -> Vec<CameraConfig> {
        self.cameras.values().filter(|c| c.enabled).cloned().collect()
    }
}

fn credentials_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([a-zA-Z][a-zA-Z0-9+.\-]*://)[^/@\s]+@").unwrap())
}

/// Mask `user:password@` in stream URLs before they reach a log line.
pub fn redact_source(source: &str) -> String {
    credentials_pattern()
        .replace_all(source, "${1}***@")
        .into_owned()
}
