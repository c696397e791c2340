//! Inference backend selection.
//!
//! - `Backend`: the hardware execution paths the kernel knows about.
//! - `BackendSelection`: the immutable result of a selection pass (backend,
//!   model artifact, device arguments). Shared read-only by workers.
//! - `select`: preference first, then automatic detection in fixed priority
//!   order TensorRT → DirectML → OpenVINO → CPU.
//! - `HardwareProbe`: capability checks, injectable for tests.

mod probe;
mod selection;

pub use probe::{HardwareProbe, HardwareReport, SystemProbe};
pub use selection::{select, ModelArtifacts, AUTO_ORDER};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    TensorRt,
    DirectMl,
    OpenVino,
    Cpu,
    /// No backend could be configured. Workers must not start.
    None,
}

impl Backend {
    pub fn label(self) -> &'static str {
        match self {
            Backend::TensorRt => "TensorRT",
            Backend::DirectMl => "DirectML",
            Backend::OpenVino => "OpenVINO",
            Backend::Cpu => "CPU",
            Backend::None => "N/A",
        }
    }

    pub fn is_usable(self) -> bool {
        self != Backend::None
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Backend requested by configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    TensorRt,
    DirectMl,
    OpenVino,
    Cpu,
}

impl BackendPreference {
    /// The single backend this preference asks for, `None` for `auto`.
    pub fn backend(self) -> Option<Backend> {
        match self {
            BackendPreference::Auto => None,
            BackendPreference::TensorRt => Some(Backend::TensorRt),
            BackendPreference::DirectMl => Some(Backend::DirectMl),
            BackendPreference::OpenVino => Some(Backend::OpenVino),
            BackendPreference::Cpu => Some(Backend::Cpu),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendPreference::Auto => "auto",
            BackendPreference::TensorRt => "tensorrt",
            BackendPreference::DirectMl => "directml",
            BackendPreference::OpenVino => "openvino",
            BackendPreference::Cpu => "cpu",
        }
    }
}

impl FromStr for BackendPreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendPreference::Auto),
            "tensorrt" => Ok(BackendPreference::TensorRt),
            "directml" => Ok(BackendPreference::DirectMl),
            "openvino" => Ok(BackendPreference::OpenVino),
            "cpu" => Ok(BackendPreference::Cpu),
            other => Err(anyhow!(
                "unknown backend preference '{}' (expected auto, tensorrt, directml, openvino or cpu)",
                other
            )),
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One device argument value passed through to the inference engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceArg {
    Index(u32),
    Tag(String),
}

/// Opaque engine execution arguments. Only the inference engine interprets them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceArgs(BTreeMap<String, DeviceArg>);

impl DeviceArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: DeviceArg) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&DeviceArg> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of one selection pass. Immutable; replaced wholesale on reconfiguration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BackendSelection {
    pub backend: Backend,
    pub model_path: PathBuf,
    pub device_args: DeviceArgs,
}

impl BackendSelection {
    pub fn none() -> Self {
        Self {
            backend: Backend::None,
            model_path: PathBuf::new(),
            device_args: DeviceArgs::new(),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.backend.is_usable()
    }
}
