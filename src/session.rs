//! Detection sessions and the read-only views the orchestrator hands out.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, DeviceArgs};

/// Cargo being loaded while a session runs. Carried for reporting only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CargoType {
    TortaNormal,
    TortaMoida,
    SojaSeca,
    SojaIntegral,
    FareloMilhoFino,
    FareloMilhoGrosso,
    #[default]
    Unspecified,
}

impl CargoType {
    pub const ALL: [CargoType; 7] = [
        CargoType::TortaNormal,
        CargoType::TortaMoida,
        CargoType::SojaSeca,
        CargoType::SojaIntegral,
        CargoType::FareloMilhoFino,
        CargoType::FareloMilhoGrosso,
        CargoType::Unspecified,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            CargoType::TortaNormal => "Torta Normal",
            CargoType::TortaMoida => "Torta Moída",
            CargoType::SojaSeca => "Soja Seca",
            CargoType::SojaIntegral => "Soja Integral",
            CargoType::FareloMilhoFino => "Farelo de Milho Fino",
            CargoType::FareloMilhoGrosso => "Farelo de Milho Grosso",
            CargoType::Unspecified => "Não especificado",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            CargoType::TortaNormal => "torta_normal",
            CargoType::TortaMoida => "torta_moida",
            CargoType::SojaSeca => "soja_seca",
            CargoType::SojaIntegral => "soja_integral",
            CargoType::FareloMilhoFino => "farelo_milho_fino",
            CargoType::FareloMilhoGrosso => "farelo_milho_grosso",
            CargoType::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for CargoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for CargoType {
    type Err = anyhow::Error;

    /// Accepts the snake-case key or the display name, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        let lowered = wanted.to_lowercase();
        CargoType::ALL
            .into_iter()
            .find(|c| c.key() == lowered || c.display_name().to_lowercase() == lowered)
            .ok_or_else(|| anyhow!("unknown cargo type '{}'", wanted))
    }
}

/// One counting run on one camera.
#[derive(Clone, Debug)]
pub struct DetectionSession {
    pub camera_id: u32,
    pub user: String,
    pub backend: Backend,
    pub cargo_type: CargoType,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub detection_count: u64,
}

impl DetectionSession {
    pub fn new(camera_id: u32, user: &str, backend: Backend, cargo_type: CargoType) -> Self {
        Self {
            camera_id,
            user: user.to_string(),
            backend,
            cargo_type,
            start_time: Local::now(),
            end_time: None,
            detection_count: 0,
        }
    }

    /// Set `end_time` if it is still unset. Returns whether this call set it.
    pub fn end(&mut self) -> bool {
        if self.end_time.is_some() {
            return false;
        }
        self.end_time = Some(Local::now());
        true
    }

    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }

    /// Elapsed time up to `end_time`, or up to now while running.
    pub fn duration(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Local::now) - self.start_time
    }

    pub fn increment(&mut self) -> u64 {
        self.detection_count += 1;
        self.detection_count
    }

    pub fn reset_count(&mut self) {
        self.detection_count = 0;
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            camera_id: self.camera_id,
            user: self.user.clone(),
            backend: self.backend,
            cargo_type: self.cargo_type,
            cargo_name: self.cargo_type.display_name(),
            start_time: self.start_time,
            end_time: self.end_time,
            duration_seconds: self.duration().num_milliseconds() as f64 / 1000.0,
            detection_count: self.detection_count,
        }
    }
}

pub type SharedSession = Arc<Mutex<DetectionSession>>;

/// Lock a session, recovering the data if a previous holder panicked.
///
/// Session fields are plain values, so a poisoned guard still holds a
/// consistent snapshot.
pub fn lock(session: &SharedSession) -> MutexGuard<'_, DetectionSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializable snapshot of a session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub camera_id: u32,
    pub user: String,
    pub backend: Backend,
    pub cargo_type: CargoType,
    pub cargo_name: &'static str,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub duration_seconds: f64,
    pub detection_count: u64,
}

/// Snapshot of one active camera.
#[derive(Clone, Debug, Serialize)]
pub struct CameraStatus {
    pub camera_id: u32,
    pub active: bool,
    pub detection_count: u64,
    pub session_start: DateTime<Local>,
    pub backend: Backend,
    pub user: String,
    pub cargo_type: CargoType,
}

impl CameraStatus {
    pub fn new(session: &DetectionSession, active: bool) -> Self {
        Self {
            camera_id: session.camera_id,
            active,
            detection_count: session.detection_count,
            session_start: session.start_time,
            backend: session.backend,
            user: session.user.clone(),
            cargo_type: session.cargo_type,
        }
    }
}

/// The current backend selection plus how many sessions are running.
#[derive(Clone, Debug, Serialize)]
pub struct BackendInfo {
    pub backend: Backend,
    pub label: &'static str,
    pub model_path: PathBuf,
    pub device_args: DeviceArgs,
    pub active_sessions: usize,
}
