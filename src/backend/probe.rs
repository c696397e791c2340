use std::path::{Path, PathBuf};

use serde::Serialize;

use super::selection::{check, select, ModelArtifacts, AUTO_ORDER};
use super::{Backend, BackendPreference};

/// Environment switch that hides every GPU runtime from `SystemProbe`.
pub const FORCE_NO_GPU_ENV: &str = "COUNTD_FORCE_NO_GPU";

/// Host capability checks used by backend selection.
pub trait HardwareProbe: Send + Sync {
    /// A CUDA-capable GPU and driver runtime are present.
    fn cuda_available(&self) -> bool;

    /// The DirectML runtime is loadable.
    fn directml_available(&self) -> bool;

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn dir_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

/// Inspects the running host.
///
/// CUDA: the NVIDIA kernel driver on Linux, `nvcuda.dll` on Windows.
/// DirectML: `DirectML.dll` in the Windows system directory.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProbe;

impl SystemProbe {
    fn gpu_disabled() -> bool {
        std::env::var(FORCE_NO_GPU_ENV)
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }

    fn windows_system_dir() -> Option<PathBuf> {
        let root = std::env::var_os("SystemRoot")?;
        Some(PathBuf::from(root).join("System32"))
    }
}

impl HardwareProbe for SystemProbe {
    fn cuda_available(&self) -> bool {
        if Self::gpu_disabled() {
            return false;
        }
        if cfg!(windows) {
            return Self::windows_system_dir()
                .map(|dir| dir.join("nvcuda.dll").is_file())
                .unwrap_or(false);
        }
        Path::new("/proc/driver/nvidia/version").is_file()
    }

    fn directml_available(&self) -> bool {
        if Self::gpu_disabled() || !cfg!(windows) {
            return false;
        }
        Self::windows_system_dir()
            .map(|dir| dir.join("DirectML.dll").is_file())
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ArtifactStatus {
    pub path: PathBuf,
    pub present: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct BackendStatus {
    pub backend: Backend,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// What the host can run and which model exports are on disk.
#[derive(Clone, Debug, Serialize)]
pub struct HardwareReport {
    pub os: &'static str,
    pub arch: &'static str,
    pub cuda_available: bool,
    pub directml_available: bool,
    pub base_model: ArtifactStatus,
    pub tensorrt_engine: ArtifactStatus,
    pub openvino_model: ArtifactStatus,
    /// Every candidate in automatic detection order.
    pub backends: Vec<BackendStatus>,
    /// What automatic detection would pick.
    pub recommended: Backend,
}

impl HardwareReport {
    pub fn collect(artifacts: &ModelArtifacts, probe: &dyn HardwareProbe) -> Self {
        let backends = AUTO_ORDER
            .iter()
            .map(|&backend| {
                let result = check(backend, artifacts, probe);
                BackendStatus {
                    backend,
                    available: result.is_ok(),
                    reason: result.err(),
                }
            })
            .collect();

        Self {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            cuda_available: probe.cuda_available(),
            directml_available: probe.directml_available(),
            base_model: ArtifactStatus {
                path: artifacts.base.clone(),
                present: probe.file_exists(&artifacts.base),
            },
            tensorrt_engine: ArtifactStatus {
                path: artifacts.tensorrt.clone(),
                present: probe.file_exists(&artifacts.tensorrt),
            },
            openvino_model: ArtifactStatus {
                path: artifacts.openvino.clone(),
                present: probe.dir_exists(&artifacts.openvino),
            },
            backends,
            recommended: select(BackendPreference::Auto, artifacts, probe).backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct NoGpu;

    impl HardwareProbe for NoGpu {
        fn cuda_available(&self) -> bool {
            false
        }

        fn directml_available(&self) -> bool {
            false
        }
    }

    #[test]
    fn report_reflects_artifacts_on_disk() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("best.pt");
        let openvino = dir.path().join("best_openvino_model");
        fs::write(&base, b"weights")?;
        fs::create_dir(&openvino)?;

        let artifacts = ModelArtifacts {
            base,
            tensorrt: dir.path().join("best.engine"),
            openvino,
        };
        let report = HardwareReport::collect(&artifacts, &NoGpu);

        assert!(report.base_model.present);
        assert!(!report.tensorrt_engine.present);
        assert!(report.openvino_model.present);
        assert_eq!(report.recommended, Backend::OpenVino);

        let available: Vec<Backend> = report
            .backends
            .iter()
            .filter(|s| s.available)
            .map(|s| s.backend)
            .collect();
        assert_eq!(available, vec![Backend::OpenVino, Backend::Cpu]);
        assert!(report.backends[0].reason.is_some());

        let json = serde_json::to_value(&report)?;
        assert_eq!(json["recommended"], "OpenVino");
        Ok(())
    }
}
