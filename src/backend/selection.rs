use std::path::{Path, PathBuf};

use serde::Serialize;

use super::probe::HardwareProbe;
use super::{Backend, BackendPreference, BackendSelection, DeviceArg, DeviceArgs};

/// Model artifacts the selector may pick from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelArtifacts {
    /// Base model, used by the DirectML and CPU paths.
    pub base: PathBuf,
    /// Exported TensorRT engine file.
    pub tensorrt: PathBuf,
    /// Exported OpenVINO model directory.
    pub openvino: PathBuf,
}

struct Candidate {
    backend: Backend,
    precondition: fn(&ModelArtifacts, &dyn HardwareProbe) -> Result<(), String>,
    model_path: fn(&ModelArtifacts) -> &Path,
    device_args: fn() -> DeviceArgs,
}

/// Automatic detection order, fastest first.
pub const AUTO_ORDER: [Backend; 4] = [
    Backend::TensorRt,
    Backend::DirectMl,
    Backend::OpenVino,
    Backend::Cpu,
];

static CANDIDATES: [Candidate; 4] = [
    Candidate {
        backend: Backend::TensorRt,
        precondition: tensorrt_ready,
        model_path: engine_path,
        device_args: first_gpu,
    },
    Candidate {
        backend: Backend::DirectMl,
        precondition: directml_ready,
        model_path: base_path,
        device_args: DeviceArgs::new,
    },
    Candidate {
        backend: Backend::OpenVino,
        precondition: openvino_ready,
        model_path: openvino_path,
        device_args: DeviceArgs::new,
    },
    Candidate {
        backend: Backend::Cpu,
        precondition: cpu_ready,
        model_path: base_path,
        device_args: cpu_device,
    },
];

fn base_path(artifacts: &ModelArtifacts) -> &Path {
    &artifacts.base
}

fn engine_path(artifacts: &ModelArtifacts) -> &Path {
    &artifacts.tensorrt
}

fn openvino_path(artifacts: &ModelArtifacts) -> &Path {
    &artifacts.openvino
}

fn first_gpu() -> DeviceArgs {
    DeviceArgs::new().with("device", DeviceArg::Index(0))
}

fn cpu_device() -> DeviceArgs {
    DeviceArgs::new().with("device", DeviceArg::Tag("cpu".to_string()))
}

fn tensorrt_ready(artifacts: &ModelArtifacts, probe: &dyn HardwareProbe) -> Result<(), String> {
    if !probe.cuda_available() {
        return Err("no CUDA-capable GPU runtime".to_string());
    }
    if !probe.file_exists(&artifacts.tensorrt) {
        return Err(format!("engine {} not found", artifacts.tensorrt.display()));
    }
    Ok(())
}

fn directml_ready(artifacts: &ModelArtifacts, probe: &dyn HardwareProbe) -> Result<(), String> {
    if !probe.directml_available() {
        return Err("DirectML runtime not available".to_string());
    }
    if !probe.file_exists(&artifacts.base) {
        return Err(format!("model {} not found", artifacts.base.display()));
    }
    Ok(())
}

fn openvino_ready(artifacts: &ModelArtifacts, probe: &dyn HardwareProbe) -> Result<(), String> {
    if !probe.dir_exists(&artifacts.openvino) {
        return Err(format!(
            "OpenVINO model directory {} not found",
            artifacts.openvino.display()
        ));
    }
    Ok(())
}

fn cpu_ready(artifacts: &ModelArtifacts, probe: &dyn HardwareProbe) -> Result<(), String> {
    if !probe.file_exists(&artifacts.base) {
        return Err(format!("model {} not found", artifacts.base.display()));
    }
    Ok(())
}

fn candidate(backend: Backend) -> Option<&'static Candidate> {
    CANDIDATES.iter().find(|c| c.backend == backend)
}

fn try_candidate(
    candidate: &Candidate,
    artifacts: &ModelArtifacts,
    probe: &dyn HardwareProbe,
) -> Result<BackendSelection, String> {
    (candidate.precondition)(artifacts, probe)?;
    Ok(BackendSelection {
        backend: candidate.backend,
        model_path: (candidate.model_path)(artifacts).to_path_buf(),
        device_args: (candidate.device_args)(),
    })
}

/// Whether `backend` could be configured right now.
pub(crate) fn check(
    backend: Backend,
    artifacts: &ModelArtifacts,
    probe: &dyn HardwareProbe,
) -> Result<(), String> {
    match candidate(backend) {
        Some(c) => (c.precondition)(artifacts, probe),
        None => Err("not a selectable backend".to_string()),
    }
}

/// Pick the inference backend.
///
/// A specific preference is tried first; if its preconditions fail the
/// selector warns and runs the automatic pass over the same candidate list.
/// Returns a `Backend::None` selection when nothing can be configured.
pub fn select(
    preference: BackendPreference,
    artifacts: &ModelArtifacts,
    probe: &dyn HardwareProbe,
) -> BackendSelection {
    if let Some(preferred) = preference.backend().and_then(candidate) {
        match try_candidate(preferred, artifacts, probe) {
            Ok(selection) => {
                log::info!(
                    "using preferred backend {} with {}",
                    selection.backend,
                    selection.model_path.display()
                );
                return selection;
            }
            Err(reason) => log::warn!(
                "preferred backend {} unavailable ({}); falling back to automatic detection",
                preferred.backend,
                reason
            ),
        }
    }

    for c in &CANDIDATES {
        match try_candidate(c, artifacts, probe) {
            Ok(selection) => {
                log::info!(
                    "selected backend {} with {}",
                    selection.backend,
                    selection.model_path.display()
                );
                return selection;
            }
            Err(reason) => log::debug!("backend {} skipped: {}", c.backend, reason),
        }
    }

    log::error!(
        "no inference backend could be configured (base model {} missing?); detection is disabled",
        artifacts.base.display()
    );
    BackendSelection::none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeProbe {
        cuda: bool,
        directml: bool,
        files: HashSet<PathBuf>,
        dirs: HashSet<PathBuf>,
    }

    impl FakeProbe {
        fn file(mut self, path: &str) -> Self {
            self.files.insert(PathBuf::from(path));
            self
        }

        fn dir(mut self, path: &str) -> Self {
            self.dirs.insert(PathBuf::from(path));
            self
        }
    }

    impl HardwareProbe for FakeProbe {
        fn cuda_available(&self) -> bool {
            self.cuda
        }

        fn directml_available(&self) -> bool {
            self.directml
        }

        fn file_exists(&self, path: &Path) -> bool {
            self.files.contains(path)
        }

        fn dir_exists(&self, path: &Path) -> bool {
            self.dirs.contains(path)
        }
    }

    fn artifacts() -> ModelArtifacts {
        ModelArtifacts {
            base: "models/best.pt".into(),
            tensorrt: "models/best.engine".into(),
            openvino: "models/best_openvino_model".into(),
        }
    }

    #[test]
    fn tensorrt_preference_without_engine_falls_back_in_order() {
        // CUDA present but no engine file: TensorRT fails, DirectML is next.
        let probe = FakeProbe {
            cuda: true,
            directml: true,
            ..Default::default()
        }
        .file("models/best.pt")
        .dir("models/best_openvino_model");
        let chosen = select(BackendPreference::TensorRt, &artifacts(), &probe);
        assert_eq!(chosen.backend, Backend::DirectMl);
        assert_eq!(chosen.model_path, PathBuf::from("models/best.pt"));
        assert!(chosen.device_args.is_empty());

        let probe = FakeProbe {
            cuda: true,
            ..Default::default()
        }
        .file("models/best.pt")
        .dir("models/best_openvino_model");
        let chosen = select(BackendPreference::TensorRt, &artifacts(), &probe);
        assert_eq!(chosen.backend, Backend::OpenVino);
        assert_eq!(chosen.model_path, PathBuf::from("models/best_openvino_model"));

        let probe = FakeProbe::default().file("models/best.pt");
        let chosen = select(BackendPreference::TensorRt, &artifacts(), &probe);
        assert_eq!(chosen.backend, Backend::Cpu);
        assert_eq!(
            chosen.device_args.get("device"),
            Some(&DeviceArg::Tag("cpu".into()))
        );
    }

    #[test]
    fn tensorrt_needs_both_gpu_and_engine() {
        let probe = FakeProbe::default()
            .file("models/best.engine")
            .file("models/best.pt");
        assert_eq!(
            select(BackendPreference::TensorRt, &artifacts(), &probe).backend,
            Backend::Cpu
        );

        let probe = FakeProbe {
            cuda: true,
            ..Default::default()
        }
        .file("models/best.engine");
        let chosen = select(BackendPreference::Auto, &artifacts(), &probe);
        assert_eq!(chosen.backend, Backend::TensorRt);
        assert_eq!(chosen.model_path, PathBuf::from("models/best.engine"));
        assert_eq!(chosen.device_args.get("device"), Some(&DeviceArg::Index(0)));
    }

    #[test]
    fn honoured_preference_wins_over_faster_backends() {
        let probe = FakeProbe {
            cuda: true,
            directml: true,
            ..Default::default()
        }
        .file("models/best.engine")
        .file("models/best.pt");
        assert_eq!(
            select(BackendPreference::Cpu, &artifacts(), &probe).backend,
            Backend::Cpu
        );
        assert_eq!(
            select(BackendPreference::Auto, &artifacts(), &probe).backend,
            Backend::TensorRt
        );
    }

    #[test]
    fn missing_base_model_without_accelerators_yields_none() {
        let probe = FakeProbe::default();
        let chosen = select(BackendPreference::Auto, &artifacts(), &probe);
        assert_eq!(chosen, BackendSelection::none());
        assert!(!chosen.is_usable());
    }

    #[test]
    fn openvino_requires_a_directory_not_a_file() {
        let probe = FakeProbe::default().file("models/best_openvino_model");
        assert!(check(Backend::OpenVino, &artifacts(), &probe).is_err());
        assert!(check(Backend::None, &artifacts(), &probe).is_err());
    }

    #[test]
    fn auto_order_matches_candidate_list() {
        let order: Vec<Backend> = CANDIDATES.iter().map(|c| c.backend).collect();
        assert_eq!(order, AUTO_ORDER.to_vec());
    }
}
