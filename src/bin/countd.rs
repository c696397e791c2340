//! countd - multi-camera line-crossing counter daemon
//!
//! This daemon:
//! 1. Loads camera and detection configuration
//! 2. Selects the inference backend for this host
//! 3. Starts one detection worker per requested camera
//! 4. Runs until Ctrl-C or `--seconds`, then stops every session and prints
//!    session summaries as JSON

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use counting_kernel::{
    channel_callback, BackendPreference, CameraProvider, CargoType, Collaborators, CountdConfig,
    DetectionOrchestrator, LoaderRegistry, SourceOpener, SyntheticLoader, SystemProbe,
};

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (.toml or .json).
    #[arg(long, env = "COUNTD_CONFIG")]
    config: Option<PathBuf>,
    /// Backend preference: auto, tensorrt, directml, openvino or cpu.
    #[arg(long)]
    backend: Option<BackendPreference>,
    /// Camera id to start (repeatable). Defaults to every enabled camera.
    #[arg(long = "camera")]
    cameras: Vec<u32>,
    /// Operator recorded on each session.
    #[arg(long, default_value = "operator")]
    user: String,
    /// Cargo type recorded on each session.
    #[arg(long, default_value = "unspecified")]
    cargo_type: CargoType,
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    seconds: Option<u64>,
    /// Deterministic seed for the synthetic engine.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = CountdConfig::load_from(args.config.as_deref())?;
    if let Some(preference) = args.backend {
        cfg.detection.preferred_backend = preference;
    }
    let cameras = Arc::new(cfg.cameras.clone());

    let mut synthetic = SyntheticLoader::new();
    if let Some(seed) = args.seed {
        synthetic = synthetic.with_seed(seed);
    }
    let loader = LoaderRegistry::new().with_fallback(synthetic);

    let orchestrator = DetectionOrchestrator::new(
        cfg.detection,
        Collaborators {
            cameras: cameras.clone(),
            probe: Arc::new(SystemProbe),
            loader: Arc::new(loader),
            opener: Arc::new(SourceOpener),
        },
    );
    if !orchestrator.backend_ready() {
        bail!(
            "no inference backend available (is {} present?)",
            orchestrator.settings().model_path.display()
        );
    }
    let info = orchestrator.get_backend_info();
    log::info!("backend {} using {}", info.label, info.model_path.display());

    let events = orchestrator.subscribe();
    std::thread::Builder::new()
        .name("countd-events".into())
        .spawn(move || {
            for event in events {
                log::info!("event: {:?}", event);
            }
        })
        .context("spawn event logger")?;

    let requested: Vec<u32> = if args.cameras.is_empty() {
        cameras.list_enabled_cameras().iter().map(|c| c.id).collect()
    } else {
        args.cameras.clone()
    };

    let mut started = 0usize;
    for camera_id in requested {
        let (callback, updates) = channel_callback(4);
        match orchestrator.start(camera_id, &args.user, args.cargo_type, Some(callback)) {
            Ok(()) => {
                started += 1;
                std::thread::Builder::new()
                    .name(format!("countd-updates-{}", camera_id))
                    .spawn(move || {
                        for update in updates {
                            log::trace!(
                                "camera {} frame {} count {}",
                                update.camera_id,
                                update.frame.sequence,
                                update.count
                            );
                        }
                    })
                    .context("spawn update drain")?;
            }
            Err(rejection) => log::warn!("not starting camera {}: {}", camera_id, rejection),
        }
    }
    if started == 0 {
        return Err(anyhow!("no camera could be started"));
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    log::info!("countd running with {} camera(s); Ctrl-C to stop", started);
    loop {
        let wait = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(STATUS_INTERVAL),
            None => STATUS_INTERVAL,
        };
        match rx.recv_timeout(wait) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received");
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            log::info!("run time elapsed");
            break;
        }
        let active = orchestrator.active_cameras();
        if active.is_empty() {
            log::warn!("every session has ended");
            break;
        }
        for camera_id in active {
            log::info!(
                "camera {} count={}",
                camera_id,
                orchestrator.get_detection_count(camera_id)
            );
        }
    }

    let summaries = orchestrator.stop_all();
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}
