//! Counting Kernel
//!
//! Multi-camera line-crossing counter. Each active camera runs one worker
//! thread that reads frames, asks an inference engine for tracked boxes, and
//! counts objects moving upward across a horizontal counting line.
//!
//! # Module Structure
//!
//! - `backend`: inference backend selection (TensorRT, DirectML, OpenVINO, CPU)
//! - `counter`: per-track crossing state machine and counting geometry
//! - `detect`: inference engine and model loader traits, synthetic engine
//! - `ingest`: capture sources (synthetic `stub://`, GStreamer)
//! - `worker`: the per-camera frame loop
//! - `orchestrator`: session registry, start/stop, lifecycle events
//! - `config`: `countd` configuration (file + environment)

pub mod backend;
pub mod camera;
pub mod cancel;
pub mod config;
pub mod counter;
pub mod detect;
pub mod events;
pub mod frame;
pub mod ingest;
pub mod orchestrator;
pub mod session;
pub mod worker;

pub use backend::{
    select, Backend, BackendPreference, BackendSelection, DeviceArg, DeviceArgs, HardwareProbe,
    HardwareReport, ModelArtifacts, SystemProbe,
};
pub use camera::{redact_source, CameraConfig, CameraProvider, CameraSource, CameraTable};
pub use cancel::CancelToken;
pub use config::{CountdConfig, DetectionSettings};
pub use counter::{CountingGeometry, CrossingCounter, TrackerState, ZoneBounds, CROSSING_THRESHOLD};
pub use detect::{
    BoundingBox, InferenceEngine, LoaderRegistry, ModelLoader, SyntheticEngine, SyntheticLoader,
    TrackParams, TrackedDetection,
};
pub use events::{channel_callback, EventBus, FrameUpdate, LifecycleEvent, UpdateCallback, WorkerOutcome};
pub use frame::{annotate, Frame};
pub use ingest::{CameraCapture, CaptureOpener, CaptureSource, SourceOpener};
pub use orchestrator::{Collaborators, DetectionOrchestrator, StartRejection};
pub use session::{
    BackendInfo, CameraStatus, CargoType, DetectionSession, SessionSummary, SharedSession,
};
pub use worker::CameraWorker;
