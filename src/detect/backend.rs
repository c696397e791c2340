use anyhow::Result;

use crate::backend::{BackendSelection, DeviceArgs};
use crate::detect::result::TrackedDetection;
use crate::frame::Frame;

/// Per-call tracking parameters.
#[derive(Clone, Copy, Debug)]
pub struct TrackParams<'a> {
    /// Detections below this confidence are dropped by the engine.
    pub confidence_threshold: f32,
    /// Backend-specific execution arguments from the active `BackendSelection`.
    pub device_args: &'a DeviceArgs,
    /// Tracker configuration name (e.g. `bytetrack.yaml`).
    pub tracker_config: &'a str,
}

/// Detection + tracking engine for one stream.
///
/// # Identity contract
///
/// Track ids must persist across calls on the same engine instance for the
/// same logical stream. Each camera worker loads its own engine, so engines
/// never see frames from two cameras.
pub trait InferenceEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Detect and track objects in one frame.
    ///
    /// Implementations must treat the frame as read-only and must not retain
    /// it beyond the call.
    fn track(&mut self, frame: &Frame, params: &TrackParams<'_>) -> Result<Vec<TrackedDetection>>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Loads an engine for the model artifact named by a backend selection.
pub trait ModelLoader: Send + Sync {
    fn load(&self, selection: &BackendSelection) -> Result<Box<dyn InferenceEngine>>;
}
