//! Session registry and worker lifecycle.
//!
//! The registry maps camera id → active entry (session, cancel flag,
//! completion signal, outcome slot, thread handle, generation). Every check-then-insert
//! in `start` and every report-then-remove at worker exit happens under the
//! registry lock. Entries are tagged with a generation so a worker detached
//! by a timed-out `stop` can never remove the entry of a later `start` for
//! the same camera.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::backend::{select, Backend, BackendPreference, BackendSelection, HardwareProbe};
use crate::camera::CameraProvider;
use crate::cancel::CancelToken;
use crate::config::DetectionSettings;
use crate::detect::ModelLoader;
use crate::events::{EventBus, LifecycleEvent, UpdateCallback, WorkerOutcome};
use crate::ingest::CaptureOpener;
use crate::session::{
    self, BackendInfo, CameraStatus, CargoType, DetectionSession, SessionSummary, SharedSession,
};
use crate::worker::{panic_message, CameraWorker};

/// Why `start` refused a camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartRejection {
    UnknownCamera(u32),
    Disabled(u32),
    AlreadyActive(u32),
    NoSource(u32),
    NoBackend,
    SpawnFailed(String),
}

impl fmt::Display for StartRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartRejection::UnknownCamera(id) => write!(f, "camera {} is not configured", id),
            StartRejection::Disabled(id) => write!(f, "camera {} is disabled", id),
            StartRejection::AlreadyActive(id) => write!(f, "camera {} already has an active session", id),
            StartRejection::NoSource(id) => write!(f, "camera {} has no source configured", id),
            StartRejection::NoBackend => write!(f, "no inference backend is available"),
            StartRejection::SpawnFailed(e) => write!(f, "failed to spawn detection worker: {}", e),
        }
    }
}

impl std::error::Error for StartRejection {}

/// External dependencies of the orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    pub cameras: Arc<dyn CameraProvider>,
    pub probe: Arc<dyn HardwareProbe>,
    pub loader: Arc<dyn ModelLoader>,
    pub opener: Arc<dyn CaptureOpener>,
}

type OutcomeSlot = Arc<Mutex<Option<WorkerOutcome>>>;

struct ActiveEntry {
    session: SharedSession,
    cancel: CancelToken,
    /// Never carries a message; disconnects when the worker thread exits.
    done: Receiver<()>,
    outcome: OutcomeSlot,
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

/// What a stopper observed before its deadline.
enum Termination {
    /// The worker thread exited; `None` if it died before recording an outcome.
    Exited(Option<WorkerOutcome>),
    TimedOut,
}

/// Wait for the worker to exit. Every waiter observes the disconnect, so
/// concurrent stoppers all see the same termination.
fn wait_for_exit(done: &Receiver<()>, outcome: &OutcomeSlot, deadline: Instant) -> Termination {
    match done.recv_deadline(deadline) {
        Err(RecvTimeoutError::Timeout) => Termination::TimedOut,
        Ok(()) | Err(RecvTimeoutError::Disconnected) => Termination::Exited(
            outcome
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        ),
    }
}

struct Shared {
    registry: Mutex<HashMap<u32, ActiveEntry>>,
    events: Arc<EventBus>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, HashMap<u32, ActiveEntry>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Terminal report from a worker that was not asked to stop.
    ///
    /// Cancelled workers are reaped by whoever cancelled them; stale
    /// generations belong to detached workers and are ignored.
    fn finish(&self, camera_id: u32, generation: u64, outcome: &WorkerOutcome) {
        let mut registry = self.registry();
        let owned = registry
            .get(&camera_id)
            .is_some_and(|e| e.generation == generation && !e.cancel.is_cancelled());
        if !owned {
            log::debug!(
                "camera {}: ignoring terminal report from generation {}",
                camera_id,
                generation
            );
            return;
        }
        registry.remove(&camera_id);
        self.events.publish(outcome.clone().into_event(camera_id));
    }
}

pub struct DetectionOrchestrator {
    shared: Arc<Shared>,
    selection: RwLock<Arc<BackendSelection>>,
    settings: Arc<DetectionSettings>,
    collab: Collaborators,
    next_generation: AtomicU64,
}

impl DetectionOrchestrator {
    /// Build the orchestrator and run backend selection for the configured preference.
    pub fn new(settings: DetectionSettings, collab: Collaborators) -> Self {
        let selection = select(
            settings.preferred_backend,
            &settings.artifacts(),
            collab.probe.as_ref(),
        );
        if !selection.is_usable() {
            log::error!("initialization failed: no inference backend; every start will be refused");
        }
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(HashMap::new()),
                events: Arc::new(EventBus::new()),
            }),
            selection: RwLock::new(Arc::new(selection)),
            settings: Arc::new(settings),
            collab,
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> Receiver<LifecycleEvent> {
        self.shared.events.subscribe()
    }

    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    /// Current backend selection.
    pub fn selection(&self) -> Arc<BackendSelection> {
        self.selection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn backend_ready(&self) -> bool {
        self.selection().is_usable()
    }

    /// Rerun backend selection. Running workers keep the selection they started with.
    pub fn reconfigure_backend(&self, preference: BackendPreference) -> Backend {
        let selection = select(
            preference,
            &self.settings.artifacts(),
            self.collab.probe.as_ref(),
        );
        let backend = selection.backend;
        if !selection.is_usable() {
            log::error!("backend reconfiguration found no usable backend; starts are disabled");
        }
        *self.selection.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(selection);
        backend
    }

    /// Start a detection session on `camera_id`.
    ///
    /// The session is registered before the worker processes its first frame.
    pub fn start(
        &self,
        camera_id: u32,
        user: &str,
        cargo_type: CargoType,
        callback: Option<UpdateCallback>,
    ) -> Result<(), StartRejection> {
        let mut registry = self.shared.registry();

        let camera = self
            .collab
            .cameras
            .get_camera(camera_id)
            .ok_or(StartRejection::UnknownCamera(camera_id))?;
        if !camera.enabled {
            return Err(StartRejection::Disabled(camera_id));
        }
        if registry.contains_key(&camera_id) {
            return Err(StartRejection::AlreadyActive(camera_id));
        }
        if camera.source.is_missing() {
            return Err(StartRejection::NoSource(camera_id));
        }
        let selection = self.selection();
        if !selection.is_usable() {
            return Err(StartRejection::NoBackend);
        }

        let session: SharedSession = Arc::new(Mutex::new(DetectionSession::new(
            camera_id,
            user,
            selection.backend,
            cargo_type,
        )));
        let cancel = CancelToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let outcome_slot: OutcomeSlot = Arc::new(Mutex::new(None));

        let worker = CameraWorker {
            camera,
            session: Arc::clone(&session),
            selection,
            settings: Arc::clone(&self.settings),
            loader: Arc::clone(&self.collab.loader),
            opener: Arc::clone(&self.collab.opener),
            cancel: cancel.clone(),
            events: Arc::clone(&self.shared.events),
        };

        self.shared
            .events
            .publish(LifecycleEvent::Starting { camera_id });

        let shared = Arc::clone(&self.shared);
        let slot = Arc::clone(&outcome_slot);
        let spawned = thread::Builder::new()
            .name(format!("detect-cam-{}", camera_id))
            .spawn(move || {
                // Dropped last, including on unwind.
                let _done = done_tx;
                // Blocks until `start` has inserted the entry and released the lock.
                drop(shared.registry());
                let outcome = panic::catch_unwind(AssertUnwindSafe(move || worker.run(callback)))
                    .unwrap_or_else(|payload| {
                        WorkerOutcome::Failed(format!(
                            "worker panicked during cleanup: {}",
                            panic_message(payload.as_ref())
                        ))
                    });
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome.clone());
                shared.finish(camera_id, generation, &outcome);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let reason = e.to_string();
                self.shared.events.publish(LifecycleEvent::Failed {
                    camera_id,
                    reason: reason.clone(),
                });
                return Err(StartRejection::SpawnFailed(reason));
            }
        };

        registry.insert(
            camera_id,
            ActiveEntry {
                session,
                cancel,
                done: done_rx,
                outcome: outcome_slot,
                handle: Some(handle),
                generation,
            },
        );
        log::info!(
            "camera {}: session started for {} ({})",
            camera_id,
            user,
            cargo_type
        );
        Ok(())
    }

    /// Stop `camera_id`, waiting up to the stop timeout.
    ///
    /// The entry is removed whether or not the worker exits in time; a worker
    /// that overruns is detached. Returns whether termination was observed.
    pub fn stop(&self, camera_id: u32) -> bool {
        let (done, outcome, generation) = {
            let registry = self.shared.registry();
            let Some(entry) = registry.get(&camera_id) else {
                log::debug!("camera {}: stop requested but no active session", camera_id);
                return false;
            };
            entry.cancel.cancel();
            (entry.done.clone(), Arc::clone(&entry.outcome), entry.generation)
        };
        log::info!("camera {}: stop requested", camera_id);

        let deadline = Instant::now() + self.settings.stop_timeout;
        let termination = wait_for_exit(&done, &outcome, deadline);
        self.reap(camera_id, generation, termination).0
    }

    /// Stop every active camera against one shared deadline.
    ///
    /// Returns summaries of the sessions that were stopped.
    pub fn stop_all(&self) -> Vec<SessionSummary> {
        let signalled: Vec<(u32, u64, Receiver<()>, OutcomeSlot)> = {
            let registry = self.shared.registry();
            registry
                .iter()
                .map(|(&id, entry)| {
                    entry.cancel.cancel();
                    (id, entry.generation, entry.done.clone(), Arc::clone(&entry.outcome))
                })
                .collect()
        };
        if signalled.is_empty() {
            return Vec::new();
        }
        log::info!("stopping {} active session(s)", signalled.len());

        let deadline = Instant::now() + self.settings.stop_timeout;
        let terminations: Vec<(u32, u64, Termination)> = signalled
            .into_iter()
            .map(|(id, generation, done, outcome)| {
                (id, generation, wait_for_exit(&done, &outcome, deadline))
            })
            .collect();

        let mut summaries: Vec<SessionSummary> = terminations
            .into_iter()
            .filter_map(|(id, generation, termination)| self.reap(id, generation, termination).1)
            .collect();
        summaries.sort_by_key(|s| s.camera_id);
        summaries
    }

    /// Remove a cancelled entry and publish its terminal event.
    fn reap(
        &self,
        camera_id: u32,
        generation: u64,
        termination: Termination,
    ) -> (bool, Option<SessionSummary>) {
        let terminated = matches!(termination, Termination::Exited(_));
        let entry = {
            let mut registry = self.shared.registry();
            if registry
                .get(&camera_id)
                .is_some_and(|e| e.generation == generation)
            {
                registry.remove(&camera_id)
            } else {
                None
            }
        };
        let Some(mut entry) = entry else {
            return (terminated, None);
        };

        let summary = {
            let mut session = session::lock(&entry.session);
            session.end();
            session.summary()
        };
        let event = match termination {
            Termination::Exited(outcome) => {
                if let Some(handle) = entry.handle.take() {
                    if handle.join().is_err() {
                        log::error!("camera {}: worker thread panicked after reporting", camera_id);
                    }
                }
                log::info!("camera {}: worker joined", camera_id);
                match outcome {
                    Some(outcome) => outcome.into_event(camera_id),
                    None => LifecycleEvent::Failed {
                        camera_id,
                        reason: "worker exited without reporting an outcome".to_string(),
                    },
                }
            }
            Termination::TimedOut => {
                let reason = format!(
                    "worker did not stop within {:?}; detached",
                    self.settings.stop_timeout
                );
                log::warn!("camera {}: {}", camera_id, reason);
                LifecycleEvent::Failed { camera_id, reason }
            }
        };
        self.shared.events.publish(event);
        (terminated, Some(summary))
    }

    /// Zero the count of an active session. Tracker state inside the worker is untouched.
    pub fn reset_count(&self, camera_id: u32) -> bool {
        let registry = self.shared.registry();
        let Some(entry) = registry.get(&camera_id) else {
            log::warn!("camera {}: reset requested but no active session", camera_id);
            return false;
        };
        session::lock(&entry.session).reset_count();
        log::info!("camera {}: count reset", camera_id);
        self.shared
            .events
            .publish(LifecycleEvent::CountReset { camera_id });
        true
    }

    pub fn is_active(&self, camera_id: u32) -> bool {
        self.shared.registry().contains_key(&camera_id)
    }

    /// Snapshot of the active session for `camera_id`.
    pub fn get_session(&self, camera_id: u32) -> Option<DetectionSession> {
        self.shared
            .registry()
            .get(&camera_id)
            .map(|e| session::lock(&e.session).clone())
    }

    pub fn get_detection_count(&self, camera_id: u32) -> u64 {
        self.shared
            .registry()
            .get(&camera_id)
            .map(|e| session::lock(&e.session).detection_count)
            .unwrap_or(0)
    }

    pub fn get_camera_status(&self, camera_id: u32) -> Option<CameraStatus> {
        let registry = self.shared.registry();
        let entry = registry.get(&camera_id)?;
        let alive = entry.handle.as_ref().is_some_and(|h| !h.is_finished());
        let session = session::lock(&entry.session);
        Some(CameraStatus::new(&session, alive))
    }

    pub fn get_backend_info(&self) -> BackendInfo {
        let selection = self.selection();
        BackendInfo {
            backend: selection.backend,
            label: selection.backend.label(),
            model_path: selection.model_path.clone(),
            device_args: selection.device_args.clone(),
            active_sessions: self.shared.registry().len(),
        }
    }

    /// Camera ids with an active session, ascending.
    pub fn active_cameras(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.shared.registry().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Drop for DetectionOrchestrator {
    /// Signals every remaining worker without waiting.
    fn drop(&mut self) {
        for entry in self.shared.registry().values() {
            entry.cancel.cancel();
        }
    }
}
