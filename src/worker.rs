//! One camera's capture → track → count loop.
//!
//! A worker owns its engine, capture, tracker state and failure counter.
//! The only shared state it touches is its session (count, end time), always
//! under the session lock.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::backend::BackendSelection;
use crate::camera::CameraConfig;
use crate::cancel::CancelToken;
use crate::config::DetectionSettings;
use crate::counter::{fraction_below, CountingGeometry, CrossingCounter};
use crate::detect::{ModelLoader, TrackParams};
use crate::events::{EventBus, LifecycleEvent, UpdateCallback, WorkerOutcome};
use crate::frame::{annotate, Frame};
use crate::ingest::{CaptureOpener, CaptureSource};
use crate::session::{self, SharedSession};

/// Wait between a failed read and the next attempt.
pub const READ_RETRY_WAIT: Duration = Duration::from_millis(100);

pub struct CameraWorker {
    pub camera: CameraConfig,
    pub session: SharedSession,
    /// Snapshot taken at start; later reconfiguration does not affect this worker.
    pub selection: Arc<BackendSelection>,
    pub settings: Arc<DetectionSettings>,
    pub loader: Arc<dyn ModelLoader>,
    pub opener: Arc<dyn CaptureOpener>,
    pub cancel: CancelToken,
    pub events: Arc<EventBus>,
}

impl CameraWorker {
    /// Run until cancelled or a fatal error.
    ///
    /// Every exit path releases the capture and sets the session end time
    /// before the outcome is returned. Panics inside the loop become
    /// `WorkerOutcome::Failed`.
    pub fn run(self, mut callback: Option<UpdateCallback>) -> WorkerOutcome {
        let camera_id = self.camera.id;
        let mut capture: Option<Box<dyn CaptureSource>> = None;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(&mut capture, &mut callback)
        }));

        if let Some(mut source) = capture.take() {
            let released = panic::catch_unwind(AssertUnwindSafe(|| source.release()));
            match released {
                Ok(()) => log::debug!("camera {}: capture released", camera_id),
                Err(payload) => log::error!(
                    "camera {}: capture release panicked: {}",
                    camera_id,
                    panic_message(payload.as_ref())
                ),
            }
        }
        let count = {
            let mut session = session::lock(&self.session);
            session.end();
            session.detection_count
        };

        let outcome = match result {
            Ok(Ok(())) => WorkerOutcome::Stopped,
            Ok(Err(e)) => WorkerOutcome::Failed(format!("{:#}", e)),
            Err(payload) => WorkerOutcome::Failed(format!(
                "worker panicked: {}",
                panic_message(payload.as_ref())
            )),
        };
        match &outcome {
            WorkerOutcome::Stopped => {
                log::info!("camera {}: detection stopped, total count {}", camera_id, count)
            }
            WorkerOutcome::Failed(reason) => {
                log::error!("camera {}: detection failed: {}", camera_id, reason)
            }
        }
        outcome
    }

    fn execute(
        &self,
        capture: &mut Option<Box<dyn CaptureSource>>,
        callback: &mut Option<UpdateCallback>,
    ) -> Result<()> {
        let camera_id = self.camera.id;

        log::info!(
            "camera {}: loading {} model {}",
            camera_id,
            self.selection.backend,
            self.selection.model_path.display()
        );
        let mut engine = self.loader.load(&self.selection).with_context(|| {
            format!("model load failed for {}", self.selection.model_path.display())
        })?;
        engine.warm_up().context("model warm-up failed")?;
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        log::info!("camera {}: connecting to {}", camera_id, self.camera.source);
        let opened = self
            .opener
            .open(&self.camera.source)
            .with_context(|| format!("connection error: cannot open {}", self.camera.source))?;
        let source = capture.insert(opened);
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.events.publish(LifecycleEvent::Started { camera_id });
        log::info!("camera {}: detection loop running ({})", camera_id, engine.name());

        let settings = &*self.settings;
        let params = TrackParams {
            confidence_threshold: settings.confidence_threshold,
            device_args: &self.selection.device_args,
            tracker_config: &settings.tracker_config,
        };
        let mut counter = CrossingCounter::new();
        let mut geometry: Option<((u32, u32), CountingGeometry)> = None;
        let mut failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let read = source.read();
            if self.cancel.is_cancelled() {
                break;
            }

            let frame = match read {
                Ok(Some(frame)) => {
                    failures = 0;
                    frame
                }
                empty_or_failed => {
                    failures += 1;
                    if let Err(e) = empty_or_failed {
                        log::debug!("camera {}: read failed ({}): {:#}", camera_id, failures, e);
                    }
                    if failures > settings.max_detection_failures {
                        bail!("stream lost after {} consecutive read failures", failures);
                    }
                    if self.cancel.wait_timeout(READ_RETRY_WAIT) {
                        break;
                    }
                    continue;
                }
            };

            let size = (frame.width, frame.height);
            let geom = match geometry {
                Some((cached, g)) if cached == size => g,
                _ => {
                    let g = CountingGeometry::from_frame(
                        frame.width,
                        frame.height,
                        settings.count_line_position,
                        settings.count_line_width,
                    );
                    geometry = Some((size, g));
                    g
                }
            };

            let detections = engine
                .track(&frame, &params)
                .with_context(|| format!("inference failed on frame {}", frame.sequence))?;
            if self.cancel.is_cancelled() {
                break;
            }

            for det in &detections {
                let Some(track_id) = det.track_id else {
                    continue;
                };
                if counter.update(track_id, &det.bbox, geom.line_y, geom.zone) {
                    let count = session::lock(&self.session).increment();
                    log::info!(
                        target: "count",
                        "camera={} track_id={} count={} fraction_below={:.2}",
                        camera_id,
                        track_id,
                        count,
                        fraction_below(&det.bbox, geom.line_y).unwrap_or_default()
                    );
                }
            }
            counter.finish_frame();

            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(cb) = callback.as_mut() {
                let count = session::lock(&self.session).detection_count;
                let annotated = annotate(&frame, &geom, &detections, count);
                deliver(cb, camera_id, count, &annotated);
            }
        }
        Ok(())
    }
}

/// Invoke the update callback, containing any panic it raises.
fn deliver(callback: &mut UpdateCallback, camera_id: u32, count: u64, frame: &Frame) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| callback(camera_id, count, frame)));
    if let Err(payload) = result {
        log::error!(
            "camera {}: update callback panicked: {}",
            camera_id,
            panic_message(payload.as_ref())
        );
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, DeviceArgs};
    use crate::camera::CameraSource;
    use crate::detect::{BoundingBox, InferenceEngine, TrackedDetection};
    use crate::session::{CargoType, DetectionSession};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed list of reads, then reports empty reads forever.
    struct ScriptedSource {
        reads: VecDeque<Option<Frame>>,
        released: Arc<AtomicBool>,
    }

    impl CaptureSource for ScriptedSource {
        fn read(&mut self) -> Result<Option<Frame>> {
            Ok(self.reads.pop_front().flatten())
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct ScriptedOpener {
        frames: usize,
        released: Arc<AtomicBool>,
        fail: bool,
    }

    impl CaptureOpener for ScriptedOpener {
        fn open(&self, _source: &CameraSource) -> Result<Box<dyn CaptureSource>> {
            if self.fail {
                bail!("refused");
            }
            let mut reads = VecDeque::new();
            for seq in 0..self.frames {
                reads.push_back(Some(Frame::blank(100, 100, seq as u64)?));
            }
            Ok(Box::new(ScriptedSource {
                reads,
                released: Arc::clone(&self.released),
            }))
        }
    }

    /// One object per frame with a scripted fraction below the y=50 line.
    struct FractionEngine {
        fractions: VecDeque<f32>,
    }

    impl InferenceEngine for FractionEngine {
        fn name(&self) -> &'static str {
            "fraction"
        }

        fn track(&mut self, _frame: &Frame, _params: &TrackParams<'_>) -> Result<Vec<TrackedDetection>> {
            let Some(fraction) = self.fractions.pop_front() else {
                return Ok(Vec::new());
            };
            let y2 = 50.0 + fraction * 40.0;
            Ok(vec![TrackedDetection {
                bbox: BoundingBox::new(40.0, y2 - 40.0, 60.0, y2),
                track_id: Some(1),
                class_id: 0,
                confidence: 0.9,
            }])
        }
    }

    struct FractionLoader(Vec<f32>);

    impl ModelLoader for FractionLoader {
        fn load(&self, _selection: &BackendSelection) -> Result<Box<dyn InferenceEngine>> {
            Ok(Box::new(FractionEngine {
                fractions: self.0.iter().copied().collect(),
            }))
        }
    }

    struct Harness {
        worker: CameraWorker,
        released: Arc<AtomicBool>,
        events: crossbeam_channel::Receiver<LifecycleEvent>,
    }

    fn harness(fractions: Vec<f32>, frames: usize, fail_open: bool) -> Harness {
        let released = Arc::new(AtomicBool::new(false));
        let bus = Arc::new(EventBus::new());
        let events = bus.subscribe();
        let settings = DetectionSettings {
            max_detection_failures: 2,
            ..Default::default()
        };
        let worker = CameraWorker {
            camera: CameraConfig {
                id: 5,
                name: "test".into(),
                description: String::new(),
                source: CameraSource::Device(0),
                enabled: true,
            },
            session: Arc::new(Mutex::new(DetectionSession::new(
                5,
                "tester",
                Backend::Cpu,
                CargoType::default(),
            ))),
            selection: Arc::new(BackendSelection {
                backend: Backend::Cpu,
                model_path: "models/best.pt".into(),
                device_args: DeviceArgs::new(),
            }),
            settings: Arc::new(settings),
            loader: Arc::new(FractionLoader(fractions)),
            opener: Arc::new(ScriptedOpener {
                frames,
                released: Arc::clone(&released),
                fail: fail_open,
            }),
            cancel: CancelToken::new(),
            events: bus,
        };
        Harness {
            worker,
            released,
            events,
        }
    }

    #[test]
    fn counts_crossings_then_reports_stream_lost() {
        let h = harness(vec![0.9, 0.75, 0.5, 0.3, 0.8, 0.4], 6, false);
        let session = Arc::clone(&h.worker.session);
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        let callback: UpdateCallback = Box::new(move |camera_id, count, _frame: &Frame| {
            sink.lock().unwrap().push((camera_id, count));
        });

        let outcome = h.worker.run(Some(callback));

        match outcome {
            WorkerOutcome::Failed(reason) => assert!(reason.contains("stream lost"), "{}", reason),
            other => panic!("unexpected outcome {:?}", other),
        }
        let session = session.lock().unwrap();
        assert_eq!(session.detection_count, 2);
        assert!(session.end_time.is_some());
        assert!(h.released.load(Ordering::SeqCst));

        let counts: Vec<u64> = updates.lock().unwrap().iter().map(|&(_, c)| c).collect();
        assert_eq!(counts, vec![0, 0, 1, 1, 1, 2]);
        assert_eq!(h.events.try_recv().ok(), Some(LifecycleEvent::Started { camera_id: 5 }));
    }

    #[test]
    fn connection_failure_is_fatal_and_never_starts() {
        let h = harness(Vec::new(), 0, true);
        let session = Arc::clone(&h.worker.session);
        let outcome = h.worker.run(None);
        match outcome {
            WorkerOutcome::Failed(reason) => assert!(reason.contains("connection error"), "{}", reason),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(session.lock().unwrap().end_time.is_some());
        assert!(h.events.try_recv().is_err());
    }

    #[test]
    fn panicking_callback_does_not_stop_the_worker() {
        let h = harness(vec![0.9, 0.5], 4, false);
        let calls = Arc::new(Mutex::new(0u32));
        let seen = Arc::clone(&calls);
        let callback: UpdateCallback = Box::new(move |_, _, _frame: &Frame| {
            *seen.lock().unwrap() += 1;
            panic!("ui exploded");
        });
        let session = Arc::clone(&h.worker.session);

        let outcome = h.worker.run(Some(callback));

        assert!(matches!(outcome, WorkerOutcome::Failed(ref r) if r.contains("stream lost")));
        assert_eq!(*calls.lock().unwrap(), 4);
        assert_eq!(session.lock().unwrap().detection_count, 1);
    }

    #[test]
    fn cancelled_worker_stops_cleanly() {
        let h = harness(Vec::new(), 1000, false);
        let cancel = h.worker.cancel.clone();
        let released = Arc::clone(&h.released);
        let handle = std::thread::spawn(move || h.worker.run(None));
        std::thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert_eq!(handle.join().unwrap(), WorkerOutcome::Stopped);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn panic_inside_the_loop_is_reported_as_failure() {
        struct PanickingLoader;
        impl ModelLoader for PanickingLoader {
            fn load(&self, _selection: &BackendSelection) -> Result<Box<dyn InferenceEngine>> {
                panic!("driver crashed");
            }
        }
        let mut h = harness(Vec::new(), 0, false);
        h.worker.loader = Arc::new(PanickingLoader);
        let session = Arc::clone(&h.worker.session);
        let outcome = h.worker.run(None);
        assert_eq!(
            outcome,
            WorkerOutcome::Failed("worker panicked: driver crashed".into())
        );
        assert!(session.lock().unwrap().end_time.is_some());
    }

    #[test]
    fn panicking_release_still_reports_an_outcome() {
        struct BadRelease;
        impl CaptureSource for BadRelease {
            fn read(&mut self) -> Result<Option<Frame>> {
                Ok(None)
            }

            fn release(&mut self) {
                panic!("device already unplugged");
            }
        }
        struct BadReleaseOpener;
        impl CaptureOpener for BadReleaseOpener {
            fn open(&self, _source: &CameraSource) -> Result<Box<dyn CaptureSource>> {
                Ok(Box::new(BadRelease))
            }
        }

        let mut h = harness(Vec::new(), 0, false);
        h.worker.opener = Arc::new(BadReleaseOpener);
        let session = Arc::clone(&h.worker.session);
        let outcome = h.worker.run(None);

        assert!(matches!(outcome, WorkerOutcome::Failed(ref r) if r.contains("stream lost")));
        assert!(session.lock().unwrap().end_time.is_some());
    }
}
