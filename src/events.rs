//! Lifecycle events and per-frame updates leaving the kernel.

use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;

use crate::frame::Frame;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Starting { camera_id: u32 },
    Started { camera_id: u32 },
    Stopped { camera_id: u32 },
    Failed { camera_id: u32, reason: String },
    CountReset { camera_id: u32 },
}

impl LifecycleEvent {
    pub fn camera_id(&self) -> u32 {
        match self {
            LifecycleEvent::Starting { camera_id }
            | LifecycleEvent::Started { camera_id }
            | LifecycleEvent::Stopped { camera_id }
            | LifecycleEvent::Failed { camera_id, .. }
            | LifecycleEvent::CountReset { camera_id } => *camera_id,
        }
    }

    /// `Stopped` and `Failed` end a session; exactly one is published per start.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::Stopped { .. } | LifecycleEvent::Failed { .. }
        )
    }
}

/// How a worker's loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerOutcome {
    Stopped,
    Failed(String),
}

impl WorkerOutcome {
    pub fn into_event(self, camera_id: u32) -> LifecycleEvent {
        match self {
            WorkerOutcome::Stopped => LifecycleEvent::Stopped { camera_id },
            WorkerOutcome::Failed(reason) => LifecycleEvent::Failed { camera_id, reason },
        }
    }
}

/// Fan-out of lifecycle events to any number of subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<LifecycleEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<LifecycleEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn publish(&self, event: LifecycleEvent) {
        log::debug!("lifecycle event: {:?}", event);
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Called by a worker once per processed frame with `(camera_id, count, annotated_frame)`.
pub type UpdateCallback = Box<dyn FnMut(u32, u64, &Frame) + Send>;

#[derive(Clone, Debug)]
pub struct FrameUpdate {
    pub camera_id: u32,
    pub count: u64,
    pub frame: Frame,
}

/// Callback that forwards updates into a bounded channel.
///
/// Updates are dropped while the channel is full so a slow consumer never
/// stalls the worker.
pub fn channel_callback(capacity: usize) -> (UpdateCallback, Receiver<FrameUpdate>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let callback: UpdateCallback = Box::new(move |camera_id, count, frame: &Frame| {
        let update = FrameUpdate {
            camera_id,
            count,
            frame: frame.clone(),
        };
        match tx.try_send(update) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                log::trace!("frame update receiver for camera {} is gone", camera_id)
            }
        }
    });
    (callback, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(LifecycleEvent::Starting { camera_id: 3 });
        bus.publish(LifecycleEvent::Stopped { camera_id: 3 });

        for rx in [a, b] {
            let got: Vec<LifecycleEvent> = rx.try_iter().collect();
            assert_eq!(
                got,
                vec![
                    LifecycleEvent::Starting { camera_id: 3 },
                    LifecycleEvent::Stopped { camera_id: 3 }
                ]
            );
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        bus.publish(LifecycleEvent::CountReset { camera_id: 0 });
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn channel_callback_drops_when_full() -> anyhow::Result<()> {
        let (mut callback, rx) = channel_callback(1);
        let frame = Frame::blank(4, 4, 0)?;
        callback(1, 5, &frame);
        callback(1, 6, &frame);
        let updates: Vec<FrameUpdate> = rx.try_iter().collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].count, 5);
        drop(rx);
        callback(1, 7, &frame);
        Ok(())
    }

    #[test]
    fn events_serialize_with_tag() -> anyhow::Result<()> {
        let json = serde_json::to_value(LifecycleEvent::Failed {
            camera_id: 2,
            reason: "connection error".into(),
        })?;
        assert_eq!(json["event"], "failed");
        assert_eq!(json["camera_id"], 2);
        assert!(WorkerOutcome::Stopped.into_event(2).is_terminal());
        Ok(())
    }
}
