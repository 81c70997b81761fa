use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use super::state::PipelineState;
use crate::error::Failure;

/// Notifications for the user interface
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateChanged {
        from: PipelineState,
        to: PipelineState,
    },
    /// Compute fell back to the CPU
    Degraded { reason: String },
    Failed(Failure),
    DeviceSwitched { device: u32 },
    /// The new camera could not deliver the session format; the old one stays
    DeviceSwitchRejected { device: u32, reason: String },
}

/// Fan-out of events to every live subscriber
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<Sender<PipelineEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: PipelineEvent) {
        // drop subscribers whose receiver is gone
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_receives() {
        let bus = EventBus::default();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.emit(PipelineEvent::DeviceSwitched { device: 2 });
        assert_eq!(a.try_recv().unwrap(), PipelineEvent::DeviceSwitched { device: 2 });
        assert_eq!(b.try_recv().unwrap(), PipelineEvent::DeviceSwitched { device: 2 });
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::default();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        bus.emit(PipelineEvent::Degraded { reason: "x".into() });
        assert_eq!(bus.subscribers.lock().len(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
