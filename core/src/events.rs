use janitor_api::AuditMode;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

/// Lifecycle notifications for observers of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    Started { run_id: Uuid, mode: AuditMode },
    Completed { run_id: Uuid, orphan_files: usize, orphan_records: usize },
    Failed { run_id: Uuid, reason: String },
    /// A launch check found the current version already cleaned.
    Skipped { version: String },
}

/// Small fan-out bus; closed subscribers are dropped on the next publish.
pub struct EventBus {
    subscribers: Vec<UnboundedSender<AuditEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<AuditEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn publish(&mut self, event: AuditEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_subscribers_are_dropped() {
        let mut bus = EventBus::new();
        let mut kept = bus.subscribe();
        let dropped = bus.subscribe();
        drop(dropped);
        bus.publish(AuditEvent::Skipped {
            version: "1".into(),
        });
        assert_eq!(bus.subscribers.len(), 1);
        assert_eq!(
            kept.try_recv().unwrap(),
            AuditEvent::Skipped {
                version: "1".into()
            }
        );
    }
}
