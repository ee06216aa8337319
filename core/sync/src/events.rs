//! Change notifications for status consumers.

use std::time::Duration;
use tokio::sync::broadcast;

use offsync_common::{ConflictStrategy, TaskId};

use crate::scheduler::{CycleReport, SyncTrigger};
use crate::state::{SyncStats, SyncStatus};

/// Capacity of the event channel; slow subscribers see `Lagged` past this.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something observable changed in the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    TaskAdded { id: TaskId },
    TaskRemoved { id: TaskId },
    TaskCompleted { id: TaskId, duration: Duration },
    /// Failed attempt, re-queued with backoff.
    TaskRetrying { id: TaskId, retry_count: u32, error: String },
    /// Retry budget exhausted or conflict left without a resolution path.
    TaskFailed { id: TaskId, error: String },
    ConflictDetected { id: TaskId },
    ConflictResolved { id: TaskId, strategy: ConflictStrategy, confidence: f64 },
    AwaitingUserChoice { id: TaskId },
    /// A configuration problem was hit mid-cycle and a fallback was used.
    ConfigurationError { id: Option<TaskId>, message: String },
    TasksCleared { count: usize },
    TasksExpired { count: usize },
    CycleStarted { trigger: SyncTrigger },
    CycleFinished { report: CycleReport },
    NetworkChanged { online: bool },
    ConfigChanged,
    StatusChanged { status: SyncStatus, stats: SyncStats },
}

/// Fan-out of [`SyncEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is fine.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
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

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(SyncEvent::ConfigChanged);
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::ConfigChanged);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(SyncEvent::NetworkChanged { online: false });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
