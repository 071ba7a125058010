//! Observer registry replacing the "observable/reactive publisher" pattern
//! (spec §9 redesign flags): handles instead of weak references, and a
//! single-writer broadcast queue per event kind so delivery order is
//! well-defined. `observe` replays the last event of the requested kind to
//! a newly-registered handler, matching how status observers typically
//! expect an immediate current-state snapshot on subscribe.

use std::collections::HashMap;

use parking_lot::Mutex;
use reconcile_core::SyncEventKind;
use tokio::sync::broadcast;

fn kind_key(event: &SyncEventKind) -> &'static str {
    match event {
        SyncEventKind::Status(_) => "status",
        SyncEventKind::Progress { .. } => "progress",
        SyncEventKind::Completion { .. } => "completion",
        SyncEventKind::Failure { .. } => "failure",
        SyncEventKind::Conflicts { .. } => "conflicts",
    }
}

pub struct EventBus {
    sender: broadcast::Sender<SyncEventKind>,
    last_by_kind: Mutex<HashMap<&'static str, SyncEventKind>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        EventBus {
            sender,
            last_by_kind: Mutex::new(HashMap::new()),
        }
    }

    pub fn publish(&self, event: SyncEventKind) {
        self.last_by_kind.lock().insert(kind_key(&event), event.clone());
        let _ = self.sender.send(event);
    }

    /// A receiver that first replays the last event of any kind (if any),
    /// then streams live events.
    pub fn subscribe(&self) -> (Option<Vec<SyncEventKind>>, broadcast::Receiver<SyncEventKind>) {
        let replay: Vec<_> = self.last_by_kind.lock().values().cloned().collect();
        let replay = if replay.is_empty() { None } else { Some(replay) };
        (replay, self.sender.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_core::EntitySyncStatus;

    #[tokio::test]
    async fn replays_last_event_per_kind_on_subscribe() {
        let bus = EventBus::new();
        bus.publish(SyncEventKind::Status(EntitySyncStatus::new("todos")));
        let (replay, _rx) = bus.subscribe();
        assert_eq!(replay.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn live_events_stream_to_subscribers() {
        let bus = EventBus::new();
        let (_replay, mut rx) = bus.subscribe();
        bus.publish(SyncEventKind::Failure {
            family: "todos".to_string(),
            error: "boom".to_string(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SyncEventKind::Failure { .. }));
    }
}
