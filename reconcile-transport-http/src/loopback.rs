//! In-memory `RemoteCollaborator` + `RealtimeCollaborator` pair for fast
//! tests: no sockets, same trait surface as [`crate::http::HttpRemoteCollaborator`]
//! / [`crate::ws::WsRealtimeCollaborator`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reconcile_core::{
    RealtimeCollaborator, RealtimeEvent, RemoteCollaborator, RemoteUpsertOutcome, Snapshot, SyncId, SyncResult,
};
use tokio::sync::mpsc;

#[derive(Default)]
struct Table {
    rows: HashMap<SyncId, Snapshot>,
}

/// A remote collaborator backed by an in-process table, keyed by family.
#[derive(Default)]
pub struct LoopbackRemote {
    families: Mutex<HashMap<String, Table>>,
}

impl LoopbackRemote {
    pub fn new() -> Self {
        LoopbackRemote::default()
    }

    pub fn seed(&self, family: &str, snapshot: Snapshot) {
        self.families
            .lock()
            .entry(family.to_string())
            .or_default()
            .rows
            .insert(snapshot.sync_id, snapshot);
    }
}

#[async_trait]
impl RemoteCollaborator for LoopbackRemote {
    async fn upsert_batch(&self, family: &str, snapshots: &[Snapshot]) -> SyncResult<Vec<RemoteUpsertOutcome>> {
        let mut families = self.families.lock();
        let table = families.entry(family.to_string()).or_default();
        Ok(snapshots
            .iter()
            .map(|snapshot| {
                table.rows.insert(snapshot.sync_id.clone(), snapshot.clone());
                RemoteUpsertOutcome {
                    sync_id: snapshot.sync_id.clone(),
                    accepted: true,
                    error: None,
                    schema_incompatible: false,
                }
            })
            .collect())
    }

    async fn delete(&self, family: &str, id: &SyncId) -> SyncResult<()> {
        if let Some(table) = self.families.lock().get_mut(family) {
            if let Some(existing) = table.rows.get_mut(id) {
                existing.is_deleted = true;
            }
        }
        Ok(())
    }

    async fn fetch(&self, family: &str, id: &SyncId) -> SyncResult<Option<Snapshot>> {
        Ok(self
            .families
            .lock()
            .get(family)
            .and_then(|table| table.rows.get(id).cloned()))
    }

    async fn fetch_modified_after(
        &self,
        family: &str,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> SyncResult<Vec<Snapshot>> {
        let families = self.families.lock();
        let mut rows: Vec<Snapshot> = families
            .get(family)
            .map(|table| {
                table
                    .rows
                    .values()
                    .filter(|snapshot| snapshot.last_modified > since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|snapshot| snapshot.last_modified);
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn fetch_deleted(
        &self,
        family: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> SyncResult<Vec<Snapshot>> {
        let families = self.families.lock();
        let mut rows: Vec<Snapshot> = families
            .get(family)
            .map(|table| {
                table
                    .rows
                    .values()
                    .filter(|snapshot| snapshot.is_deleted)
                    .filter(|snapshot| since.is_none_or(|since| snapshot.last_modified > since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|snapshot| snapshot.last_modified);
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn table_exists(&self, family: &str) -> SyncResult<bool> {
        Ok(self.families.lock().contains_key(family))
    }
}

/// A realtime collaborator whose events are injected by the test itself via
/// [`LoopbackRealtime::push`], rather than arriving over a socket.
pub struct LoopbackRealtime {
    subscriptions: Mutex<HashMap<String, String>>,
    sender: mpsc::UnboundedSender<RealtimeEvent>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<RealtimeEvent>>,
}

impl Default for LoopbackRealtime {
    fn default() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        LoopbackRealtime {
            subscriptions: Mutex::new(HashMap::new()),
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }
}

impl LoopbackRealtime {
    pub fn new() -> Self {
        LoopbackRealtime::default()
    }

    pub fn push(&self, event: RealtimeEvent) {
        let _ = self.sender.send(event);
    }
}

#[async_trait]
impl RealtimeCollaborator for LoopbackRealtime {
    async fn subscribe(&self, family: &str) -> SyncResult<String> {
        let subscription_id = uuid::Uuid::new_v4().to_string();
        self.subscriptions.lock().insert(subscription_id.clone(), family.to_string());
        Ok(subscription_id)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> SyncResult<()> {
        self.subscriptions.lock().remove(subscription_id);
        Ok(())
    }

    async fn next_event(&self) -> SyncResult<Option<RealtimeEvent>> {
        Ok(self.receiver.lock().await.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_core::{Payload, RealtimeEventType, Snapshot};

    fn snapshot(id: &str) -> Snapshot {
        Snapshot::new(id, "widgets", Payload::new())
    }

    #[tokio::test]
    async fn upsert_then_fetch_round_trips() {
        let remote = LoopbackRemote::new();
        let snap = snapshot("a");
        remote.upsert_batch("widgets", &[snap.clone()]).await.unwrap();
        let fetched = remote.fetch("widgets", &snap.sync_id).await.unwrap();
        assert_eq!(fetched.unwrap().sync_id, snap.sync_id);
    }

    #[tokio::test]
    async fn delete_marks_tombstone_without_removing_row() {
        let remote = LoopbackRemote::new();
        let snap = snapshot("a");
        remote.upsert_batch("widgets", &[snap.clone()]).await.unwrap();
        remote.delete("widgets", &snap.sync_id).await.unwrap();
        let fetched = remote.fetch("widgets", &snap.sync_id).await.unwrap().unwrap();
        assert!(fetched.is_deleted);
    }

    #[tokio::test]
    async fn subscribe_then_push_delivers_event() {
        let realtime = LoopbackRealtime::new();
        let sub = realtime.subscribe("widgets").await.unwrap();
        assert!(!sub.is_empty());
        realtime.push(RealtimeEvent {
            event_type: RealtimeEventType::Insert,
            table: "widgets".to_string(),
            new: Some(snapshot("a")),
            old: None,
            timestamp: Utc::now(),
        });
        let event = realtime.next_event().await.unwrap().unwrap();
        assert_eq!(event.table, "widgets");
    }
}
