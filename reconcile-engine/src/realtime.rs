//! C10: subscription lifecycle over a [`RealtimeCollaborator`], with
//! auto-reconnect and per-family debounced incremental-sync triggers (spec
//! §4.10). Connection state transitions and reconnect policy are grounded
//! on the same retry-with-backoff shape C6 uses for per-record uploads,
//! but with a fixed delay rather than exponential.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reconcile_core::{RealtimeCollaborator, RealtimeEvent};
use tokio::sync::mpsc;
use tracing::{instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

pub struct RealtimeFanIn {
    collaborator: Arc<dyn RealtimeCollaborator>,
    reconnect_max_attempts: u32,
    reconnect_delay: Duration,
    debounce: Duration,
    state: Mutex<HashMap<String, ConnectionState>>,
}

impl RealtimeFanIn {
    pub fn new(
        collaborator: Arc<dyn RealtimeCollaborator>,
        reconnect_max_attempts: u32,
        reconnect_delay_secs: u64,
        debounce_secs: u64,
    ) -> Self {
        RealtimeFanIn {
            collaborator,
            reconnect_max_attempts,
            reconnect_delay: Duration::from_secs(reconnect_delay_secs),
            debounce: Duration::from_secs(debounce_secs),
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn connection_state(&self, family: &str) -> ConnectionState {
        self.state
            .lock()
            .get(family)
            .copied()
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Subscribes to `family`'s change stream, emitting at most one
    /// debounced trigger per window on `triggers`. A failing subscription is
    /// isolated: it retries up to `reconnect_max_attempts` and then settles
    /// into `Error`, never panicking the fan-in as a whole.
    #[instrument(skip(self, triggers))]
    pub async fn run_family(&self, family: String, triggers: mpsc::Sender<String>) {
        let mut attempt = 0u32;
        loop {
            self.set_state(&family, ConnectionState::Connecting);
            match self.collaborator.subscribe(&family).await {
                Ok(subscription_id) => {
                    self.set_state(&family, ConnectionState::Connected);
                    attempt = 0;
                    self.drain_events(&family, &triggers).await;
                    let _ = self.collaborator.unsubscribe(&subscription_id).await;
                    self.set_state(&family, ConnectionState::Disconnected);
                }
                Err(err) => {
                    warn!(family = %family, error = %err, "realtime subscribe failed");
                    self.set_state(&family, ConnectionState::Error);
                }
            }

            attempt += 1;
            if attempt >= self.reconnect_max_attempts {
                break;
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn drain_events(&self, family: &str, triggers: &mpsc::Sender<String>) {
        let mut last_sent = None::<tokio::time::Instant>;
        loop {
            match self.collaborator.next_event().await {
                Ok(Some(event)) => {
                    if should_emit(&event, family) {
                        let now = tokio::time::Instant::now();
                        let should_send = last_sent.map(|t| now.duration_since(t) >= self.debounce).unwrap_or(true);
                        if should_send {
                            last_sent = Some(now);
                            let _ = triggers.send(family.to_string()).await;
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(family = %family, error = %err, "realtime event stream error");
                    break;
                }
            }
        }
    }

    fn set_state(&self, family: &str, state: ConnectionState) {
        self.state.lock().insert(family.to_string(), state);
    }
}

fn should_emit(event: &RealtimeEvent, family: &str) -> bool {
    event.table == family
}
