//! `tokio-tungstenite`-backed [`RealtimeCollaborator`]. One socket per
//! collaborator instance; subscriptions are multiplexed over it by
//! `subscription_id`, mirroring server-side fan-out to many clients as one
//! client-side connection fanned out to many families.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reconcile_core::{RealtimeCollaborator, RealtimeEvent, SyncError, SyncResult};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage<'a> {
    Subscribe { subscription_id: &'a str, family: &'a str },
    Unsubscribe { subscription_id: &'a str },
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct WsRealtimeCollaborator {
    writer: Mutex<futures_util::stream::SplitSink<WsStream, Message>>,
    events: Mutex<mpsc::UnboundedReceiver<RealtimeEvent>>,
}

impl WsRealtimeCollaborator {
    pub async fn connect(url: &str) -> SyncResult<Self> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|err| SyncError::Unknown { message: err.to_string() })?;
        let (writer, mut reader) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                let Ok(frame) = frame else { break };
                let Message::Text(text) = frame else { continue };
                if let Ok(event) = serde_json::from_str::<RealtimeEvent>(text.as_str()) {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(WsRealtimeCollaborator {
            writer: Mutex::new(writer),
            events: Mutex::new(rx),
        })
    }

    async fn send_control(&self, message: ControlMessage<'_>) -> SyncResult<()> {
        let text = serde_json::to_string(&message).map_err(|err| SyncError::Unknown { message: err.to_string() })?;
        self.writer
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|err| SyncError::Unknown { message: err.to_string() })
    }
}

#[async_trait]
impl RealtimeCollaborator for WsRealtimeCollaborator {
    async fn subscribe(&self, family: &str) -> SyncResult<String> {
        let subscription_id = Uuid::new_v4().to_string();
        self.send_control(ControlMessage::Subscribe {
            subscription_id: &subscription_id,
            family,
        })
        .await?;
        Ok(subscription_id)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> SyncResult<()> {
        self.send_control(ControlMessage::Unsubscribe { subscription_id }).await
    }

    async fn next_event(&self) -> SyncResult<Option<RealtimeEvent>> {
        Ok(self.events.lock().await.recv().await)
    }
}
