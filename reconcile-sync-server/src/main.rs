use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use clap::Parser;
use parking_lot::Mutex;
use reconcile_core::{RealtimeEvent, RealtimeEventType, RemoteUpsertOutcome, Snapshot, SyncId};
use tokio::{select, sync::broadcast};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Minimal standalone server implementing the §6 wire contract so
/// `reconcile-transport-http`'s HTTP/WS collaborators have something real
/// to talk to in a demo deployment.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let state = AppState::new();

    let app = Router::new()
        .route("/health", get(health))
        .route("/sync/{family}/upsert", post(upsert_batch))
        .route("/sync/{family}/exists", get(table_exists))
        .route("/sync/{family}/deleted", get(fetch_deleted))
        .route("/realtime", get(stream_realtime))
        .route("/sync/{family}/{id}", get(fetch_one).delete(delete_one))
        .route("/sync/{family}", get(fetch_modified_after))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("reconcile-sync-server listening on {}", args.listen);
    let listener = tokio::net::TcpListener::bind(args.listen).await.unwrap();
    axum::serve(listener, app.into_make_service()).await.unwrap();
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Default)]
struct Table {
    rows: HashMap<SyncId, Snapshot>,
}

#[derive(Clone)]
struct AppState {
    tables: Arc<Mutex<HashMap<String, Table>>>,
    notifier: broadcast::Sender<RealtimeEvent>,
}

impl AppState {
    fn new() -> Self {
        let (notifier, _rx) = broadcast::channel(256);
        AppState {
            tables: Arc::new(Mutex::new(HashMap::new())),
            notifier,
        }
    }
}

async fn upsert_batch(
    State(state): State<AppState>,
    Path(family): Path<String>,
    Json(snapshots): Json<Vec<Snapshot>>,
) -> Json<Vec<RemoteUpsertOutcome>> {
    let mut tables = state.tables.lock();
    let table = tables.entry(family.clone()).or_default();
    let mut outcomes = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots {
        let sync_id = snapshot.sync_id.clone();
        let event_type = if snapshot.is_deleted {
            RealtimeEventType::Delete
        } else if table.rows.contains_key(&sync_id) {
            RealtimeEventType::Update
        } else {
            RealtimeEventType::Insert
        };
        let old = table.rows.insert(sync_id.clone(), snapshot.clone());
        outcomes.push(RemoteUpsertOutcome {
            sync_id: sync_id.clone(),
            accepted: true,
            error: None,
            schema_incompatible: false,
        });
        let _ = state.notifier.send(RealtimeEvent {
            event_type,
            table: family.clone(),
            new: Some(snapshot),
            old,
            timestamp: Utc::now(),
        });
    }
    Json(outcomes)
}

async fn delete_one(
    State(state): State<AppState>,
    Path((family, id)): Path<(String, SyncId)>,
) -> StatusCode {
    let mut tables = state.tables.lock();
    let Some(table) = tables.get_mut(&family) else {
        return StatusCode::NOT_FOUND;
    };
    let Some(existing) = table.rows.get_mut(&id) else {
        return StatusCode::NOT_FOUND;
    };
    existing.is_deleted = true;
    existing.last_modified = Utc::now();
    let snapshot = existing.clone();
    drop(tables);
    let _ = state.notifier.send(RealtimeEvent {
        event_type: RealtimeEventType::Delete,
        table: family,
        new: Some(snapshot),
        old: None,
        timestamp: Utc::now(),
    });
    StatusCode::NO_CONTENT
}

async fn fetch_one(
    State(state): State<AppState>,
    Path((family, id)): Path<(String, SyncId)>,
) -> Result<Json<Snapshot>, StatusCode> {
    state
        .tables
        .lock()
        .get(&family)
        .and_then(|table| table.rows.get(&id).cloned())
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(serde::Deserialize)]
struct ModifiedAfterQuery {
    modified_after: DateTime<Utc>,
    limit: Option<usize>,
}

async fn fetch_modified_after(
    State(state): State<AppState>,
    Path(family): Path<String>,
    Query(query): Query<ModifiedAfterQuery>,
) -> Json<Vec<Snapshot>> {
    let tables = state.tables.lock();
    let mut rows: Vec<Snapshot> = tables
        .get(&family)
        .map(|table| {
            table
                .rows
                .values()
                .filter(|snapshot| snapshot.last_modified > query.modified_after)
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    rows.sort_by_key(|snapshot| snapshot.last_modified);
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }
    Json(rows)
}

#[derive(serde::Deserialize)]
struct DeletedQuery {
    since: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

async fn fetch_deleted(
    State(state): State<AppState>,
    Path(family): Path<String>,
    Query(query): Query<DeletedQuery>,
) -> Json<Vec<Snapshot>> {
    let tables = state.tables.lock();
    let mut rows: Vec<Snapshot> = tables
        .get(&family)
        .map(|table| {
            table
                .rows
                .values()
                .filter(|snapshot| snapshot.is_deleted)
                .filter(|snapshot| query.since.is_none_or(|since| snapshot.last_modified > since))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    rows.sort_by_key(|snapshot| snapshot.last_modified);
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }
    Json(rows)
}

#[derive(serde::Serialize)]
struct TableExistsResponse {
    exists: bool,
}

async fn table_exists(State(state): State<AppState>, Path(family): Path<String>) -> Json<TableExistsResponse> {
    Json(TableExistsResponse {
        exists: state.tables.lock().contains_key(&family),
    })
}

async fn stream_realtime(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let receiver = state.notifier.subscribe();
    ws.on_upgrade(move |socket| handle_ws(socket, receiver))
}

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage {
    Subscribe { subscription_id: String, family: String },
    Unsubscribe { subscription_id: String },
}

/// One socket carries every family a client has subscribed to, matching
/// `RealtimeCollaborator::next_event`'s single untyped stream — the
/// client-side fan-in filters by `event.table`, so this handler only needs
/// to track which families have at least one live subscription.
async fn handle_ws(mut socket: WebSocket, mut receiver: broadcast::Receiver<RealtimeEvent>) {
    let mut families_by_subscription: HashMap<String, String> = HashMap::new();
    loop {
        select! {
            event = receiver.recv() => {
                match event {
                    Ok(event) if families_by_subscription.values().any(|family| *family == event.table) => {
                        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(control) = serde_json::from_str::<ControlMessage>(text.as_str()) {
                            match control {
                                ControlMessage::Subscribe { subscription_id, family } => {
                                    families_by_subscription.insert(subscription_id, family);
                                }
                                ControlMessage::Unsubscribe { subscription_id } => {
                                    families_by_subscription.remove(&subscription_id);
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => continue,
                    _ => break,
                }
            }
        }
    }
}
