// §4.G Connection Endpoint + §4.H Client I/O Loops. Grounded on the
// teacher's `ws_handler`/`handle_socket` split in `websocket.rs`,
// generalized from an unbounded internal relay channel to the client's
// own bounded outbound queue, and with the origin policy and deadlines
// §4.G/§4.H require added on top.
use crate::app_state::AppState;
use crate::errors::AktuellError;
use crate::models::{ClientMessage, HealthData, ServerMessage, SubscribeAckData};
use crate::registry::Client;
use crate::snapshot;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

const READ_DEADLINE: Duration = Duration::from_secs(60);
const WRITE_DEADLINE_NORMAL: Duration = Duration::from_secs(10);
const WRITE_DEADLINE_SNAPSHOT: Duration = Duration::from_secs(30);
const PING_INTERVAL: Duration = Duration::from_secs(54);

/// Origin policy knobs, read directly from the process environment (not
/// through the layered `AppConfig`) per §4.G.
pub struct OriginPolicy {
    pub production: bool,
    pub allowed_origins: Vec<String>,
}

impl OriginPolicy {
    pub fn from_process_env() -> Self {
        let env = std::env::var("ENV").unwrap_or_else(|_| "development".to_string());
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            production: env.eq_ignore_ascii_case("production"),
            allowed_origins,
        }
    }

    /// True iff `origin` should be allowed to upgrade, per §4.G.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        if self.production {
            return match origin {
                Some(o) => self.allowed_origins.iter().any(|a| a == o.trim()),
                None => false,
            };
        }

        match origin {
            None => true,
            Some(o) => {
                let trimmed = o.trim();
                trimmed.is_empty()
                    || trimmed.contains("localhost")
                    || trimmed.contains("127.0.0.1")
                    || self.allowed_origins.iter().any(|a| a == trimmed)
            }
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let policy = OriginPolicy::from_process_env();

    if !policy.allows(origin.as_deref()) {
        warn!(origin = ?origin, "rejected websocket upgrade: origin not allowed");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4().to_string();
    let (ws_sender, mut ws_receiver) = socket.split();

    let (client, outbound_rx) = Client::new(client_id.clone());
    let client = Arc::new(client);
    state.hub.register(client.clone()).await;

    let writer_task = tokio::spawn(run_writer(client.clone(), ws_sender, outbound_rx));

    let mut read_deadline = Instant::now() + READ_DEADLINE;
    loop {
        tokio::select! {
            biased;
            _ = tokio::time::sleep_until(read_deadline) => {
                info!(client_id = %client_id, "read deadline elapsed, closing connection");
                break;
            }
            maybe_msg = ws_receiver.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_client_message(&state, &client, &text).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        read_deadline = Instant::now() + READ_DEADLINE;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    info!(client_id = %client_id, "client disconnecting");
    state.hub.unregister(client_id.clone()).await;
    client.remove_all().await;
    client.close();
    writer_task.abort();
}

async fn run_writer(
    client: Arc<Client>,
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: tokio::sync::mpsc::Receiver<ServerMessage>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            biased;
            _ = client.closed_notify.notified() => {
                break;
            }
            maybe_msg = outbound_rx.recv() => {
                let Some(msg) = maybe_msg else { break };
                let deadline = if matches!(msg, ServerMessage::SnapshotBatch { .. }) {
                    WRITE_DEADLINE_SNAPSHOT
                } else {
                    WRITE_DEADLINE_NORMAL
                };
                let text = match serde_json::to_string(&msg) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(error = %e, "failed to encode outbound message");
                        continue;
                    }
                };
                let sent = tokio::time::timeout(deadline, ws_sender.send(Message::Text(text.into()))).await;
                match sent {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
            _ = ping_interval.tick() => {
                let sent = tokio::time::timeout(
                    WRITE_DEADLINE_NORMAL,
                    ws_sender.send(Message::Ping(Vec::new().into())),
                )
                .await;
                if !matches!(sent, Ok(Ok(()))) {
                    break;
                }
            }
        }
    }

    client.close();
}

async fn dispatch_client_message(state: &AppState, client: &Arc<Client>, text: &str) {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(client_id = %client.id, error = %e, "failed to decode client message");
            return;
        }
    };

    match parsed {
        ClientMessage::Subscribe {
            database,
            collection,
            request_id,
            snapshot_options,
        } => {
            match client
                .add_subscription(&state.validator, database.clone(), collection.clone())
                .await
            {
                Ok(sub) => {
                    let _ = client.enqueue(ServerMessage::SubscribeAck {
                        success: true,
                        request_id: request_id.clone(),
                        data: Some(SubscribeAckData {
                            subscription_id: sub.id,
                        }),
                        error: None,
                        error_code: None,
                    });

                    if let Some(opts) = snapshot_options {
                        if opts.include_snapshot {
                            let store = state.store.clone();
                            let client = client.clone();
                            tokio::spawn(snapshot::run(store, client, database, collection, opts));
                        }
                    }
                }
                Err(AktuellError::InvalidSubscription) => {
                    let _ = client.enqueue(ServerMessage::Error {
                        error: "Invalid subscription".to_string(),
                        error_code: Some(1),
                        request_id: Some(request_id),
                    });
                }
                Err(e) => {
                    warn!(client_id = %client.id, error = %e, "unexpected subscribe failure");
                }
            }
        }
        ClientMessage::Unsubscribe {
            request_id,
            subscription_id,
        } => match subscription_id {
            Some(id) => match client.remove_subscription(&id).await {
                Ok(()) => {
                    let _ = client.enqueue(ServerMessage::UnsubscribeAck {
                        success: true,
                        request_id,
                        error: None,
                    });
                }
                Err(_) => {
                    let _ = client.enqueue(ServerMessage::UnsubscribeAck {
                        success: false,
                        request_id,
                        error: Some("no such subscription".to_string()),
                    });
                }
            },
            None => {
                client.remove_all().await;
                let _ = client.enqueue(ServerMessage::UnsubscribeAck {
                    success: true,
                    request_id,
                    error: None,
                });
            }
        },
        ClientMessage::Ping { request_id } => {
            let _ = client.enqueue(ServerMessage::Pong { request_id });
        }
        ClientMessage::Health { request_id } => {
            let _ = client.enqueue(ServerMessage::HealthOk {
                success: true,
                request_id,
                data: HealthData {
                    status: "ok",
                    timestamp: Utc::now(),
                },
            });
        }
    }
}
