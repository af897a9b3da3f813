//! Progress channel: `GET /ws/render`.
//!
//! Clients authenticate with a bearer token (header or `token` query
//! parameter), then subscribe per render id:
//!
//! ```text
//! {"action":"subscribe-render","renderId":"..."}
//! {"action":"unsubscribe-render","renderId":"..."}
//! ```
//!
//! Render events are forwarded as `{"event":"render:progress","data":{...}}`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vedit_models::{RenderEvent, RenderId, RenderStatusView};
use vedit_queue::{SubscriberId, Subscription};

use crate::auth::{bearer_token, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

const WS_SEND_BUFFER_SIZE: usize = 64;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Upper bound on render ids one socket may follow.
const MAX_SUBSCRIPTIONS_PER_SOCKET: usize = 32;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Client frames.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    SubscribeRender { render_id: RenderId },
    #[serde(rename_all = "camelCase")]
    UnsubscribeRender { render_id: RenderId },
}

/// Server frames that are not render events.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ControlFrame {
    /// Carries the current status so late subscribers see terminal results.
    #[serde(rename = "subscribed")]
    Subscribed { status: RenderStatusView },
    #[serde(rename = "unsubscribed", rename_all = "camelCase")]
    Unsubscribed { render_id: RenderId },
    #[serde(rename = "error")]
    Error { message: String },
}

/// GET /ws/render
pub async fn ws_render(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    parts: RequestAuth,
) -> Response {
    let token = match parts.0.or(query.token) {
        Some(token) => token,
        None => return ApiError::unauthorized("Missing token").into_response(),
    };
    let user = match state.auth.verify_token(&token) {
        Ok(claims) => AuthUser::from(claims),
        Err(e) => return e.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_ws_active_connections(count);
        metrics::record_ws_connection();

        handle_socket(socket, state, user).await;
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    })
}

/// Bearer token from the Authorization header, if any.
pub struct RequestAuth(Option<String>);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(bearer_token(parts).map(str::to_string)))
    }
}

struct ActiveSubscription {
    subscriber: SubscriberId,
    forwarder: JoinHandle<()>,
}

async fn handle_socket(socket: WebSocket, state: AppState, user: AuthUser) {
    let (mut ws_sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);

    info!(user_id = %user.user_id, "Progress socket connected");

    let send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(WS_HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        if ws_sender.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut subscriptions: HashMap<RenderId, ActiveSubscription> = HashMap::new();

    while let Some(Ok(message)) = receiver.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        metrics::record_ws_message_received();

        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                send_control(&tx, ControlFrame::Error {
                    message: format!("Invalid message: {}", e),
                })
                .await;
                continue;
            }
        };

        match frame {
            ClientFrame::SubscribeRender { render_id } => {
                subscribe(&state, &user, &tx, &mut subscriptions, render_id).await;
            }
            ClientFrame::UnsubscribeRender { render_id } => {
                if let Some(active) = subscriptions.remove(&render_id) {
                    active.forwarder.abort();
                    state.broadcaster.unsubscribe(&render_id, active.subscriber).await;
                }
                send_control(&tx, ControlFrame::Unsubscribed { render_id }).await;
            }
        }
    }

    for (render_id, active) in subscriptions.drain() {
        active.forwarder.abort();
        state.broadcaster.unsubscribe(&render_id, active.subscriber).await;
    }
    drop(tx);
    let _ = send_task.await;
    info!(user_id = %user.user_id, "Progress socket closed");
}

async fn subscribe(
    state: &AppState,
    user: &AuthUser,
    tx: &mpsc::Sender<Message>,
    subscriptions: &mut HashMap<RenderId, ActiveSubscription>,
    render_id: RenderId,
) {
    if subscriptions.contains_key(&render_id) {
        match state.renders.status(&render_id, &user.user_id).await {
            Ok(status) => send_control(tx, ControlFrame::Subscribed { status }).await,
            Err(e) => send_error(tx, ApiError::from(e)).await,
        }
        return;
    }

    if subscriptions.len() >= MAX_SUBSCRIPTIONS_PER_SOCKET {
        send_control(tx, ControlFrame::Error {
            message: "Too many subscriptions on this connection".to_string(),
        })
        .await;
        return;
    }

    let (mut subscription, status) =
        match open_subscription(state, &user.user_id, render_id.clone()).await {
            Ok(opened) => opened,
            Err(e) => {
                send_error(tx, e).await;
                return;
            }
        };

    // Snapshot goes out first; events published since are buffered
    send_control(tx, ControlFrame::Subscribed { status }).await;

    let subscriber = subscription.id;
    let events_tx = tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            if !send_event(&events_tx, &event).await {
                break;
            }
        }
    });
    subscriptions.insert(
        render_id.clone(),
        ActiveSubscription {
            subscriber,
            forwarder,
        },
    );
    debug!(render_id = %render_id, user_id = %user.user_id, "Subscribed to render");
}

/// Register with the broadcaster, then read the status snapshot.
///
/// Registering first means a terminal event published in between is either
/// in the snapshot or in the subscription. The ownership check rides on the
/// status read; a rejected caller is unregistered again.
pub(crate) async fn open_subscription(
    state: &AppState,
    user_id: &str,
    render_id: RenderId,
) -> ApiResult<(Subscription, RenderStatusView)> {
    let subscription = state.broadcaster.subscribe(render_id.clone()).await;
    match state.renders.status(&render_id, user_id).await {
        Ok(status) => Ok((subscription, status)),
        Err(e) => {
            state.broadcaster.unsubscribe(&render_id, subscription.id).await;
            Err(e.into())
        }
    }
}

async fn send_error(tx: &mpsc::Sender<Message>, err: ApiError) {
    send_control(tx, ControlFrame::Error {
        message: err.to_string(),
    })
    .await;
}

async fn send_event(tx: &mpsc::Sender<Message>, event: &RenderEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to serialize render event");
            return true;
        }
    };
    metrics::record_ws_message_sent(event.name());
    tx.send(Message::Text(json)).await.is_ok()
}

async fn send_control(tx: &mpsc::Sender<Message>, frame: ControlFrame) {
    if let Ok(json) = serde_json::to_string(&frame) {
        metrics::record_ws_message_sent("control");
        let _ = tx.send(Message::Text(json)).await;
    }
}
