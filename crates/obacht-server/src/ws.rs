use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use obacht_core::net::protocol::{Encoding, MAX_MESSAGE_SIZE, decode_client_message};
use obacht_core::player::PlayerId;

use crate::config::LimitsConfig;
use crate::session::SessionProtocolHandler;
use crate::state::{AppState, ConnectionGuard, Peer};

/// Query string of `GET /ws`.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Encoding of frames the server sends. Inbound frames may use either.
    #[serde(default)]
    pub encoding: Encoding,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let Some(guard) =
        ConnectionGuard::try_acquire(Arc::clone(&state.ws_connection_count), max_ws)
    else {
        let current = state.ws_connection_count.load(Ordering::Relaxed);
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    // Transport enforces only the hard cap; the configured limit is checked
    // per frame in `read_loop`.
    let hard_cap = MAX_MESSAGE_SIZE.max(state.config.limits.max_message_size);
    Ok(ws
        .max_message_size(hard_cap)
        .max_frame_size(hard_cap)
        .on_upgrade(move |socket| handle_socket(socket, state, params.encoding, guard))
        .into_response())
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    encoding: Encoding,
    _guard: ConnectionGuard,
) {
    let (ws_sender, mut ws_receiver) = socket.split();

    let player_id = PlayerId::generate();
    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.player_message_buffer);
    let mut handler = SessionProtocolHandler::new(player_id.clone());

    {
        let mut peers = state.peers.write().await;
        peers.register(
            player_id.clone(),
            Peer {
                sender: tx,
                encoding,
            },
        );
        peers.deliver(vec![handler.greeting()]);
    }
    tracing::info!(player_id = %player_id, ?encoding, "Player connected");

    spawn_writer(ws_sender, rx, encoding);

    read_loop(&mut ws_receiver, &state, &mut handler).await;

    // Disconnect: tear down room membership before dropping the channel.
    {
        let mut directory = state.directory.write().await;
        let outbound = handler.disconnect(&mut directory);
        let peers = state.peers.read().await;
        peers.deliver(outbound);
    }
    state.peers.write().await.unregister(&player_id);

    tracing::info!(player_id = %player_id, "Player disconnected");
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
    encoding: Encoding,
) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            let frame = match encoding {
                Encoding::MsgPack => Message::Binary(data),
                Encoding::Json => match String::from_utf8(data.to_vec()) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::warn!(error = %e, "Encoded JSON frame is not UTF-8");
                        continue;
                    },
                },
            };
            if ws_sender.send(frame).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });
}

/// Token bucket over inbound frames. Built from
/// `limits.ws_rate_limit_per_sec`: a client may burst one second's worth of
/// frames, then is held to that rate. Frames over the limit are dropped,
/// not queued.
struct RateLimiter {
    capacity: f64,
    per_sec: f64,
    available: f64,
    refilled_at: tokio::time::Instant,
}

impl RateLimiter {
    fn new(capacity: f64, per_sec: f64) -> Self {
        Self {
            capacity,
            per_sec,
            available: capacity,
            refilled_at: tokio::time::Instant::now(),
        }
    }

    fn from_limits(limits: &LimitsConfig) -> Self {
        Self::new(limits.ws_rate_limit_per_sec, limits.ws_rate_limit_per_sec)
    }

    /// Take one token for an inbound frame, if any are left.
    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let earned = now.duration_since(self.refilled_at).as_secs_f64() * self.per_sec;
        self.available = (self.available + earned).min(self.capacity);
        self.refilled_at = now;

        let ok = self.available >= 1.0;
        if ok {
            self.available -= 1.0;
        }
        ok
    }
}

async fn read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    handler: &mut SessionProtocolHandler,
) {
    let mut rate_limiter = RateLimiter::from_limits(&state.config.limits);
    let max_size = state.config.limits.max_message_size;

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let (data, frame_encoding) = match msg {
            Message::Text(t) => (Bytes::copy_from_slice(t.as_str().as_bytes()), Encoding::Json),
            Message::Binary(d) => (d, Encoding::MsgPack),
            Message::Close(_) => break,
            _ => continue,
        };

        if !rate_limiter.allow() {
            tracing::warn!(player_id = %handler.player_id(), "Rate limited");
            continue;
        }

        if data.len() > max_size {
            tracing::warn!(
                player_id = %handler.player_id(),
                size = data.len(),
                "Dropping oversized frame"
            );
            continue;
        }

        let client_msg = match decode_client_message(&data, frame_encoding) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(
                    player_id = %handler.player_id(),
                    error = %e,
                    "Dropping malformed frame"
                );
                continue;
            },
        };

        // Lock order: directory, then peers. Delivery is non-blocking, so the
        // whole transition completes before the directory is released.
        let mut directory = state.directory.write().await;
        let peers = state.peers.read().await;
        let outbound = handler.handle(client_msg, &mut directory, &*peers, Instant::now());
        peers.deliver(outbound);
    }
}
