pub mod config;
pub mod error;
pub mod health;
pub mod room_directory;
pub mod session;
pub mod state;
pub mod ws;

use std::time::Instant;

use axum::Router;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use config::ServerConfig;
use error::SessionError;
use session::Outbound;
use state::AppState;

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let state = AppState::new(config);

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .layer(TraceLayer::new_for_http())
        // The game client is served from another origin.
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}

/// Background task that expires unanswered reaction reports and, when
/// configured, evicts rooms that have waited too long for an opponent.
pub fn spawn_janitor(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.rooms.janitor_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            janitor_pass(&state, Instant::now()).await;
        }
    })
}

/// One sweep of the janitor.
pub async fn janitor_pass(state: &AppState, now: Instant) {
    let mut directory = state.directory.write().await;

    let expired = directory.expire_reactions(now);
    if expired > 0 {
        tracing::debug!(expired, "Expired pending reaction reports");
    }

    let Some(max_wait) = state.config.rooms.waiting_timeout() else {
        return;
    };
    let evicted = directory.evict_waiting(now, max_wait);
    if evicted.is_empty() {
        return;
    }
    let outbound = evicted
        .into_iter()
        .map(|(code, creator)| Outbound::new(creator, SessionError::RoomExpired(code).to_message()))
        .collect();
    let peers = state.peers.read().await;
    peers.deliver(outbound);
}
