use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};

use obacht_core::net::protocol::{Encoding, encode_server_message};
use obacht_core::player::PlayerId;

use crate::config::ServerConfig;
use crate::room_directory::{DirectorySettings, RoomDirectory};
use crate::session::{Outbound, PeerLookup};

/// Per-player sender for outbound frames. Bounded so a slow client cannot
/// exhaust memory; `Bytes` keeps the hand-off to the writer task cheap.
pub type PlayerSender = mpsc::Sender<Bytes>;

pub type SharedDirectory = Arc<RwLock<RoomDirectory>>;
pub type SharedPeers = Arc<RwLock<PeerRegistry>>;

/// A live connection's outbound half.
pub struct Peer {
    pub sender: PlayerSender,
    pub encoding: Encoding,
}

/// Maps connected players to their outbound channel.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<PlayerId, Peer>,
}

impl PeerRegistry {
    pub fn register(&mut self, player_id: PlayerId, peer: Peer) {
        self.peers.insert(player_id, peer);
    }

    pub fn unregister(&mut self, player_id: &PlayerId) {
        self.peers.remove(player_id);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Encode each message for its recipient and queue it without waiting.
    /// Messages for players that have gone away are dropped.
    pub fn deliver(&self, outbound: Vec<Outbound>) {
        for Outbound { to, msg } in outbound {
            let Some(peer) = self.peers.get(&to) else {
                tracing::debug!(player_id = %to, "Dropping message for disconnected player");
                continue;
            };
            let data = match encode_server_message(&msg, peer.encoding) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(player_id = %to, error = %e, "Failed to encode message");
                    continue;
                },
            };
            if let Err(e) = peer.sender.try_send(Bytes::from(data)) {
                tracing::debug!(
                    player_id = %to, error = %e,
                    "Skipping send to slow client"
                );
            }
        }
    }
}

impl PeerLookup for PeerRegistry {
    fn is_connected(&self, player_id: &PlayerId) -> bool {
        self.peers.contains_key(player_id)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub directory: SharedDirectory,
    pub peers: SharedPeers,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let settings = DirectorySettings::from(&config);
        Self {
            directory: Arc::new(RwLock::new(RoomDirectory::new(settings))),
            peers: Arc::new(RwLock::new(PeerRegistry::default())),
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// One reserved WebSocket slot, released on drop.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    /// Reserve a slot if fewer than `max` are held. The increment happens
    /// before the check, so concurrent upgrades can never overshoot `max`.
    pub fn try_acquire(counter: Arc<AtomicUsize>, max: usize) -> Option<Self> {
        let previous = counter.fetch_add(1, Ordering::AcqRel);
        if previous >= max {
            counter.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(Self { counter })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
