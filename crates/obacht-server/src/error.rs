use obacht_core::net::messages::{ErrorMsg, ErrorSeverity, ServerMessage};
use obacht_core::player::PlayerId;
use obacht_core::room::AccessCode;

/// Recoverable failure of a session operation. Always reported to the
/// connection that caused it and never to its opponent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    RoomNotFound(AccessCode),
    RoomFull(AccessCode),
    /// No access code could be allocated.
    PoolExhausted,
    NotInRoom,
    InvalidTransition(&'static str),
    PlayerNotFound(PlayerId),
    /// A waiting room was evicted before anybody joined.
    RoomExpired(AccessCode),
}

impl SessionError {
    /// Stable identifier clients switch on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound(_) => "room_not_found",
            Self::RoomFull(_) => "room_full",
            Self::PoolExhausted => "server_full",
            Self::NotInRoom => "not_in_room",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::PlayerNotFound(_) => "player_not_found",
            Self::RoomExpired(_) => "room_expired",
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::PoolExhausted => ErrorSeverity::Error,
            _ => ErrorSeverity::Warning,
        }
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Error(ErrorMsg {
            severity: self.severity(),
            code: self.code().to_string(),
            msg: self.to_string(),
        })
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoomNotFound(code) => write!(f, "Room {code} does not exist"),
            Self::RoomFull(code) => write!(f, "Room {code} is full"),
            Self::PoolExhausted => write!(f, "Server is full, try again later"),
            Self::NotInRoom => write!(f, "You are not in a room"),
            Self::InvalidTransition(why) => write!(f, "Not allowed right now: {why}"),
            Self::PlayerNotFound(pid) => write!(f, "Player {pid} is not connected"),
            Self::RoomExpired(code) => write!(f, "Room {code} expired while waiting"),
        }
    }
}

impl std::error::Error for SessionError {}
