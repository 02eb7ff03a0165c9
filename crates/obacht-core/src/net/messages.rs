use serde::{Deserialize, Serialize};

use crate::player::PlayerId;
use crate::room::{AccessCode, RoomSnapshot, RoomSummary};

/// Event name carried in the envelope of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // Client -> Server
    CreateRoom,
    JoinRoom,
    FindMatch,
    LeaveRoom,
    PlayerReady,
    CheckReactionTime,
    GetRooms,
    Ping,
    DebugMessage,

    // Both directions
    PlayerStatus,
    PlayerAction,
    Bonus,
    Trap,

    // Server -> Client
    Connected,
    RoomInvite,
    RoomDetail,
    GameReady,
    ReceiveBonus,
    GameOver,
    Pong,
    Error,
}

impl MessageType {
    pub const ALL: [MessageType; 21] = [
        Self::CreateRoom,
        Self::JoinRoom,
        Self::FindMatch,
        Self::LeaveRoom,
        Self::PlayerReady,
        Self::CheckReactionTime,
        Self::GetRooms,
        Self::Ping,
        Self::DebugMessage,
        Self::PlayerStatus,
        Self::PlayerAction,
        Self::Bonus,
        Self::Trap,
        Self::Connected,
        Self::RoomInvite,
        Self::RoomDetail,
        Self::GameReady,
        Self::ReceiveBonus,
        Self::GameOver,
        Self::Pong,
        Self::Error,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::CreateRoom => "create_room",
            Self::JoinRoom => "join_room",
            Self::FindMatch => "find_match",
            Self::LeaveRoom => "leave_room",
            Self::PlayerReady => "player_ready",
            Self::CheckReactionTime => "check_reactiontime",
            Self::GetRooms => "get_rooms",
            Self::Ping => "ping",
            Self::DebugMessage => "debug_message",
            Self::PlayerStatus => "player_status",
            Self::PlayerAction => "player_action",
            Self::Bonus => "bonus",
            Self::Trap => "trap",
            Self::Connected => "connected",
            Self::RoomInvite => "room_invite",
            Self::RoomDetail => "room_detail",
            Self::GameReady => "game_ready",
            Self::ReceiveBonus => "receive_bonus",
            Self::GameOver => "game_over",
            Self::Pong => "pong",
            Self::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

// ---------------------------------------------------------------------------
// Client -> Server payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CreateRoomMsg {
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(default)]
    pub closed: bool,
    /// Player to invite straight into the new room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friend: Option<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomMsg {
    pub pin: AccessCode,
    /// Accepted for compatibility; the code itself decides the namespace.
    #[serde(default)]
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FindMatchMsg {
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LeaveRoomMsg {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerReadyMsg {}

/// Health report. The `pid` a client sends is ignored; the server stamps the
/// sender's own id on the relayed copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatusMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<PlayerId>,
    pub health: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerActionMsg {
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusMsg {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrapMsg {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: PlayerId,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReactionTimeMsg {
    #[serde(rename = "type")]
    pub kind: String,
    /// Milliseconds between prompt and player response. Browsers report
    /// fractional values; they are rounded to the nearest millisecond.
    #[serde(deserialize_with = "whole_millis")]
    pub reaction_time: u64,
}

fn whole_millis<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawMillis {
        Whole(u64),
        Fractional(f64),
    }

    match RawMillis::deserialize(deserializer)? {
        RawMillis::Whole(ms) => Ok(ms),
        RawMillis::Fractional(ms) if ms.is_finite() && ms >= 0.0 && ms <= u64::MAX as f64 => {
            Ok(ms.round() as u64)
        },
        RawMillis::Fractional(ms) => Err(serde::de::Error::custom(format!(
            "reaction_time must be a non-negative number of milliseconds, got {ms}"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetRoomsMsg {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingMsg {
    pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugMessageMsg {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub msg: String,
}

// ---------------------------------------------------------------------------
// Server -> Client payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedMsg {
    pub pid: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInviteMsg {
    pub pin: AccessCode,
    pub closed: bool,
    /// Set when a friend created the room on the recipient's behalf.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<PlayerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameReadyMsg {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatusMsg {
    pub pid: PlayerId,
    pub health: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBonusMsg {
    #[serde(rename = "type")]
    pub kind: String,
    /// `None` when a tie produced no winner.
    pub winner_pid: Option<PlayerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    PlayerDead,
    PlayerLeft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOverMsg {
    pub reason: GameOverReason,
    pub pid: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomListMsg {
    pub rooms: Vec<RoomSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongMsg {
    pub time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMsg {
    #[serde(rename = "type")]
    pub severity: ErrorSeverity,
    pub code: String,
    pub msg: String,
}

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    CreateRoom(CreateRoomMsg),
    JoinRoom(JoinRoomMsg),
    FindMatch(FindMatchMsg),
    LeaveRoom(LeaveRoomMsg),
    PlayerReady(PlayerReadyMsg),
    PlayerStatus(PlayerStatusMsg),
    PlayerAction(PlayerActionMsg),
    Bonus(BonusMsg),
    Trap(TrapMsg),
    CheckReactionTime(CheckReactionTimeMsg),
    GetRooms(GetRoomsMsg),
    Ping(PingMsg),
    DebugMessage(DebugMessageMsg),
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::CreateRoom(_) => MessageType::CreateRoom,
            Self::JoinRoom(_) => MessageType::JoinRoom,
            Self::FindMatch(_) => MessageType::FindMatch,
            Self::LeaveRoom(_) => MessageType::LeaveRoom,
            Self::PlayerReady(_) => MessageType::PlayerReady,
            Self::PlayerStatus(_) => MessageType::PlayerStatus,
            Self::PlayerAction(_) => MessageType::PlayerAction,
            Self::Bonus(_) => MessageType::Bonus,
            Self::Trap(_) => MessageType::Trap,
            Self::CheckReactionTime(_) => MessageType::CheckReactionTime,
            Self::GetRooms(_) => MessageType::GetRooms,
            Self::Ping(_) => MessageType::Ping,
            Self::DebugMessage(_) => MessageType::DebugMessage,
        }
    }
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Connected(ConnectedMsg),
    RoomInvite(RoomInviteMsg),
    RoomDetail(Box<RoomSnapshot>),
    GameReady(GameReadyMsg),
    PlayerStatus(PeerStatusMsg),
    PlayerAction(PlayerActionMsg),
    Bonus(BonusMsg),
    Trap(TrapMsg),
    ReceiveBonus(ReceiveBonusMsg),
    GameOver(GameOverMsg),
    Rooms(RoomListMsg),
    Pong(PongMsg),
    Error(ErrorMsg),
}

impl ServerMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Connected(_) => MessageType::Connected,
            Self::RoomInvite(_) => MessageType::RoomInvite,
            Self::RoomDetail(_) => MessageType::RoomDetail,
            Self::GameReady(_) => MessageType::GameReady,
            Self::PlayerStatus(_) => MessageType::PlayerStatus,
            Self::PlayerAction(_) => MessageType::PlayerAction,
            Self::Bonus(_) => MessageType::Bonus,
            Self::Trap(_) => MessageType::Trap,
            Self::ReceiveBonus(_) => MessageType::ReceiveBonus,
            Self::GameOver(_) => MessageType::GameOver,
            Self::Rooms(_) => MessageType::GetRooms,
            Self::Pong(_) => MessageType::Pong,
            Self::Error(_) => MessageType::Error,
        }
    }
}
