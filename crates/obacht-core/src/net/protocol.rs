use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::messages::{
    BonusMsg, CheckReactionTimeMsg, ClientMessage, ConnectedMsg, CreateRoomMsg, DebugMessageMsg,
    ErrorMsg, FindMatchMsg, GameOverMsg, GameReadyMsg, GetRoomsMsg, JoinRoomMsg, LeaveRoomMsg,
    MessageType, PeerStatusMsg, PingMsg, PlayerActionMsg, PlayerReadyMsg, PlayerStatusMsg,
    PongMsg, ReceiveBonusMsg, RoomInviteMsg, RoomListMsg, ServerMessage, TrapMsg,
};
use crate::room::RoomSnapshot;

/// Hard cap on an encoded frame. Hosts may configure a lower limit.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

/// Wire encoding of the `{event, data}` envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// UTF-8 JSON, sent as WebSocket text frames.
    #[default]
    Json,
    /// MessagePack with named map keys, sent as binary frames.
    #[serde(rename = "msgpack")]
    MsgPack,
}

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    UnknownEvent(String),
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::UnknownEvent(name) => write!(f, "unknown event: {name:?}"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    event: &'a str,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Wrap a payload in the envelope and encode it.
pub fn encode_message<T: Serialize>(
    msg_type: MessageType,
    payload: &T,
    encoding: Encoding,
) -> Result<Vec<u8>, ProtocolError> {
    let envelope = EnvelopeRef {
        event: msg_type.name(),
        data: payload,
    };
    let bytes = match encoding {
        Encoding::Json => serde_json::to_vec(&envelope)
            .map_err(|e| ProtocolError::SerializeError(e.to_string()))?,
        Encoding::MsgPack => rmp_serde::to_vec_named(&envelope)
            .map_err(|e| ProtocolError::SerializeError(e.to_string()))?,
    };
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(bytes.len()));
    }
    Ok(bytes)
}

/// Split a frame into its event type and its (possibly empty) data object.
pub fn decode_envelope(
    data: &[u8],
    encoding: Encoding,
) -> Result<(MessageType, serde_json::Value), ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(data.len()));
    }
    let envelope: Envelope = match encoding {
        Encoding::Json => serde_json::from_slice(data)
            .map_err(|e| ProtocolError::DeserializeError(e.to_string()))?,
        Encoding::MsgPack => rmp_serde::from_slice(data)
            .map_err(|e| ProtocolError::DeserializeError(e.to_string()))?,
    };
    let msg_type = MessageType::from_name(&envelope.event)
        .ok_or_else(|| ProtocolError::UnknownEvent(envelope.event.clone()))?;
    let payload = if envelope.data.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        envelope.data
    };
    Ok((msg_type, payload))
}

fn decode_payload<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Encode a `ClientMessage` to wire format.
pub fn encode_client_message(
    msg: &ClientMessage,
    encoding: Encoding,
) -> Result<Vec<u8>, ProtocolError> {
    let t = msg.message_type();
    match msg {
        ClientMessage::CreateRoom(m) => encode_message(t, m, encoding),
        ClientMessage::JoinRoom(m) => encode_message(t, m, encoding),
        ClientMessage::FindMatch(m) => encode_message(t, m, encoding),
        ClientMessage::LeaveRoom(m) => encode_message(t, m, encoding),
        ClientMessage::PlayerReady(m) => encode_message(t, m, encoding),
        ClientMessage::PlayerStatus(m) => encode_message(t, m, encoding),
        ClientMessage::PlayerAction(m) => encode_message(t, m, encoding),
        ClientMessage::Bonus(m) => encode_message(t, m, encoding),
        ClientMessage::Trap(m) => encode_message(t, m, encoding),
        ClientMessage::CheckReactionTime(m) => encode_message(t, m, encoding),
        ClientMessage::GetRooms(m) => encode_message(t, m, encoding),
        ClientMessage::Ping(m) => encode_message(t, m, encoding),
        ClientMessage::DebugMessage(m) => encode_message(t, m, encoding),
    }
}

/// Encode a `ServerMessage` to wire format.
pub fn encode_server_message(
    msg: &ServerMessage,
    encoding: Encoding,
) -> Result<Vec<u8>, ProtocolError> {
    let t = msg.message_type();
    match msg {
        ServerMessage::Connected(m) => encode_message(t, m, encoding),
        ServerMessage::RoomInvite(m) => encode_message(t, m, encoding),
        ServerMessage::RoomDetail(m) => encode_message(t, m.as_ref(), encoding),
        ServerMessage::GameReady(m) => encode_message(t, m, encoding),
        ServerMessage::PlayerStatus(m) => encode_message(t, m, encoding),
        ServerMessage::PlayerAction(m) => encode_message(t, m, encoding),
        ServerMessage::Bonus(m) => encode_message(t, m, encoding),
        ServerMessage::Trap(m) => encode_message(t, m, encoding),
        ServerMessage::ReceiveBonus(m) => encode_message(t, m, encoding),
        ServerMessage::GameOver(m) => encode_message(t, m, encoding),
        ServerMessage::Rooms(m) => encode_message(t, m, encoding),
        ServerMessage::Pong(m) => encode_message(t, m, encoding),
        ServerMessage::Error(m) => encode_message(t, m, encoding),
    }
}

/// Decode raw wire data into a `ClientMessage`.
pub fn decode_client_message(
    data: &[u8],
    encoding: Encoding,
) -> Result<ClientMessage, ProtocolError> {
    let (msg_type, payload) = decode_envelope(data, encoding)?;
    match msg_type {
        MessageType::CreateRoom => Ok(ClientMessage::CreateRoom(decode_payload::<
            CreateRoomMsg,
        >(payload)?)),
        MessageType::JoinRoom => Ok(ClientMessage::JoinRoom(decode_payload::<JoinRoomMsg>(
            payload,
        )?)),
        MessageType::FindMatch => Ok(ClientMessage::FindMatch(decode_payload::<FindMatchMsg>(
            payload,
        )?)),
        MessageType::LeaveRoom => Ok(ClientMessage::LeaveRoom(decode_payload::<LeaveRoomMsg>(
            payload,
        )?)),
        MessageType::PlayerReady => Ok(ClientMessage::PlayerReady(decode_payload::<
            PlayerReadyMsg,
        >(payload)?)),
        MessageType::PlayerStatus => Ok(ClientMessage::PlayerStatus(decode_payload::<
            PlayerStatusMsg,
        >(payload)?)),
        MessageType::PlayerAction => Ok(ClientMessage::PlayerAction(decode_payload::<
            PlayerActionMsg,
        >(payload)?)),
        MessageType::Bonus => Ok(ClientMessage::Bonus(decode_payload::<BonusMsg>(payload)?)),
        MessageType::Trap => Ok(ClientMessage::Trap(decode_payload::<TrapMsg>(payload)?)),
        MessageType::CheckReactionTime => Ok(ClientMessage::CheckReactionTime(
            decode_payload::<CheckReactionTimeMsg>(payload)?,
        )),
        MessageType::GetRooms => Ok(ClientMessage::GetRooms(decode_payload::<GetRoomsMsg>(
            payload,
        )?)),
        MessageType::Ping => Ok(ClientMessage::Ping(decode_payload::<PingMsg>(payload)?)),
        MessageType::DebugMessage => Ok(ClientMessage::DebugMessage(decode_payload::<
            DebugMessageMsg,
        >(payload)?)),
        other => Err(ProtocolError::UnknownEvent(other.name().to_string())),
    }
}

/// Decode raw wire data into a `ServerMessage`.
pub fn decode_server_message(
    data: &[u8],
    encoding: Encoding,
) -> Result<ServerMessage, ProtocolError> {
    let (msg_type, payload) = decode_envelope(data, encoding)?;
    match msg_type {
        MessageType::Connected => Ok(ServerMessage::Connected(decode_payload::<ConnectedMsg>(
            payload,
        )?)),
        MessageType::RoomInvite => Ok(ServerMessage::RoomInvite(decode_payload::<
            RoomInviteMsg,
        >(payload)?)),
        MessageType::RoomDetail => Ok(ServerMessage::RoomDetail(Box::new(decode_payload::<
            RoomSnapshot,
        >(payload)?))),
        MessageType::GameReady => Ok(ServerMessage::GameReady(decode_payload::<GameReadyMsg>(
            payload,
        )?)),
        MessageType::PlayerStatus => Ok(ServerMessage::PlayerStatus(decode_payload::<
            PeerStatusMsg,
        >(payload)?)),
        MessageType::PlayerAction => Ok(ServerMessage::PlayerAction(decode_payload::<
            PlayerActionMsg,
        >(payload)?)),
        MessageType::Bonus => Ok(ServerMessage::Bonus(decode_payload::<BonusMsg>(payload)?)),
        MessageType::Trap => Ok(ServerMessage::Trap(decode_payload::<TrapMsg>(payload)?)),
        MessageType::ReceiveBonus => Ok(ServerMessage::ReceiveBonus(decode_payload::<
            ReceiveBonusMsg,
        >(payload)?)),
        MessageType::GameOver => Ok(ServerMessage::GameOver(decode_payload::<GameOverMsg>(
            payload,
        )?)),
        MessageType::GetRooms => Ok(ServerMessage::Rooms(decode_payload::<RoomListMsg>(
            payload,
        )?)),
        MessageType::Pong => Ok(ServerMessage::Pong(decode_payload::<PongMsg>(payload)?)),
        MessageType::Error => Ok(ServerMessage::Error(decode_payload::<ErrorMsg>(payload)?)),
        other => Err(ProtocolError::UnknownEvent(other.name().to_string())),
    }
}
