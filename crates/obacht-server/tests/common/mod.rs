use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use obacht_core::net::messages::{
    ClientMessage, CreateRoomMsg, FindMatchMsg, JoinRoomMsg, PlayerReadyMsg, RoomInviteMsg,
    ServerMessage,
};
use obacht_core::net::protocol::{Encoding, decode_server_message, encode_client_message};
use obacht_core::player::PlayerId;
use obacht_core::room::{AccessCode, RoomSnapshot};

use obacht_server::config::ServerConfig;
use obacht_server::{build_app, spawn_janitor};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config);
        spawn_janitor(state);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn ws_url_msgpack(&self) -> String {
        format!("ws://{}/ws?encoding=msgpack", self.addr)
    }
}

/// A connected client and the id the server assigned it.
pub struct Player {
    pub stream: WsStream,
    pub pid: PlayerId,
    pub encoding: Encoding,
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Connect and consume the `connected` greeting.
pub async fn connect_player(server: &TestServer, encoding: Encoding) -> Player {
    let url = match encoding {
        Encoding::Json => server.ws_url(),
        Encoding::MsgPack => server.ws_url_msgpack(),
    };
    let mut stream = ws_connect(&url).await;
    let pid = match ws_read_server_msg(&mut stream).await {
        ServerMessage::Connected(c) => c.pid,
        other => panic!("Expected Connected, got: {other:?}"),
    };
    Player {
        stream,
        pid,
        encoding,
    }
}

/// Send a ClientMessage, framed according to the player's encoding.
pub async fn ws_send(player: &mut Player, msg: &ClientMessage) {
    let encoded = encode_client_message(msg, player.encoding).unwrap();
    let frame = match player.encoding {
        Encoding::Json => Message::Text(String::from_utf8(encoded).unwrap().into()),
        Encoding::MsgPack => Message::Binary(encoded.into()),
    };
    player.stream.send(frame).await.unwrap();
}

/// Send an arbitrary text frame.
pub async fn ws_send_text(stream: &mut WsStream, text: &str) {
    stream.send(Message::Text(text.to_string().into())).await.unwrap();
}

/// Read the next data frame with its encoding (5s timeout).
pub async fn ws_read_raw(stream: &mut WsStream) -> (Vec<u8>, Encoding) {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return (text.as_str().as_bytes().to_vec(), Encoding::Json);
                },
                Some(Ok(Message::Binary(data))) => return (data.to_vec(), Encoding::MsgPack),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Read the next ServerMessage from a WebSocket stream (5s timeout).
pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let (data, encoding) = ws_read_raw(stream).await;
    decode_server_message(&data, encoding).unwrap()
}

/// Try to read a ServerMessage, returning None on timeout.
pub async fn ws_try_read_server_msg(stream: &mut WsStream, timeout_ms: u64) -> Option<ServerMessage> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return decode_server_message(text.as_str().as_bytes(), Encoding::Json)
                        .unwrap();
                },
                Some(Ok(Message::Binary(data))) => {
                    return decode_server_message(&data, Encoding::MsgPack).unwrap();
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

pub async fn expect_invite(player: &mut Player) -> RoomInviteMsg {
    match ws_read_server_msg(&mut player.stream).await {
        ServerMessage::RoomInvite(invite) => invite,
        other => panic!("Expected RoomInvite, got: {other:?}"),
    }
}

pub async fn expect_detail(player: &mut Player) -> RoomSnapshot {
    match ws_read_server_msg(&mut player.stream).await {
        ServerMessage::RoomDetail(detail) => *detail,
        other => panic!("Expected RoomDetail, got: {other:?}"),
    }
}

/// Expect an `error` message and return its code.
pub async fn expect_error(player: &mut Player) -> String {
    match ws_read_server_msg(&mut player.stream).await {
        ServerMessage::Error(err) => err.code,
        other => panic!("Expected Error, got: {other:?}"),
    }
}

/// Create a room and return its code.
pub async fn create_room(player: &mut Player, closed: bool) -> AccessCode {
    let msg = ClientMessage::CreateRoom(CreateRoomMsg {
        closed,
        ..CreateRoomMsg::default()
    });
    ws_send(player, &msg).await;
    expect_invite(player).await.pin
}

pub async fn find_match(player: &mut Player) {
    ws_send(player, &ClientMessage::FindMatch(FindMatchMsg::default())).await;
}

pub async fn join_room(player: &mut Player, pin: &AccessCode) {
    let msg = ClientMessage::JoinRoom(JoinRoomMsg {
        pin: pin.clone(),
        closed: pin.is_private(),
    });
    ws_send(player, &msg).await;
}

pub async fn ready(player: &mut Player) {
    ws_send(player, &ClientMessage::PlayerReady(PlayerReadyMsg {})).await;
}

/// Two players paired in a public room, all pairing traffic consumed.
pub async fn paired_players(server: &TestServer) -> (Player, Player, AccessCode) {
    let mut a = connect_player(server, Encoding::Json).await;
    let mut b = connect_player(server, Encoding::Json).await;
    let pin = create_room(&mut a, false).await;

    find_match(&mut b).await;
    assert_eq!(expect_invite(&mut b).await.pin, pin);
    expect_detail(&mut b).await;
    expect_detail(&mut a).await;
    (a, b, pin)
}
