#[allow(dead_code)]
mod common;

use obacht_core::net::messages::{
    ClientMessage, GameOverMsg, GameOverReason, GetRoomsMsg, PeerStatusMsg, PingMsg,
    PlayerStatusMsg, PongMsg, ServerMessage,
};
use obacht_core::net::protocol::Encoding;
use obacht_core::room::RoomState;
use obacht_server::config::ServerConfig;

use common::{
    TestServer, connect_player, create_room, expect_detail, expect_error, expect_invite,
    find_match, join_room, paired_players, ready, ws_read_server_msg, ws_send, ws_send_text,
    ws_try_read_server_msg,
};

#[tokio::test]
async fn greeting_assigns_distinct_ids() {
    let server = TestServer::new().await;
    let a = connect_player(&server, Encoding::Json).await;
    let b = connect_player(&server, Encoding::Json).await;
    assert_ne!(a.pid, b.pid);
    assert!(!a.pid.as_str().is_empty());
}

#[tokio::test]
async fn full_game_happy_path() {
    let server = TestServer::new().await;
    let (mut a, mut b, pin) = paired_players(&server).await;

    ready(&mut a).await;
    ready(&mut b).await;
    for p in [&mut a, &mut b] {
        let msg = ws_read_server_msg(&mut p.stream).await;
        assert!(matches!(msg, ServerMessage::GameReady(_)), "got {msg:?}");
    }

    ws_send(
        &mut a,
        &ClientMessage::PlayerStatus(PlayerStatusMsg {
            pid: None,
            health: 0,
        }),
    )
    .await;

    // Opponent sees the status, then the end of the game.
    let status = ws_read_server_msg(&mut b.stream).await;
    assert_eq!(
        status,
        ServerMessage::PlayerStatus(PeerStatusMsg {
            pid: a.pid.clone(),
            health: 0,
        })
    );
    let expected = ServerMessage::GameOver(GameOverMsg {
        reason: GameOverReason::PlayerDead,
        pid: a.pid.clone(),
    });
    assert_eq!(ws_read_server_msg(&mut b.stream).await, expected);
    assert_eq!(ws_read_server_msg(&mut a.stream).await, expected);

    // Room is back to its paired baseline.
    ws_send(&mut a, &ClientMessage::GetRooms(GetRoomsMsg {})).await;
    match ws_read_server_msg(&mut a.stream).await {
        ServerMessage::Rooms(list) => {
            assert_eq!(list.rooms.len(), 1);
            assert_eq!(list.rooms[0].pin, pin);
            assert_eq!(list.rooms[0].state, RoomState::BothJoined);
            assert_eq!(list.rooms[0].occupants, 2);
        },
        other => panic!("Expected room list, got: {other:?}"),
    }

    // And a rematch can start.
    ready(&mut a).await;
    ready(&mut b).await;
    assert!(matches!(
        ws_read_server_msg(&mut a.stream).await,
        ServerMessage::GameReady(_)
    ));
}

#[tokio::test]
async fn private_room_is_not_matched_but_joinable_by_code() {
    let server = TestServer::new().await;
    let mut a = connect_player(&server, Encoding::Json).await;
    let mut b = connect_player(&server, Encoding::Json).await;

    let private_pin = create_room(&mut a, true).await;
    assert!(private_pin.is_private());

    find_match(&mut b).await;
    let invite = expect_invite(&mut b).await;
    assert_ne!(invite.pin, private_pin);
    assert!(!invite.closed);
    assert!(ws_try_read_server_msg(&mut a.stream, 200).await.is_none());

    join_room(&mut b, &private_pin).await;
    let detail_b = expect_detail(&mut b).await;
    let detail_a = expect_detail(&mut a).await;
    assert_eq!(detail_a, detail_b);
    assert!(detail_a.closed);
    assert_eq!(detail_a.joining_player_id.as_ref(), Some(&b.pid));
}

#[tokio::test]
async fn disconnect_mid_game_notifies_opponent_once() {
    let server = TestServer::new().await;
    let (mut a, mut b, pin) = paired_players(&server).await;
    ready(&mut a).await;
    ready(&mut b).await;
    ws_read_server_msg(&mut a.stream).await;
    ws_read_server_msg(&mut b.stream).await;

    a.stream.close(None).await.unwrap();

    assert_eq!(
        ws_read_server_msg(&mut b.stream).await,
        ServerMessage::GameOver(GameOverMsg {
            reason: GameOverReason::PlayerLeft,
            pid: a.pid.clone(),
        })
    );
    assert!(ws_try_read_server_msg(&mut b.stream, 200).await.is_none());

    let mut c = connect_player(&server, Encoding::Json).await;
    join_room(&mut c, &pin).await;
    assert_eq!(expect_error(&mut c).await, "room_not_found");
}

#[tokio::test]
async fn msgpack_client_plays_with_json_client() {
    let server = TestServer::new().await;
    let mut a = connect_player(&server, Encoding::Json).await;
    let mut b = connect_player(&server, Encoding::MsgPack).await;

    let pin = create_room(&mut a, false).await;
    join_room(&mut b, &pin).await;
    let detail_b = expect_detail(&mut b).await;
    let detail_a = expect_detail(&mut a).await;
    assert_eq!(detail_a, detail_b);
    assert_eq!(detail_b.creating_player_id.as_ref(), Some(&a.pid));

    ws_send(&mut b, &ClientMessage::Ping(PingMsg { time: 1234 })).await;
    assert_eq!(
        ws_read_server_msg(&mut b.stream).await,
        ServerMessage::Pong(PongMsg { time: 1234 })
    );
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let server = TestServer::new().await;
    let mut a = connect_player(&server, Encoding::Json).await;

    ws_send_text(&mut a.stream, "this is not json").await;
    ws_send_text(&mut a.stream, r#"{"event":"teleport","data":{}}"#).await;
    ws_send_text(&mut a.stream, r#"{"event":"join_room","data":{"pin":true}}"#).await;
    ws_send(&mut a, &ClientMessage::Ping(PingMsg { time: 9 })).await;

    // Connection survives and nothing but the pong comes back.
    assert_eq!(
        ws_read_server_msg(&mut a.stream).await,
        ServerMessage::Pong(PongMsg { time: 9 })
    );
}

#[tokio::test]
async fn join_full_room_reports_error_to_sender_only() {
    let server = TestServer::new().await;
    let (mut a, _b, pin) = paired_players(&server).await;
    let mut c = connect_player(&server, Encoding::Json).await;

    join_room(&mut c, &pin).await;
    assert_eq!(expect_error(&mut c).await, "room_full");
    assert!(ws_try_read_server_msg(&mut a.stream, 200).await.is_none());
}

#[tokio::test]
async fn connection_limit_rejects_upgrade() {
    let mut config = ServerConfig::default();
    config.limits.max_ws_connections = 1;
    let server = TestServer::from_config(config).await;

    let _first = connect_player(&server, Encoding::Json).await;
    let second = tokio_tungstenite::connect_async(server.ws_url()).await;
    assert!(second.is_err());
}

#[tokio::test]
async fn health_endpoint_reports_rooms() {
    let server = TestServer::new().await;
    let mut a = connect_player(&server, Encoding::Json).await;
    create_room(&mut a, false).await;

    let resp = reqwest::get(format!("{}/health", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rooms"]["active"], 1);
    assert_eq!(body["rooms"]["waiting"], 1);
    assert_eq!(body["connections"]["websocket"], 1);
}
