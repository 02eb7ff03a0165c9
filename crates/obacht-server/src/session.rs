use std::time::Instant;

use obacht_core::net::messages::{
    BonusMsg, CheckReactionTimeMsg, ClientMessage, ConnectedMsg, CreateRoomMsg, FindMatchMsg,
    GameOverMsg, GameOverReason, GameReadyMsg, JoinRoomMsg, PeerStatusMsg, PlayerActionMsg,
    PlayerStatusMsg, PongMsg, ReceiveBonusMsg, RoomInviteMsg, RoomListMsg, ServerMessage, TrapMsg,
};
use obacht_core::player::PlayerId;
use obacht_core::reaction::ReactionReport;
use obacht_core::room::{AccessCode, ReadyOutcome, RoomSnapshot};

use crate::error::SessionError;
use crate::room_directory::{MatchOutcome, RoomDirectory};

/// A server message addressed to one player.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: PlayerId,
    pub msg: ServerMessage,
}

impl Outbound {
    pub fn new(to: PlayerId, msg: ServerMessage) -> Self {
        Self { to, msg }
    }
}

/// Answers whether a player currently has a live connection.
pub trait PeerLookup {
    fn is_connected(&self, player_id: &PlayerId) -> bool;
}

/// Per-connection dispatcher. Holds only the player's id and a
/// back-reference to the room it last entered; the directory is the
/// authority on membership.
#[derive(Debug)]
pub struct SessionProtocolHandler {
    player_id: PlayerId,
    current_room: Option<AccessCode>,
}

impl SessionProtocolHandler {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            current_room: None,
        }
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub fn current_room(&self) -> Option<&AccessCode> {
        self.current_room.as_ref()
    }

    /// First message on a fresh connection.
    pub fn greeting(&self) -> Outbound {
        self.to_self(ServerMessage::Connected(ConnectedMsg {
            pid: self.player_id.clone(),
        }))
    }

    /// Apply one inbound message. Failures become an `error` message to this
    /// player only.
    pub fn handle(
        &mut self,
        msg: ClientMessage,
        dir: &mut RoomDirectory,
        peers: &dyn PeerLookup,
        now: Instant,
    ) -> Vec<Outbound> {
        let msg_type = msg.message_type();
        let mut out = Vec::new();
        if let Err(e) = self.dispatch(msg, dir, peers, now, &mut out) {
            if e == SessionError::NotInRoom {
                self.current_room = None;
            }
            tracing::warn!(
                player_id = %self.player_id,
                event = msg_type.name(),
                error = %e,
                "Request rejected"
            );
            out.push(self.to_self(e.to_message()));
        }
        out
    }

    /// Transport closed: behaves like `leave_room` with errors suppressed.
    pub fn disconnect(&mut self, dir: &mut RoomDirectory) -> Vec<Outbound> {
        let mut out = Vec::new();
        self.leave_current(dir, &mut out);
        out
    }

    fn dispatch(
        &mut self,
        msg: ClientMessage,
        dir: &mut RoomDirectory,
        peers: &dyn PeerLookup,
        now: Instant,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        match msg {
            ClientMessage::CreateRoom(m) => self.create_room(m, dir, peers, out),
            ClientMessage::JoinRoom(m) => self.join_room(m, dir, out),
            ClientMessage::FindMatch(m) => self.find_match(m, dir, out),
            ClientMessage::LeaveRoom(_) => self.leave_room(dir, out),
            ClientMessage::PlayerReady(_) => self.player_ready(dir, out),
            ClientMessage::PlayerStatus(m) => self.player_status(m, dir, out),
            ClientMessage::PlayerAction(m) => self.player_action(m, dir, out),
            ClientMessage::Bonus(m) => self.bonus(m, dir, out),
            ClientMessage::Trap(m) => self.trap(m, dir, out),
            ClientMessage::CheckReactionTime(m) => self.check_reaction_time(m, dir, now, out),
            ClientMessage::GetRooms(_) => {
                out.push(self.to_self(ServerMessage::Rooms(RoomListMsg {
                    rooms: dir.debug_snapshot(),
                })));
                Ok(())
            },
            ClientMessage::Ping(m) => {
                out.push(self.to_self(ServerMessage::Pong(PongMsg { time: m.time })));
                Ok(())
            },
            ClientMessage::DebugMessage(m) => {
                tracing::info!(
                    player_id = %self.player_id,
                    kind = %m.kind,
                    "Client debug: {}",
                    m.msg
                );
                Ok(())
            },
        }
    }

    fn create_room(
        &mut self,
        m: CreateRoomMsg,
        dir: &mut RoomDirectory,
        peers: &dyn PeerLookup,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        self.leave_current(dir, out);

        let code = dir.allocate_code(m.closed)?;
        let snapshot = dir.create_room(code, self.player_id.clone(), m.theme, m.options)?;
        self.current_room = Some(snapshot.pin.clone());
        out.push(self.to_self(ServerMessage::RoomInvite(RoomInviteMsg {
            pin: snapshot.pin.clone(),
            closed: snapshot.closed,
            from: None,
        })));

        if let Some(friend) = m.friend {
            if friend == self.player_id || !peers.is_connected(&friend) {
                return Err(SessionError::PlayerNotFound(friend));
            }
            out.push(Outbound::new(
                friend,
                ServerMessage::RoomInvite(RoomInviteMsg {
                    pin: snapshot.pin,
                    closed: snapshot.closed,
                    from: Some(self.player_id.clone()),
                }),
            ));
        }
        Ok(())
    }

    fn join_room(
        &mut self,
        m: JoinRoomMsg,
        dir: &mut RoomDirectory,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        if self.current_room.as_ref() == Some(&m.pin) && dir.is_member(&m.pin, &self.player_id) {
            if let Some(room) = dir.room(&m.pin) {
                out.push(self.to_self(room_detail(room.snapshot())));
            }
            return Ok(());
        }

        dir.check_joinable(&m.pin)?;
        self.leave_current(dir, out);
        let snapshot = dir.join_room(&m.pin, self.player_id.clone())?;
        self.current_room = Some(m.pin);
        push_detail_to_members(&snapshot, out);
        Ok(())
    }

    fn find_match(
        &mut self,
        m: FindMatchMsg,
        dir: &mut RoomDirectory,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        self.leave_current(dir, out);

        let (snapshot, joined) = match dir.find_match(self.player_id.clone(), m.theme, m.options)? {
            MatchOutcome::Joined(s) => (s, true),
            MatchOutcome::Created(s) => (s, false),
        };
        self.current_room = Some(snapshot.pin.clone());
        out.push(self.to_self(ServerMessage::RoomInvite(RoomInviteMsg {
            pin: snapshot.pin.clone(),
            closed: false,
            from: None,
        })));
        if joined {
            push_detail_to_members(&snapshot, out);
        }
        Ok(())
    }

    fn leave_room(
        &mut self,
        dir: &mut RoomDirectory,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        let code = self.room_code()?;
        let outcome = dir.leave_room(&code, &self.player_id)?;
        self.current_room = None;
        if let Some(other) = outcome.notify {
            out.push(Outbound::new(other, self.game_over(GameOverReason::PlayerLeft)));
        }
        Ok(())
    }

    fn player_ready(
        &mut self,
        dir: &mut RoomDirectory,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        let code = self.room_code()?;
        if dir.mark_ready(&code, &self.player_id)? == ReadyOutcome::BothReady {
            tracing::info!(room = %code, "Both players ready");
            for member in dir.members(&code) {
                out.push(Outbound::new(member, ServerMessage::GameReady(GameReadyMsg {})));
            }
        }
        Ok(())
    }

    fn player_status(
        &mut self,
        m: PlayerStatusMsg,
        dir: &mut RoomDirectory,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        let code = self.room_code()?;
        let update = dir.update_health(&code, &self.player_id, m.health)?;
        if let Some(other) = update.other {
            out.push(Outbound::new(
                other,
                ServerMessage::PlayerStatus(PeerStatusMsg {
                    pid: self.player_id.clone(),
                    health: m.health,
                }),
            ));
        }

        if update.fatal {
            tracing::info!(player_id = %self.player_id, room = %code, "Player died, game over");
            for member in dir.members(&code) {
                out.push(Outbound::new(member, self.game_over(GameOverReason::PlayerDead)));
            }
            dir.reset_room(&code);
        }
        Ok(())
    }

    fn player_action(
        &mut self,
        m: PlayerActionMsg,
        dir: &mut RoomDirectory,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        let code = self.room_code()?;
        if let Some(other) = dir.begin_play(&code, &self.player_id)? {
            out.push(Outbound::new(other, ServerMessage::PlayerAction(m)));
        }
        Ok(())
    }

    fn bonus(
        &mut self,
        m: BonusMsg,
        dir: &mut RoomDirectory,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        let code = self.room_code()?;
        dir.begin_play(&code, &self.player_id)?;
        for member in dir.members(&code) {
            out.push(Outbound::new(member, ServerMessage::Bonus(m.clone())));
        }
        Ok(())
    }

    fn trap(
        &mut self,
        m: TrapMsg,
        dir: &mut RoomDirectory,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        let code = self.room_code()?;
        if !dir.is_member(&code, &self.player_id) {
            return Err(SessionError::NotInRoom);
        }
        if !dir.is_member(&code, &m.target) {
            return Err(SessionError::PlayerNotFound(m.target));
        }
        dir.begin_play(&code, &self.player_id)?;
        out.push(Outbound::new(m.target.clone(), ServerMessage::Trap(m)));
        Ok(())
    }

    fn check_reaction_time(
        &mut self,
        m: CheckReactionTimeMsg,
        dir: &mut RoomDirectory,
        now: Instant,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        let code = self.room_code()?;
        let report = ReactionReport {
            player_id: self.player_id.clone(),
            kind: m.kind,
            reaction_time_ms: m.reaction_time,
        };
        if let Some(verdict) = dir.report_reaction(&code, report, now)? {
            tracing::debug!(
                room = %code,
                kind = %verdict.kind,
                winner = ?verdict.winner,
                "Reaction contest decided"
            );
            for member in dir.members(&code) {
                out.push(Outbound::new(
                    member,
                    ServerMessage::ReceiveBonus(ReceiveBonusMsg {
                        kind: verdict.kind.clone(),
                        winner_pid: verdict.winner.clone(),
                    }),
                ));
            }
        }
        Ok(())
    }

    /// Leave whatever room this player is in. Errors are swallowed: a stale
    /// back-reference simply means there is nothing to leave.
    fn leave_current(&mut self, dir: &mut RoomDirectory, out: &mut Vec<Outbound>) {
        let Some(code) = self.current_room.take() else {
            return;
        };
        match dir.leave_room(&code, &self.player_id) {
            Ok(outcome) => {
                if let Some(other) = outcome.notify {
                    out.push(Outbound::new(other, self.game_over(GameOverReason::PlayerLeft)));
                }
            },
            Err(e) => {
                tracing::debug!(player_id = %self.player_id, room = %code, error = %e, "Nothing to leave");
            },
        }
    }

    fn room_code(&self) -> Result<AccessCode, SessionError> {
        self.current_room.clone().ok_or(SessionError::NotInRoom)
    }

    fn game_over(&self, reason: GameOverReason) -> ServerMessage {
        ServerMessage::GameOver(GameOverMsg {
            reason,
            pid: self.player_id.clone(),
        })
    }

    fn to_self(&self, msg: ServerMessage) -> Outbound {
        Outbound::new(self.player_id.clone(), msg)
    }
}

fn room_detail(snapshot: RoomSnapshot) -> ServerMessage {
    ServerMessage::RoomDetail(Box::new(snapshot))
}

fn push_detail_to_members(snapshot: &RoomSnapshot, out: &mut Vec<Outbound>) {
    let members = [&snapshot.creating_player_id, &snapshot.joining_player_id];
    for member in members.into_iter().flatten() {
        out.push(Outbound::new(member.clone(), room_detail(snapshot.clone())));
    }
}
