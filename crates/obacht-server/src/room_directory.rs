use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use obacht_core::player::PlayerId;
use obacht_core::reaction::{ReactionReport, TiePolicy};
use obacht_core::room::{
    AccessCode, ReactionVerdict, ReadyOutcome, Room, RoomSettings, RoomSnapshot, RoomState,
    RoomSummary, SeatError, generate_private_code,
};

use crate::config::ServerConfig;
use crate::error::SessionError;

/// Attempts at drawing an unused private code before giving up.
const PRIVATE_CODE_RETRIES: usize = 64;

/// Tunables the directory needs from the server config.
#[derive(Debug, Clone)]
pub struct DirectorySettings {
    pub public_pool_size: u32,
    pub private_code_digits: u32,
    pub starting_health: i32,
    pub default_theme: String,
    pub tie_policy: TiePolicy,
    pub pending_expiry: Duration,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for DirectorySettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            public_pool_size: config.rooms.public_pool_size,
            private_code_digits: config.rooms.private_code_digits,
            starting_health: config.rooms.starting_health,
            default_theme: config.rooms.default_theme.clone(),
            tie_policy: config.reaction.tie_policy,
            pending_expiry: config.reaction.pending_expiry(),
        }
    }
}

/// Result of `find_match`.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Paired into the oldest waiting room.
    Joined(RoomSnapshot),
    /// Nobody was waiting; a fresh public room was opened.
    Created(RoomSnapshot),
}

/// Result of `leave_room`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub code: AccessCode,
    /// Member left behind in a room that had already paired. They get the
    /// `game_over` notice.
    pub notify: Option<PlayerId>,
}

/// Result of `update_health`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthUpdate {
    pub other: Option<PlayerId>,
    /// Health hit zero while a game was underway.
    pub fatal: bool,
}

/// Process-wide registry of rooms plus the public matchmaking queue.
pub struct RoomDirectory {
    rooms: BTreeMap<AccessCode, Room>,
    match_queue: VecDeque<AccessCode>,
    settings: DirectorySettings,
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new(DirectorySettings::default())
    }
}

impl RoomDirectory {
    pub fn new(settings: DirectorySettings) -> Self {
        Self {
            rooms: BTreeMap::new(),
            match_queue: VecDeque::new(),
            settings,
        }
    }

    /// Reserve an access code that no live room uses.
    pub fn allocate_code(&self, private: bool) -> Result<AccessCode, SessionError> {
        if private {
            for _ in 0..PRIVATE_CODE_RETRIES {
                let code = generate_private_code(self.settings.private_code_digits);
                if !self.rooms.contains_key(&code) {
                    return Ok(code);
                }
            }
            tracing::warn!("Private code space exhausted");
            return Err(SessionError::PoolExhausted);
        }

        // Public codes sort first and ascending, so the first gap in the
        // key sequence is the lowest free code.
        let mut candidate: u32 = 1;
        for code in self.rooms.keys() {
            match code {
                AccessCode::Public(n) if *n == candidate => candidate += 1,
                AccessCode::Public(n) if *n < candidate => {},
                _ => break,
            }
        }
        if candidate <= self.settings.public_pool_size {
            Ok(AccessCode::Public(candidate))
        } else {
            tracing::warn!(
                pool = self.settings.public_pool_size,
                "Public code pool exhausted"
            );
            Err(SessionError::PoolExhausted)
        }
    }

    /// Open a room under `code` with `creator` seated. `code` must come from
    /// `allocate_code`.
    pub fn create_room(
        &mut self,
        code: AccessCode,
        creator: PlayerId,
        theme: Option<String>,
        options: serde_json::Value,
    ) -> Result<RoomSnapshot, SessionError> {
        if self.rooms.contains_key(&code) {
            return Err(SessionError::InvalidTransition("access code already in use"));
        }

        let settings = RoomSettings {
            theme: theme
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.settings.default_theme.clone()),
            options,
            starting_health: self.settings.starting_health,
        };
        let mut room = Room::new(code.clone(), settings);
        if room.seat(creator.clone()).is_err() {
            return Err(SessionError::InvalidTransition("cannot seat creator"));
        }
        let snapshot = room.snapshot();

        if !room.is_private() {
            self.match_queue.push_back(code.clone());
        }
        tracing::info!(
            player_id = %creator,
            room = %code,
            private = room.is_private(),
            "Room created"
        );
        self.rooms.insert(code, room);
        Ok(snapshot)
    }

    /// Fail early if `code` could not accept another player right now.
    pub fn check_joinable(&self, code: &AccessCode) -> Result<(), SessionError> {
        let room = self
            .rooms
            .get(code)
            .ok_or_else(|| SessionError::RoomNotFound(code.clone()))?;
        if room.is_full() {
            return Err(SessionError::RoomFull(code.clone()));
        }
        Ok(())
    }

    /// Seat `joiner` in the room's open slot.
    pub fn join_room(
        &mut self,
        code: &AccessCode,
        joiner: PlayerId,
    ) -> Result<RoomSnapshot, SessionError> {
        let room = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| SessionError::RoomNotFound(code.clone()))?;

        match room.seat(joiner.clone()) {
            Ok(_) => {},
            Err(SeatError::AlreadyMember) => return Ok(room.snapshot()),
            Err(SeatError::Full) => return Err(SessionError::RoomFull(code.clone())),
        }
        let snapshot = room.snapshot();
        self.match_queue.retain(|c| c != code);

        tracing::info!(player_id = %joiner, room = %code, "Player joined room");
        Ok(snapshot)
    }

    /// Pair `requester` with the longest-waiting public room, or open a new
    /// one if nobody is waiting.
    pub fn find_match(
        &mut self,
        requester: PlayerId,
        theme: Option<String>,
        options: serde_json::Value,
    ) -> Result<MatchOutcome, SessionError> {
        while let Some(code) = self.match_queue.pop_front() {
            let eligible = self.rooms.get(&code).is_some_and(|room| {
                room.state() == RoomState::WaitingForOpponent
                    && room.occupant_count() == 1
                    && !room.is_private()
            });
            if !eligible {
                tracing::debug!(room = %code, "Dropping stale match queue entry");
                continue;
            }
            return self.join_room(&code, requester).map(MatchOutcome::Joined);
        }

        let code = self.allocate_code(false)?;
        self.create_room(code, requester, theme, options)
            .map(MatchOutcome::Created)
    }

    /// Remove `leaver` from the room. A room that had paired is finished and
    /// torn down; a room still waiting is simply discarded.
    pub fn leave_room(
        &mut self,
        code: &AccessCode,
        leaver: &PlayerId,
    ) -> Result<LeaveOutcome, SessionError> {
        let room = self.member_room_mut(code, leaver)?;
        let paired = !matches!(
            room.state(),
            RoomState::Empty | RoomState::WaitingForOpponent
        );
        room.vacate(leaver);
        let notify = if paired {
            room.finish();
            room.members().next().cloned()
        } else {
            None
        };

        self.remove_room(code);
        tracing::info!(player_id = %leaver, room = %code, "Player left room");
        Ok(LeaveOutcome {
            code: code.clone(),
            notify,
        })
    }

    /// Bring a room back to its joinable baseline after a game concluded.
    /// Returns the fresh snapshot, or `None` if the room was empty and removed.
    pub fn reset_room(&mut self, code: &AccessCode) -> Option<RoomSnapshot> {
        let room = self.rooms.get_mut(code)?;
        room.reset();
        match room.state() {
            RoomState::Empty => {
                self.remove_room(code);
                None
            },
            state => {
                let snapshot = room.snapshot();
                if state == RoomState::WaitingForOpponent
                    && !room.is_private()
                    && !self.match_queue.contains(code)
                {
                    self.match_queue.push_back(code.clone());
                }
                tracing::debug!(room = %code, ?state, "Room reset");
                Some(snapshot)
            },
        }
    }

    pub fn mark_ready(
        &mut self,
        code: &AccessCode,
        player_id: &PlayerId,
    ) -> Result<ReadyOutcome, SessionError> {
        let room = self.member_room_mut(code, player_id)?;
        match room.mark_ready(player_id) {
            ReadyOutcome::MissingOpponent => {
                Err(SessionError::InvalidTransition("waiting for an opponent"))
            },
            ReadyOutcome::NotAccepting => {
                Err(SessionError::InvalidTransition("game already started"))
            },
            outcome => Ok(outcome),
        }
    }

    /// Start play on the first gameplay message and return the opponent.
    pub fn begin_play(
        &mut self,
        code: &AccessCode,
        player_id: &PlayerId,
    ) -> Result<Option<PlayerId>, SessionError> {
        let room = self.member_room_mut(code, player_id)?;
        if room.begin_play() {
            tracing::info!(room = %code, "Game started");
        }
        Ok(room.other_member(player_id).cloned())
    }

    pub fn update_health(
        &mut self,
        code: &AccessCode,
        player_id: &PlayerId,
        health: i32,
    ) -> Result<HealthUpdate, SessionError> {
        let room = self.member_room_mut(code, player_id)?;
        if room.begin_play() {
            tracing::info!(room = %code, "Game started");
        }
        // A late zero for the game that just ended must not end the next one.
        let fatal = health <= 0 && !room.is_concluded();
        if health > 0 || fatal {
            room.set_health(player_id, health);
        } else {
            tracing::debug!(player_id = %player_id, room = %code, "Ignoring repeat death report");
        }
        Ok(HealthUpdate {
            other: room.other_member(player_id).cloned(),
            fatal,
        })
    }

    /// Feed a reaction report into the room's contest.
    pub fn report_reaction(
        &mut self,
        code: &AccessCode,
        report: ReactionReport,
        now: Instant,
    ) -> Result<Option<ReactionVerdict>, SessionError> {
        let expiry = self.settings.pending_expiry;
        let policy = self.settings.tie_policy;
        let room = self.member_room_mut(code, &report.player_id)?;
        Ok(room.record_reaction(report, now, expiry, policy))
    }

    pub fn is_member(&self, code: &AccessCode, player_id: &PlayerId) -> bool {
        self.rooms.get(code).is_some_and(|r| r.contains(player_id))
    }

    /// Occupants of a room, creator first.
    pub fn members(&self, code: &AccessCode) -> Vec<PlayerId> {
        self.rooms
            .get(code)
            .map(|r| r.members().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room(&self, code: &AccessCode) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn queued_codes(&self) -> impl Iterator<Item = &AccessCode> {
        self.match_queue.iter()
    }

    /// Summaries of every live room, public codes ascending then private.
    pub fn debug_snapshot(&self) -> Vec<RoomSummary> {
        self.rooms.values().map(Room::summary).collect()
    }

    /// Drop reaction reports whose opponent never answered.
    pub fn expire_reactions(&mut self, now: Instant) -> usize {
        let expiry = self.settings.pending_expiry;
        let mut expired = 0;
        for room in self.rooms.values_mut() {
            if room.expire_reaction(now, expiry) {
                expired += 1;
            }
        }
        expired
    }

    /// Remove rooms that have waited alone longer than `max_wait`. Returns the
    /// evicted codes with their creators.
    pub fn evict_waiting(
        &mut self,
        now: Instant,
        max_wait: Duration,
    ) -> Vec<(AccessCode, PlayerId)> {
        let stale: Vec<(AccessCode, PlayerId)> = self
            .rooms
            .values()
            .filter(|room| {
                room.state() == RoomState::WaitingForOpponent
                    && now.saturating_duration_since(room.created_at()) > max_wait
            })
            .filter_map(|room| Some((room.code().clone(), room.creator()?.clone())))
            .collect();

        for (code, creator) in &stale {
            self.remove_room(code);
            tracing::info!(player_id = %creator, room = %code, "Evicted idle waiting room");
        }
        stale
    }

    /// `(rooms, waiting, players)` for the health endpoint.
    pub fn stats(&self) -> (usize, usize, usize) {
        let waiting = self
            .rooms
            .values()
            .filter(|r| r.state() == RoomState::WaitingForOpponent)
            .count();
        let players = self.rooms.values().map(Room::occupant_count).sum();
        (self.rooms.len(), waiting, players)
    }

    fn member_room_mut(
        &mut self,
        code: &AccessCode,
        player_id: &PlayerId,
    ) -> Result<&mut Room, SessionError> {
        self.rooms
            .get_mut(code)
            .filter(|r| r.contains(player_id))
            .ok_or(SessionError::NotInRoom)
    }

    fn remove_room(&mut self, code: &AccessCode) {
        if self.rooms.remove(code).is_some() {
            self.match_queue.retain(|c| c != code);
            tracing::debug!(room = %code, "Room removed");
        }
    }
}
