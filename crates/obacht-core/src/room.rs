use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::player::PlayerId;
use crate::reaction::{ReactionReport, TiePolicy, arbitrate};

/// Marker that opens every private access code. Public codes are bare
/// integers, so the two namespaces can never overlap.
pub const PRIVATE_CODE_PREFIX: char = 'P';

/// Identifier a player types or shares to reach a specific room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessCode {
    /// Drawn from the bounded public pool; reused once the room is gone.
    Public(u32),
    /// Invitation-only; never enters the matchmaking queue.
    Private(String),
}

impl AccessCode {
    pub fn is_private(&self) -> bool {
        matches!(self, Self::Private(_))
    }
}

impl fmt::Display for AccessCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public(n) => write!(f, "{n}"),
            Self::Private(s) => f.write_str(s),
        }
    }
}

impl Serialize for AccessCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Public(n) => serializer.serialize_u32(*n),
            Self::Private(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for AccessCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawCode {
            Number(u64),
            Text(String),
        }

        match RawCode::deserialize(deserializer)? {
            RawCode::Number(n) => u32::try_from(n)
                .map(Self::Public)
                .map_err(|_| serde::de::Error::custom(format!("access code out of range: {n}"))),
            RawCode::Text(s) => parse_access_code(&s)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid access code: {s:?}"))),
        }
    }
}

/// Parse the textual form of a code: `P`-prefixed strings are private,
/// plain digit strings are public.
pub fn parse_access_code(s: &str) -> Option<AccessCode> {
    let s = s.trim();
    if s.starts_with(PRIVATE_CODE_PREFIX) {
        return is_valid_private_code(s).then(|| AccessCode::Private(s.to_string()));
    }
    s.parse::<u32>().ok().map(AccessCode::Public)
}

/// Generate a private code: the marker followed by `digits` random decimals.
pub fn generate_private_code(digits: u32) -> AccessCode {
    let digits = digits.clamp(1, 9);
    let bound = 10u32.pow(digits);
    let n = rand::rng().random_range(0..bound);
    AccessCode::Private(format!(
        "{PRIVATE_CODE_PREFIX}{n:0width$}",
        width = digits as usize
    ))
}

/// Check that a string has the private-code shape (`P` + at least one digit).
pub fn is_valid_private_code(s: &str) -> bool {
    match s.strip_prefix(PRIVATE_CODE_PREFIX) {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Lifecycle of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Empty,
    WaitingForOpponent,
    BothJoined,
    BothReady,
    Playing,
    Finished,
}

impl RoomState {
    /// Whether `self -> next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: RoomState) -> bool {
        use RoomState::*;
        matches!(
            (self, next),
            (Empty, WaitingForOpponent)
                | (WaitingForOpponent, BothJoined)
                | (BothJoined, BothReady)
                | (BothReady, Playing)
                | (WaitingForOpponent | BothJoined | BothReady | Playing, Finished)
                | (Finished, Empty | WaitingForOpponent | BothJoined)
        )
    }
}

/// Which of the two seats a player holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Creator,
    Joiner,
}

/// Why a player could not be seated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatError {
    Full,
    AlreadyMember,
}

/// Result of a `player_ready` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Counted; still waiting on the opponent.
    Recorded,
    /// Sender was already counted; nothing changed.
    AlreadyReady,
    /// This signal completed the pair. Emitted exactly once per game.
    BothReady,
    /// The opponent seat is empty.
    MissingOpponent,
    /// The room is past the readiness phase.
    NotAccepting,
}

/// First half of a reaction contest, waiting on the opponent.
#[derive(Debug, Clone)]
pub struct PendingReaction {
    pub report: ReactionReport,
    pub received_at: Instant,
}

/// Decided reaction contest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionVerdict {
    pub kind: String,
    pub winner: Option<PlayerId>,
}

/// Parameters fixed at room creation.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub theme: String,
    pub options: serde_json::Value,
    pub starting_health: i32,
}

/// Full room description sent to both members in `room_detail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub pin: AccessCode,
    pub closed: bool,
    pub state: RoomState,
    pub theme: String,
    #[serde(default)]
    pub options: serde_json::Value,
    pub creating_player_id: Option<PlayerId>,
    pub joining_player_id: Option<PlayerId>,
    pub creating_player_health: Option<i32>,
    pub joining_player_health: Option<i32>,
}

/// One row of the diagnostic room listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub pin: AccessCode,
    pub occupants: usize,
    pub state: RoomState,
    pub closed: bool,
}

/// A pairing of at most two players.
#[derive(Debug, Clone)]
pub struct Room {
    code: AccessCode,
    state: RoomState,
    creator: Option<PlayerId>,
    joiner: Option<PlayerId>,
    readiness: HashSet<PlayerId>,
    health: HashMap<PlayerId, i32>,
    settings: RoomSettings,
    pending_reaction: Option<PendingReaction>,
    /// Set by `reset` after a game ends; cleared once a new game begins
    /// forming (a seat fills or a player readies).
    concluded: bool,
    created_at: Instant,
}

impl Room {
    pub fn new(code: AccessCode, settings: RoomSettings) -> Self {
        Self {
            code,
            state: RoomState::Empty,
            creator: None,
            joiner: None,
            readiness: HashSet::new(),
            health: HashMap::new(),
            settings,
            pending_reaction: None,
            concluded: false,
            created_at: Instant::now(),
        }
    }

    pub fn code(&self) -> &AccessCode {
        &self.code
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn is_private(&self) -> bool {
        self.code.is_private()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn creator(&self) -> Option<&PlayerId> {
        self.creator.as_ref()
    }

    pub fn joiner(&self) -> Option<&PlayerId> {
        self.joiner.as_ref()
    }

    /// Occupied seats, creator first.
    pub fn members(&self) -> impl Iterator<Item = &PlayerId> {
        self.creator.iter().chain(self.joiner.iter())
    }

    pub fn occupant_count(&self) -> usize {
        self.members().count()
    }

    pub fn is_full(&self) -> bool {
        self.creator.is_some() && self.joiner.is_some()
    }

    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.members().any(|m| m == player_id)
    }

    /// The member that is not `player_id`, if seated.
    pub fn other_member(&self, player_id: &PlayerId) -> Option<&PlayerId> {
        self.members().find(|m| *m != player_id)
    }

    /// The last game was reset and no new one has started forming yet.
    pub fn is_concluded(&self) -> bool {
        self.concluded
    }

    pub fn health_of(&self, player_id: &PlayerId) -> Option<i32> {
        self.health.get(player_id).copied()
    }

    pub fn is_ready(&self, player_id: &PlayerId) -> bool {
        self.readiness.contains(player_id)
    }

    pub fn pending_reaction(&self) -> Option<&PendingReaction> {
        self.pending_reaction.as_ref()
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it did.
    pub fn transition(&mut self, next: RoomState) -> bool {
        let valid = self.state.can_transition_to(next);
        if valid {
            self.state = next;
        } else {
            tracing::warn!(
                room = %self.code,
                from = ?self.state,
                to = ?next,
                "Invalid room state transition"
            );
        }
        valid
    }

    /// Put a player into the first free seat.
    pub fn seat(&mut self, player_id: PlayerId) -> Result<Slot, SeatError> {
        if self.contains(&player_id) {
            return Err(SeatError::AlreadyMember);
        }
        let slot = if self.creator.is_none() {
            Slot::Creator
        } else if self.joiner.is_none() {
            Slot::Joiner
        } else {
            return Err(SeatError::Full);
        };

        self.health
            .insert(player_id.clone(), self.settings.starting_health);
        match slot {
            Slot::Creator => self.creator = Some(player_id),
            Slot::Joiner => self.joiner = Some(player_id),
        }
        self.concluded = false;
        match (self.state, self.is_full()) {
            (RoomState::Empty, false) => {
                self.transition(RoomState::WaitingForOpponent);
            },
            (RoomState::WaitingForOpponent, true) => {
                self.transition(RoomState::BothJoined);
            },
            _ => {},
        }
        Ok(slot)
    }

    /// Clear the player's seat and any per-player state. Returns false if the
    /// player was not seated.
    pub fn vacate(&mut self, player_id: &PlayerId) -> bool {
        let slot = if self.creator.as_ref() == Some(player_id) {
            &mut self.creator
        } else if self.joiner.as_ref() == Some(player_id) {
            &mut self.joiner
        } else {
            return false;
        };
        *slot = None;
        self.readiness.remove(player_id);
        self.health.remove(player_id);
        if self
            .pending_reaction
            .as_ref()
            .is_some_and(|p| &p.report.player_id == player_id)
        {
            self.pending_reaction = None;
        }
        true
    }

    pub fn mark_ready(&mut self, player_id: &PlayerId) -> ReadyOutcome {
        if !self.is_full() {
            return ReadyOutcome::MissingOpponent;
        }
        if self.state != RoomState::BothJoined {
            return ReadyOutcome::NotAccepting;
        }
        if !self.readiness.insert(player_id.clone()) {
            return ReadyOutcome::AlreadyReady;
        }
        self.concluded = false;
        if self.readiness.len() == 2 && self.transition(RoomState::BothReady) {
            return ReadyOutcome::BothReady;
        }
        ReadyOutcome::Recorded
    }

    /// First gameplay traffic after `game_ready` starts the match.
    pub fn begin_play(&mut self) -> bool {
        self.state == RoomState::BothReady && self.transition(RoomState::Playing)
    }

    /// Record a player's reported health. Returns false if not seated.
    pub fn set_health(&mut self, player_id: &PlayerId, health: i32) -> bool {
        match self.health.get_mut(player_id) {
            Some(h) => {
                *h = health;
                true
            },
            None => false,
        }
    }

    /// End the current game. Only the first call per game succeeds.
    pub fn finish(&mut self) -> bool {
        self.state != RoomState::Finished && self.transition(RoomState::Finished)
    }

    /// Return to a joinable baseline keeping whoever is still seated.
    pub fn reset(&mut self) {
        if self.state != RoomState::Finished {
            self.finish();
        }
        self.readiness.clear();
        self.pending_reaction = None;
        let starting = self.settings.starting_health;
        for h in self.health.values_mut() {
            *h = starting;
        }

        // A lone joiner becomes the creator so the seat order stays dense.
        if self.creator.is_none() {
            self.creator = self.joiner.take();
        }
        let baseline = match self.occupant_count() {
            2 => RoomState::BothJoined,
            1 => RoomState::WaitingForOpponent,
            _ => RoomState::Empty,
        };
        self.transition(baseline);
        self.concluded = true;
    }

    /// Feed one reaction report into the room's pending contest.
    ///
    /// A stale pending report (older than `expiry`) is discarded first. A
    /// repeat from the same player, or a report for a different bonus type,
    /// replaces the pending one. A matching report from the opponent decides
    /// the contest and clears the pending slot.
    pub fn record_reaction(
        &mut self,
        report: ReactionReport,
        now: Instant,
        expiry: Duration,
        policy: TiePolicy,
    ) -> Option<ReactionVerdict> {
        self.expire_reaction(now, expiry);

        match self.pending_reaction.take() {
            Some(pending)
                if pending.report.player_id != report.player_id
                    && pending.report.kind == report.kind =>
            {
                let winner = arbitrate(&pending.report, &report, policy);
                Some(ReactionVerdict {
                    kind: report.kind,
                    winner,
                })
            },
            _ => {
                self.pending_reaction = Some(PendingReaction {
                    report,
                    received_at: now,
                });
                None
            },
        }
    }

    /// Drop the pending reaction if it has waited longer than `expiry`.
    /// Returns whether anything was dropped.
    pub fn expire_reaction(&mut self, now: Instant, expiry: Duration) -> bool {
        let stale = self
            .pending_reaction
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.received_at) > expiry);
        if stale {
            self.pending_reaction = None;
        }
        stale
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            pin: self.code.clone(),
            closed: self.is_private(),
            state: self.state,
            theme: self.settings.theme.clone(),
            options: self.settings.options.clone(),
            creating_player_id: self.creator.clone(),
            joining_player_id: self.joiner.clone(),
            creating_player_health: self.creator.as_ref().and_then(|p| self.health_of(p)),
            joining_player_health: self.joiner.as_ref().and_then(|p| self.health_of(p)),
        }
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            pin: self.code.clone(),
            occupants: self.occupant_count(),
            state: self.state,
            closed: self.is_private(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::default_settings as settings;

    fn full_room() -> (Room, PlayerId, PlayerId) {
        let mut room = Room::new(AccessCode::Public(1), settings());
        let a = PlayerId::from("a");
        let b = PlayerId::from("b");
        room.seat(a.clone()).unwrap();
        room.seat(b.clone()).unwrap();
        (room, a, b)
    }

    fn report(pid: &PlayerId, kind: &str, ms: u64) -> ReactionReport {
        ReactionReport {
            player_id: pid.clone(),
            kind: kind.to_string(),
            reaction_time_ms: ms,
        }
    }

    #[test]
    fn seating_advances_lifecycle() {
        let mut room = Room::new(AccessCode::Public(1), settings());
        assert_eq!(room.state(), RoomState::Empty);

        assert_eq!(room.seat(PlayerId::from("a")), Ok(Slot::Creator));
        assert_eq!(room.state(), RoomState::WaitingForOpponent);

        assert_eq!(room.seat(PlayerId::from("b")), Ok(Slot::Joiner));
        assert_eq!(room.state(), RoomState::BothJoined);
        assert_eq!(room.health_of(&PlayerId::from("b")), Some(3));
    }

    #[test]
    fn third_player_is_rejected() {
        let (mut room, _, _) = full_room();
        assert_eq!(room.seat(PlayerId::from("c")), Err(SeatError::Full));
        assert_eq!(room.occupant_count(), 2);
    }

    #[test]
    fn same_player_cannot_take_both_seats() {
        let mut room = Room::new(AccessCode::Public(1), settings());
        room.seat(PlayerId::from("a")).unwrap();
        assert_eq!(room.seat(PlayerId::from("a")), Err(SeatError::AlreadyMember));
        assert_eq!(room.occupant_count(), 1);
    }

    #[test]
    fn readiness_is_a_set() {
        let (mut room, a, b) = full_room();
        assert_eq!(room.mark_ready(&a), ReadyOutcome::Recorded);
        assert_eq!(room.mark_ready(&a), ReadyOutcome::AlreadyReady);
        assert_eq!(room.state(), RoomState::BothJoined);
        assert_eq!(room.mark_ready(&b), ReadyOutcome::BothReady);
        assert_eq!(room.state(), RoomState::BothReady);
        assert_eq!(room.mark_ready(&b), ReadyOutcome::NotAccepting);
    }

    #[test]
    fn ready_needs_an_opponent() {
        let mut room = Room::new(AccessCode::Public(1), settings());
        let a = PlayerId::from("a");
        room.seat(a.clone()).unwrap();
        assert_eq!(room.mark_ready(&a), ReadyOutcome::MissingOpponent);
    }

    #[test]
    fn begin_play_only_from_both_ready() {
        let (mut room, a, b) = full_room();
        assert!(!room.begin_play());
        room.mark_ready(&a);
        room.mark_ready(&b);
        assert!(room.begin_play());
        assert_eq!(room.state(), RoomState::Playing);
        assert!(!room.begin_play());
    }

    #[test]
    fn finish_happens_once() {
        let (mut room, _, _) = full_room();
        assert!(room.finish());
        assert!(!room.finish());
    }

    #[test]
    fn reset_restores_baseline() {
        let (mut room, a, b) = full_room();
        room.mark_ready(&a);
        room.mark_ready(&b);
        room.begin_play();
        room.set_health(&a, 0);
        room.finish();
        room.reset();

        assert_eq!(room.state(), RoomState::BothJoined);
        assert_eq!(room.health_of(&a), Some(3));
        assert!(!room.is_ready(&a));
        assert!(!room.is_ready(&b));
    }

    #[test]
    fn concluded_until_next_ready() {
        let (mut room, a, b) = full_room();
        assert!(!room.is_concluded());
        room.reset();
        assert!(room.is_concluded());
        assert_eq!(room.mark_ready(&b), ReadyOutcome::Recorded);
        assert!(!room.is_concluded());
        assert!(!room.is_ready(&a));
    }

    #[test]
    fn new_opponent_clears_concluded() {
        let (mut room, a, b) = full_room();
        room.vacate(&b);
        room.reset();
        assert!(room.is_concluded());
        room.seat(PlayerId::from("c")).unwrap();
        assert!(!room.is_concluded());
        assert_eq!(room.creator(), Some(&a));
    }

    #[test]
    fn reset_with_lone_joiner_promotes_to_creator() {
        let (mut room, a, b) = full_room();
        room.vacate(&a);
        room.reset();
        assert_eq!(room.creator(), Some(&b));
        assert_eq!(room.joiner(), None);
        assert_eq!(room.state(), RoomState::WaitingForOpponent);
    }

    #[test]
    fn invalid_transition_rejected() {
        let (mut room, _, _) = full_room();
        assert!(!room.transition(RoomState::Playing));
        assert_eq!(room.state(), RoomState::BothJoined);
    }

    #[test]
    fn reaction_contest_decided_on_second_report() {
        let (mut room, a, b) = full_room();
        let now = Instant::now();
        let ttl = Duration::from_secs(5);

        assert!(
            room.record_reaction(report(&a, "snake", 240), now, ttl, TiePolicy::FirstReporter)
                .is_none()
        );
        assert!(room.pending_reaction().is_some());

        let verdict = room
            .record_reaction(report(&b, "snake", 180), now, ttl, TiePolicy::FirstReporter)
            .unwrap();
        assert_eq!(verdict.kind, "snake");
        assert_eq!(verdict.winner, Some(b));
        assert!(room.pending_reaction().is_none());
    }

    #[test]
    fn repeated_report_replaces_pending() {
        let (mut room, a, b) = full_room();
        let now = Instant::now();
        let ttl = Duration::from_secs(5);

        room.record_reaction(report(&a, "snake", 500), now, ttl, TiePolicy::FirstReporter);
        room.record_reaction(report(&a, "snake", 100), now, ttl, TiePolicy::FirstReporter);
        let verdict = room
            .record_reaction(report(&b, "snake", 200), now, ttl, TiePolicy::FirstReporter)
            .unwrap();
        assert_eq!(verdict.winner, Some(a));
    }

    #[test]
    fn mismatched_kind_starts_new_contest() {
        let (mut room, a, b) = full_room();
        let now = Instant::now();
        let ttl = Duration::from_secs(5);

        room.record_reaction(report(&a, "snake", 100), now, ttl, TiePolicy::FirstReporter);
        let verdict =
            room.record_reaction(report(&b, "bird", 50), now, ttl, TiePolicy::FirstReporter);
        assert!(verdict.is_none());
        assert_eq!(
            room.pending_reaction().map(|p| p.report.player_id.clone()),
            Some(b)
        );
    }

    #[test]
    fn expired_pending_report_is_discarded() {
        let (mut room, a, b) = full_room();
        let start = Instant::now();
        let ttl = Duration::from_millis(100);

        room.record_reaction(report(&a, "snake", 100), start, ttl, TiePolicy::FirstReporter);
        let later = start + Duration::from_millis(500);
        let verdict =
            room.record_reaction(report(&b, "snake", 300), later, ttl, TiePolicy::FirstReporter);
        assert!(verdict.is_none());
        assert_eq!(
            room.pending_reaction().map(|p| p.report.player_id.clone()),
            Some(b)
        );
    }

    #[test]
    fn vacate_clears_players_pending_reaction() {
        let (mut room, a, _) = full_room();
        room.record_reaction(
            report(&a, "snake", 100),
            Instant::now(),
            Duration::from_secs(5),
            TiePolicy::FirstReporter,
        );
        assert!(room.vacate(&a));
        assert!(room.pending_reaction().is_none());
        assert!(!room.vacate(&a));
    }

    #[test]
    fn snapshot_lists_both_players() {
        let (room, a, b) = full_room();
        let snap = room.snapshot();
        assert_eq!(snap.pin, AccessCode::Public(1));
        assert!(!snap.closed);
        assert_eq!(snap.creating_player_id, Some(a));
        assert_eq!(snap.joining_player_id, Some(b));
        assert_eq!(snap.joining_player_health, Some(3));
        assert_eq!(snap.theme, "desert");
    }

    #[test]
    fn access_code_wire_forms() {
        assert_eq!(
            serde_json::to_string(&AccessCode::Public(7)).unwrap(),
            "7"
        );
        assert_eq!(
            serde_json::to_string(&AccessCode::Private("P01234".into())).unwrap(),
            "\"P01234\""
        );
        let c: AccessCode = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(c, AccessCode::Public(42));
        let c: AccessCode = serde_json::from_str("\"P99\"").unwrap();
        assert_eq!(c, AccessCode::Private("P99".into()));
        assert!(serde_json::from_str::<AccessCode>("\"hello\"").is_err());
        assert!(serde_json::from_str::<AccessCode>("-1").is_err());
    }

    #[test]
    fn private_code_format() {
        for _ in 0..100 {
            let code = generate_private_code(5);
            let AccessCode::Private(s) = &code else {
                panic!("expected private code, got {code:?}");
            };
            assert_eq!(s.len(), 6);
            assert!(is_valid_private_code(s), "Invalid private code: {s}");
        }
    }
}
