use serde::{Deserialize, Serialize};

use crate::player::PlayerId;

/// How a reaction contest with identical times is decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    /// The report that reached the server first wins.
    #[default]
    FirstReporter,
    /// Nobody gets the bonus.
    NoWinner,
}

/// One player's reported reaction to a bonus or trap prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionReport {
    pub player_id: PlayerId,
    pub kind: String,
    pub reaction_time_ms: u64,
}

/// Decide the winner of a reaction contest. `first` must be the report the
/// server received earlier. Strictly faster wins; ties follow `policy`.
pub fn arbitrate(
    first: &ReactionReport,
    second: &ReactionReport,
    policy: TiePolicy,
) -> Option<PlayerId> {
    use std::cmp::Ordering;

    match first.reaction_time_ms.cmp(&second.reaction_time_ms) {
        Ordering::Less => Some(first.player_id.clone()),
        Ordering::Greater => Some(second.player_id.clone()),
        Ordering::Equal => match policy {
            TiePolicy::FirstReporter => Some(first.player_id.clone()),
            TiePolicy::NoWinner => None,
        },
    }
}
