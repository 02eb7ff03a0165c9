pub mod net;
pub mod player;
pub mod reaction;
pub mod room;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::player::PlayerId;
    use crate::room::RoomSettings;

    /// Create `n` players with ids `p1`, `p2`, ...
    pub fn make_players(n: usize) -> Vec<PlayerId> {
        (1..=n).map(|i| PlayerId::from(format!("p{i}"))).collect()
    }

    /// Room settings matching the server defaults.
    pub fn default_settings() -> RoomSettings {
        RoomSettings {
            theme: "desert".to_string(),
            options: serde_json::Value::Null,
            starting_health: 3,
        }
    }
}
