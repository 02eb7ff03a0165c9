use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use obacht_core::reaction::TiePolicy;

/// Top-level server configuration, loaded from `obacht.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub rooms: RoomsConfig,
    pub reaction: ReactionConfig,
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            rooms: RoomsConfig::default(),
            reaction: ReactionConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Room allocation and lifecycle.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Public codes are drawn from `1..=public_pool_size`.
    pub public_pool_size: u32,
    pub private_code_digits: u32,
    pub starting_health: i32,
    pub default_theme: String,
    /// Evict rooms that waited this long for an opponent. 0 disables.
    pub waiting_timeout_secs: u64,
    pub janitor_interval_ms: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            public_pool_size: 9999,
            private_code_digits: 5,
            starting_health: 3,
            default_theme: "desert".to_string(),
            waiting_timeout_secs: 0,
            janitor_interval_ms: 1000,
        }
    }
}

impl RoomsConfig {
    pub fn waiting_timeout(&self) -> Option<Duration> {
        (self.waiting_timeout_secs > 0).then(|| Duration::from_secs(self.waiting_timeout_secs))
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_millis(self.janitor_interval_ms)
    }
}

/// Reaction-time contest arbitration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReactionConfig {
    pub tie_policy: TiePolicy,
    pub pending_expiry_ms: u64,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            tie_policy: TiePolicy::FirstReporter,
            pending_expiry_ms: 5000,
        }
    }
}

impl ReactionConfig {
    pub fn pending_expiry(&self) -> Duration {
        Duration::from_millis(self.pending_expiry_ms)
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    pub ws_rate_limit_per_sec: f64,
    pub player_message_buffer: usize,
    /// Largest inbound frame in bytes.
    pub max_message_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 500,
            ws_rate_limit_per_sec: 60.0,
            player_message_buffer: 256,
            max_message_size: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

fn reject(msg: &str) -> Result<(), ConfigError> {
    Err(ConfigError(msg.to_string()))
}

impl ServerConfig {
    /// Check every value the server depends on. Returns the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError(format!(
                "listen_addr {:?} is not a valid socket address",
                self.listen_addr
            )));
        }

        if self.rooms.public_pool_size == 0 {
            return reject("rooms.public_pool_size must be > 0");
        }
        if !(1..=9).contains(&self.rooms.private_code_digits) {
            return reject("rooms.private_code_digits must be between 1 and 9");
        }
        if self.rooms.starting_health <= 0 {
            return reject("rooms.starting_health must be > 0");
        }
        if self.rooms.janitor_interval_ms == 0 {
            return reject("rooms.janitor_interval_ms must be > 0");
        }
        if self.reaction.pending_expiry_ms == 0 {
            return reject("reaction.pending_expiry_ms must be > 0");
        }

        if self.limits.max_ws_connections == 0 {
            return reject("limits.max_ws_connections must be > 0");
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            return reject("limits.ws_rate_limit_per_sec must be > 0");
        }
        if self.limits.player_message_buffer == 0 {
            return reject("limits.player_message_buffer must be > 0");
        }
        if self.limits.max_message_size == 0 {
            return reject("limits.max_message_size must be > 0");
        }

        if self.rooms.public_pool_size < 10 {
            tracing::warn!(
                pool = self.rooms.public_pool_size,
                "Very small public code pool; players will see server_full quickly"
            );
        }
        Ok(())
    }

    /// Load config from `obacht.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("obacht.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from obacht.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse obacht.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No obacht.toml found, using defaults");
                ServerConfig::default()
            },
        };

        if let Ok(addr) = std::env::var("OBACHT_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(val) = std::env::var("OBACHT_PUBLIC_POOL_SIZE")
            && let Ok(n) = val.parse::<u32>()
        {
            config.rooms.public_pool_size = n;
        }
        if let Ok(val) = std::env::var("OBACHT_STARTING_HEALTH")
            && let Ok(n) = val.parse::<i32>()
        {
            config.rooms.starting_health = n;
        }
        if let Ok(val) = std::env::var("OBACHT_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.limits.max_ws_connections = n;
        }
        if let Ok(val) = std::env::var("OBACHT_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            config.limits.ws_rate_limit_per_sec = n;
        }

        config
    }

    /// Apply command line overrides. Only `--port=<n>` is recognised; other
    /// arguments are logged and ignored.
    pub fn with_args<I>(mut self, args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        for arg in args {
            let Some(port) = arg.strip_prefix("--port=") else {
                tracing::warn!(%arg, "Ignoring unknown argument");
                continue;
            };
            let port: u16 = port
                .parse()
                .map_err(|_| ConfigError(format!("invalid port: {port:?}")))?;
            let mut addr: SocketAddr = self.listen_addr.parse().map_err(|_| {
                ConfigError(format!(
                    "listen_addr {:?} is not a valid socket address",
                    self.listen_addr
                ))
            })?;
            addr.set_port(port);
            self.listen_addr = addr.to_string();
        }
        Ok(self)
    }
}
