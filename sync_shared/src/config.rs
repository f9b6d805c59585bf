//! Configuration system.
//!
//! Loads server/client configuration from JSON strings (file IO left to app).
//! Every field has a default so partial files are accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::player::{GameMode, Permissions, PlayerStats};

/// Server configuration. Read-only to the session core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:11000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Upper bound on reserved names (pending reservations plus connected players).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// When set, clients must present exactly this password.
    #[serde(default)]
    pub server_password: Option<String>,
    /// Player death is permanent.
    #[serde(default)]
    pub hardcore: bool,
    #[serde(default)]
    pub default_permissions: Permissions,
    #[serde(default)]
    pub default_player_stats: PlayerStats,
    #[serde(default)]
    pub game_mode: GameMode,
    /// How long a joining client has to acknowledge its initial sync.
    #[serde(default = "default_initial_sync_timeout_ms")]
    pub initial_sync_timeout_ms: u64,
    #[serde(default = "default_players_per_escape_pod")]
    pub players_per_escape_pod: usize,
    /// World save file.
    #[serde(default = "default_save_path")]
    pub save_path: String,
}

fn default_server_addr() -> String {
    "0.0.0.0:11000".to_string()
}

fn default_max_connections() -> usize {
    100
}

fn default_initial_sync_timeout_ms() -> u64 {
    300_000
}

fn default_players_per_escape_pod() -> usize {
    50
}

fn default_save_path() -> String {
    "world.json".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            max_connections: default_max_connections(),
            server_password: None,
            hardcore: false,
            default_permissions: Permissions::default(),
            default_player_stats: PlayerStats::default(),
            game_mode: GameMode::default(),
            initial_sync_timeout_ms: default_initial_sync_timeout_ms(),
            players_per_escape_pod: default_players_per_escape_pod(),
            save_path: default_save_path(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn initial_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_sync_timeout_ms)
    }

    /// Whether a server password is in force. An empty password counts as none.
    pub fn requires_password(&self) -> bool {
        self.server_password
            .as_deref()
            .is_some_and(|p| !p.is_empty())
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_server_addr")]
    pub server_addr: String,
    #[serde(default = "default_player_name")]
    pub player_name: String,
    #[serde(default)]
    pub server_password: Option<String>,
}

fn default_client_server_addr() -> String {
    "127.0.0.1:11000".to_string()
}

fn default_player_name() -> String {
    "Diver".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: default_client_server_addr(),
            player_name: default_player_name(),
            server_password: None,
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
