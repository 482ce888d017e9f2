//! Server configuration
//!
//! Every section has defaults, so a TOML file only needs the keys it
//! changes. Command line flags are applied on top by the binary.

use crate::error::ServerError;
use clap::ValueEnum;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Ffa,
    Ctf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tick_rate: u32,
    pub mode: GameMode,
    pub max_players: usize,
    pub connections: ConnectionsConfig,
    pub chat: ChatConfig,
    pub horizon: HorizonConfig,
    pub world: WorldConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionsConfig {
    pub login_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    pub backup_timeout_ms: u64,
    pub pong_timeout_ms: u64,
    pub ping_interval_ms: u64,
    /// Delay between a graceful break and the transport close.
    pub break_grace_ms: u64,
    /// Peers connecting from these addresses are treated as bots.
    pub bot_ips: Vec<IpAddr>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub weight: u32,
    pub threshold: u32,
    pub mute_after_violations: u32,
    pub mute_duration_ms: u64,
    pub decay_per_second: u32,
    pub votemute_min_votes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    pub cell_size: f32,
    pub default_x: f32,
    pub default_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub width: f32,
    pub height: f32,
    pub id_retention_ms: u64,
    pub name_retention_ms: u64,
    pub score_board_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3501,
            tick_rate: 60,
            mode: GameMode::Ffa,
            max_players: 100,
            connections: ConnectionsConfig::default(),
            chat: ChatConfig::default(),
            horizon: HorizonConfig::default(),
            world: WorldConfig::default(),
        }
    }
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            login_timeout_ms: 2_000,
            ack_timeout_ms: 10_000,
            backup_timeout_ms: 10_000,
            pong_timeout_ms: 5_000,
            ping_interval_ms: 5_000,
            break_grace_ms: 500,
            bot_ips: Vec::new(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            weight: 20,
            threshold: 100,
            mute_after_violations: 3,
            mute_duration_ms: 10 * 60 * 1000,
            decay_per_second: 10,
            votemute_min_votes: 3,
        }
    }
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            cell_size: 512.0,
            default_x: 1000.0,
            default_y: 600.0,
            max_x: 2048.0,
            max_y: 1024.0,
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 32768.0,
            height: 16384.0,
            id_retention_ms: 60_000,
            name_retention_ms: 60 * 60 * 1000,
            score_board_interval_secs: 5,
        }
    }
}

impl WorldConfig {
    /// Player ids stay retired at least as long as their name is remembered.
    pub fn player_id_retention_ms(&self) -> u64 {
        self.id_retention_ms.max(self.name_retention_ms)
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ServerError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_ms(&self) -> u64 {
        (1000 / self.tick_rate.max(1)).max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ServerConfig::parse("").unwrap();
        assert_eq!(config.port, 3501);
        assert_eq!(config.mode, GameMode::Ffa);
        assert_eq!(config.chat.threshold, 100);
        assert_eq!(config.tick_ms(), 16);
    }

    #[test]
    fn test_player_ids_outlive_name_history() {
        let config = ServerConfig::parse("[world]\nid_retention_ms = 1000\nname_retention_ms = 5000").unwrap();
        assert_eq!(config.world.player_id_retention_ms(), 5000);

        let defaults = WorldConfig::default();
        assert!(defaults.player_id_retention_ms() >= defaults.name_retention_ms);
    }

    #[test]
    fn test_partial_sections_override_defaults() {
        let raw = r#"
            mode = "ctf"
            max_players = 8

            [connections]
            ack_timeout_ms = 3000
            bot_ips = ["10.0.0.7"]

            [chat]
            weight = 25
        "#;
        let config = ServerConfig::parse(raw).unwrap();

        assert_eq!(config.mode, GameMode::Ctf);
        assert_eq!(config.max_players, 8);
        assert_eq!(config.connections.ack_timeout_ms, 3000);
        assert_eq!(config.connections.login_timeout_ms, 2000);
        assert_eq!(config.connections.bot_ips.len(), 1);
        assert_eq!(config.chat.weight, 25);
        assert_eq!(config.chat.threshold, 100);
    }

    #[test]
    fn test_invalid_toml_is_a_config_error() {
        let result = ServerConfig::parse("max_players = \"lots\"");
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn test_address_formatting() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 9000,
            ..ServerConfig::default()
        };
        assert_eq!(config.address(), "0.0.0.0:9000");
    }
}
