//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub arena: ArenaConfig,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub tick: TickConfig,
}

impl Config {
    /// Load configuration from `config.toml` or use defaults, then apply
    /// environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = Path::new("config.toml");
        let mut config: Self = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            info!("No config.toml found, creating default config");
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            default_config
        };
        config.apply_env();
        Ok(config)
    }

    /// `SNOWFIGHT_PORT` and `SNOWFIGHT_WORKERS` override the file values.
    fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("SNOWFIGHT_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid SNOWFIGHT_PORT: {}", port),
            }
        }
        if let Ok(workers) = std::env::var("SNOWFIGHT_WORKERS") {
            match workers.parse() {
                Ok(workers) => self.server.workers = workers,
                Err(_) => warn!("Ignoring invalid SNOWFIGHT_WORKERS: {}", workers),
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            arena: ArenaConfig::default(),
            view: ViewConfig::default(),
            tick: TickConfig::default(),
        }
    }
}

/// Networking and worker settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Number of worker tasks sharing the arena.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Connections per IP limit.
    #[serde(default = "default_ip_limit")]
    pub ip_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            workers: default_workers(),
            max_connections: default_max_connections(),
            ip_limit: default_ip_limit(),
        }
    }
}

fn default_port() -> u16 {
    12345
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_workers() -> usize {
    4
}
fn default_max_connections() -> usize {
    100
}
fn default_ip_limit() -> usize {
    100
}

/// World rectangle and spatial cell size.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArenaConfig {
    #[serde(default = "default_arena_size")]
    pub width: i32,
    #[serde(default = "default_arena_size")]
    pub height: i32,
    #[serde(default = "default_cell_size")]
    pub cell_size: i32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            width: default_arena_size(),
            height: default_arena_size(),
            cell_size: default_cell_size(),
        }
    }
}

fn default_arena_size() -> i32 {
    1600
}
fn default_cell_size() -> i32 {
    100
}

/// Half-extents of the per-player view window.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ViewConfig {
    #[serde(default = "default_view_width")]
    pub width: f64,
    #[serde(default = "default_view_height")]
    pub height: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            width: default_view_width(),
            height: default_view_height(),
        }
    }
}

fn default_view_width() -> f64 {
    1600.0
}
fn default_view_height() -> f64 {
    900.0
}

/// Worker tick intervals in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TickConfig {
    #[serde(default = "default_players_ms")]
    pub players_ms: u64,
    #[serde(default = "default_objects_ms")]
    pub objects_ms: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            players_ms: default_players_ms(),
            objects_ms: default_objects_ms(),
        }
    }
}

fn default_players_ms() -> u64 {
    10
}
fn default_objects_ms() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_wire_contract() {
        let config = Config::default();
        assert_eq!(config.server.port, 12345);
        assert_eq!(config.server.workers, 4);
        assert_eq!(config.arena.width, 1600);
        assert_eq!(config.arena.height, 1600);
        assert_eq!(config.arena.cell_size, 100);
        assert_eq!(config.view.width, 1600.0);
        assert_eq!(config.view.height, 900.0);
        assert_eq!(config.tick.players_ms, 10);
        assert_eq!(config.tick.objects_ms, 30);
    }

    #[test]
    fn empty_file_fills_every_section() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 12345);
        assert_eq!(config.arena.cell_size, 100);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str("[server]\nport = 9000\nworkers = 2\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.workers, 2);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.arena.width, 1600);
    }
}
