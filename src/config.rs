//! Server configuration: load/save a TOML file under the user config dir,
//! with environment variable overrides for the values the original
//! deployment exposes as env vars.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tmuxdeck")
}

fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub bridge: BridgeServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            notifications: NotificationConfig::default(),
            bridge: BridgeServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Session PIN gating the terminal WS and SSE endpoints. `None` disables
    /// the auth gate entirely (explicitly allowed — the PIN module itself
    /// is an external collaborator; this crate only enforces the cookie
    /// check when a PIN has been configured).
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub host_tmux_socket: Option<String>,
    #[serde(default)]
    pub docker_socket: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7681
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            pin: None,
            host_tmux_socket: None,
            docker_socket: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_telegram_timeout")]
    pub telegram_notification_timeout_secs: u64,
}

fn default_telegram_timeout() -> u64 {
    60
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            telegram_notification_timeout_secs: default_telegram_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeServerConfig {
    /// Known bridge tokens and their ids/names. In a full deployment this
    /// is read from the JSON persistence store (out of scope); here it is
    /// a small inline table so the bridge server is runnable standalone.
    #[serde(default)]
    pub configs: Vec<BridgeConfigEntry>,
}

impl Default for BridgeServerConfig {
    fn default() -> Self {
        Self { configs: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfigEntry {
    pub id: String,
    pub name: String,
    pub token: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Load configuration, falling back to defaults when the file is absent or
/// malformed, then apply the same environment variable overrides the
/// original deployment's `AppConfig` (pydantic-settings) reads.
pub fn load_config() -> Config {
    let path = config_path();
    let mut config: Config = if !path.exists() {
        Config::default()
    } else {
        fs::read_to_string(&path)
            .ok()
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    };

    if let Ok(socket) = std::env::var("DOCKER_SOCKET") {
        config.server.docker_socket = Some(socket);
    }
    if let Ok(socket) = std::env::var("HOST_TMUX_SOCKET") {
        config.server.host_tmux_socket = Some(socket);
    }

    config
}

pub fn save_config(config: &Config) -> Result<()> {
    let dir = config_dir();
    fs::create_dir_all(&dir)?;
    let content = toml::to_string_pretty(config)?;
    fs::write(config_path(), content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_roundtrips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let parsed: Config = toml::from_str("").unwrap();
        assert_eq!(parsed.server.host, "127.0.0.1");
        assert_eq!(parsed.notifications.telegram_notification_timeout_secs, 60);
    }
}
