//! `clap`-derived CLI for both binaries: the server's `serve` command and
//! the bridge agent's connection flags.

use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::bridge::BridgeAgentConfig;

#[derive(Parser)]
#[command(name = "tmuxdeck")]
#[command(version)]
#[command(about = "Self-hosted control plane for driving many tmux servers from a browser")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the web server (default if no subcommand is given).
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        pin: Option<String>,
        #[arg(long)]
        host_tmux_socket: Option<String>,
        #[arg(long)]
        docker_socket: Option<String>,
    },
}

#[derive(Parser)]
#[command(name = "tmuxdeck-bridge")]
#[command(version)]
#[command(about = "Bridge agent: relays a remote machine's tmux sessions to a tmuxdeck server")]
pub struct BridgeCli {
    /// WebSocket URL of the server's `/ws/bridge` endpoint.
    #[arg(long, env = "BRIDGE_URL")]
    pub url: String,

    /// Shared auth token the server recognizes.
    #[arg(long, env = "BRIDGE_TOKEN")]
    pub token: String,

    /// Display name reported to the server.
    #[arg(long, env = "BRIDGE_NAME")]
    pub name: Option<String>,

    /// Disable collecting sessions from the local (in-container) tmux server.
    #[arg(long)]
    pub no_local: bool,

    #[arg(long, env = "HOST_TMUX_SOCKET")]
    pub host_tmux_socket: Option<String>,

    #[arg(long, env = "DOCKER_SOCKET")]
    pub docker_socket: Option<String>,

    #[arg(long, env = "DOCKER_LABEL")]
    pub docker_label: Option<String>,

    /// Seconds between unsolicited session reports to the server.
    #[arg(long, default_value_t = 5)]
    pub report_interval: u64,
}

impl BridgeCli {
    pub fn into_config(self) -> BridgeAgentConfig {
        let mut config = BridgeAgentConfig {
            url: self.url,
            token: self.token,
            local: !self.no_local,
            host_tmux_socket: self.host_tmux_socket,
            docker_socket: self.docker_socket,
            docker_label: self.docker_label,
            session_report_interval: Duration::from_secs(self.report_interval),
            ..Default::default()
        };
        if let Some(name) = self.name {
            config.name = name;
        }
        config
    }
}
