//! Source-agnostic tmux façade: a single `run(container_id, argv)` primitive
//! dispatched across local exec, a host tmux socket, docker exec, or a
//! bridge agent RPC, plus the higher-level operations built on top of it.

pub mod docker;

use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;

use crate::bridge::protocol::BridgeMessage;
use crate::bridge::{is_bridge, BridgeConnection, BridgeManager};
use crate::debug_log::DebugLog;
use crate::error::Result;
use crate::model::{make_bridge_session_id, make_session_id, Pane, TmuxSession, TmuxWindow};

pub const LOCAL_CONTAINER_ID: &str = "local";
pub const HOST_CONTAINER_ID: &str = "host";

/// The execution site a tmux argv is routed to.
pub enum Source {
    Local,
    Host { socket: String },
    Docker { id: String },
    Bridge { connection: Arc<BridgeConnection> },
    /// A `bridge:<id>` container id with no live agent connection. Carries
    /// no argv dispatch of its own; `dispatch` short-circuits it to `""`,
    /// matching `_run_cmd`'s `if not conn: return ""`.
    Unavailable,
}

/// Process-wide tmux dispatch singleton, injected into handlers via [`crate::app::App`].
pub struct TmuxManager {
    bridge_manager: Arc<BridgeManager>,
    host_tmux_socket: Option<String>,
    docker: Option<bollard::Docker>,
    debug_log: Arc<DebugLog>,
}

impl TmuxManager {
    pub fn new(
        bridge_manager: Arc<BridgeManager>,
        host_tmux_socket: Option<String>,
        docker: Option<bollard::Docker>,
        debug_log: Arc<DebugLog>,
    ) -> Self {
        Self {
            bridge_manager,
            host_tmux_socket,
            docker,
            debug_log,
        }
    }

    pub async fn resolve_source(&self, container_id: &str) -> Source {
        if container_id == LOCAL_CONTAINER_ID {
            Source::Local
        } else if container_id == HOST_CONTAINER_ID {
            Source::Host {
                socket: self.host_tmux_socket.clone().unwrap_or_default(),
            }
        } else if is_bridge(container_id) {
            let bridge_id = container_id.trim_start_matches("bridge:").to_string();
            match self.bridge_manager.get(&bridge_id).await {
                Some(connection) => Source::Bridge { connection },
                None => Source::Unavailable,
            }
        } else {
            Source::Docker {
                id: container_id.to_string(),
            }
        }
    }

    /// Run a tmux argv on the resolved source; on any failure, log and
    /// return the empty string rather than propagating — matches the
    /// spec's "transient upstream" error policy.
    pub async fn run_cmd(&self, container_id: &str, argv: &[String]) -> String {
        let source = self.resolve_source(container_id).await;
        match self.dispatch(&source, argv).await {
            Ok(out) => out,
            Err(e) => {
                self.debug_log
                    .error("tmux", format!("command failed on {container_id}"), Some(e.to_string()))
                    .await;
                String::new()
            }
        }
    }

    async fn dispatch(&self, source: &Source, argv: &[String]) -> Result<String> {
        match source {
            Source::Unavailable => Ok(String::new()),
            Source::Local => run_local(argv).await,
            Source::Host { socket } => run_host(socket, argv).await,
            Source::Docker { id } => {
                let docker = self
                    .docker
                    .as_ref()
                    .ok_or_else(|| crate::error::TmuxDeckError::docker("no docker client configured"))?;
                docker::exec_command(docker, id, argv).await
            }
            Source::Bridge { connection } => {
                let id = new_request_id();
                let session_source = match target_session_name(argv) {
                    Some(name) => connection.resolve_session_source(name).await,
                    None => "local".to_string(),
                };
                let reply = connection
                    .request(
                        id.clone(),
                        BridgeMessage::TmuxCmd {
                            id,
                            cmd: argv.to_vec(),
                            source: session_source,
                        },
                    )
                    .await?;
                match reply {
                    BridgeMessage::CmdResult { output, error: None, .. } => Ok(output),
                    BridgeMessage::CmdResult { error: Some(e), .. } => {
                        Err(crate::error::TmuxDeckError::bridge(e))
                    }
                    _ => Ok(String::new()),
                }
            }
        }
    }

    /// Two commands per container: one `list-sessions`, one `list-windows -a`
    /// covering every session at once, then joined in memory.
    pub async fn list_sessions(&self, container_id: &str) -> Vec<TmuxSession> {
        let sessions_out = self
            .run_cmd(
                container_id,
                &argv([
                    "tmux",
                    "list-sessions",
                    "-F",
                    "#{session_name}|#{session_windows}|#{session_created}|#{session_attached}",
                ]),
            )
            .await;

        let windows_out = self
            .run_cmd(
                container_id,
                &argv([
                    "tmux",
                    "list-windows",
                    "-a",
                    "-F",
                    "#{session_name}|#{window_index}|#{window_name}|#{window_active}|#{window_panes}|#{window_bell_flag}|#{window_activity_flag}|#{pane_current_command}|#{@pane_status}",
                ]),
            )
            .await;

        let mut windows_by_session: std::collections::HashMap<String, Vec<TmuxWindow>> =
            std::collections::HashMap::new();
        for line in windows_out.lines() {
            if let Some((session_name, window)) = parse_window_line_with_session(line) {
                windows_by_session.entry(session_name).or_default().push(window);
            }
        }

        let mut sessions = Vec::new();
        for line in sessions_out.lines() {
            if let Some(mut session) = parse_session_line(container_id, line) {
                session.windows = windows_by_session.remove(&session.name).unwrap_or_default();
                sessions.push(session);
            }
        }
        sessions
    }

    pub async fn list_windows(&self, container_id: &str, session_name: &str) -> Vec<TmuxWindow> {
        let out = self
            .run_cmd(
                container_id,
                &argv([
                    "tmux",
                    "list-windows",
                    "-t",
                    session_name,
                    "-F",
                    "#{window_index}|#{window_name}|#{window_active}|#{window_panes}|#{window_bell_flag}|#{window_activity_flag}|#{pane_current_command}|#{@pane_status}",
                ]),
            )
            .await;
        out.lines().filter_map(parse_window_line).collect()
    }

    pub async fn list_panes(&self, container_id: &str, session_name: &str, window_index: u32) -> Vec<Pane> {
        let target = format!("{session_name}:{window_index}");
        let out = self
            .run_cmd(
                container_id,
                &argv([
                    "tmux",
                    "list-panes",
                    "-t",
                    &target,
                    "-F",
                    "#{pane_index}|#{pane_active}|#{pane_width}|#{pane_height}|#{pane_title}|#{pane_current_command}",
                ]),
            )
            .await;
        out.lines().filter_map(parse_pane_line).collect()
    }

    async fn apply_session_options(&self, container_id: &str) {
        for cmd in session_option_commands() {
            self.run_cmd(container_id, &cmd).await;
        }
    }

    pub async fn create_session(&self, container_id: &str, session_name: &str) {
        self.run_cmd(
            container_id,
            &argv(["tmux", "new-session", "-d", "-s", session_name]),
        )
        .await;
        self.apply_session_options(container_id).await;
    }

    /// Create the session if it does not already exist; re-applies the
    /// idempotent session options either way (round-trip law in spec §8).
    pub async fn ensure_session(&self, container_id: &str, session_name: &str) {
        let sessions = self.list_sessions(container_id).await;
        if sessions.iter().any(|s| s.name == session_name) {
            self.apply_session_options(container_id).await;
        } else {
            self.create_session(container_id, session_name).await;
        }
    }

    pub async fn rename_session(&self, container_id: &str, old_name: &str, new_name: &str) {
        self.run_cmd(
            container_id,
            &argv(["tmux", "rename-session", "-t", old_name, new_name]),
        )
        .await;
    }

    pub async fn kill_session(&self, container_id: &str, session_name: &str) {
        self.run_cmd(container_id, &argv(["tmux", "kill-session", "-t", session_name]))
            .await;
    }

    pub async fn create_window(
        &self,
        container_id: &str,
        session_name: &str,
        window_name: Option<&str>,
    ) -> Vec<TmuxWindow> {
        let mut cmd = vec!["tmux".to_string(), "new-window".to_string(), "-t".to_string(), session_name.to_string()];
        if let Some(name) = window_name {
            cmd.push("-n".to_string());
            cmd.push(name.to_string());
        }
        self.run_cmd(container_id, &cmd).await;
        self.list_windows(container_id, session_name).await
    }

    pub async fn swap_windows(&self, container_id: &str, session_name: &str, index1: u32, index2: u32) {
        self.run_cmd(
            container_id,
            &argv([
                "tmux",
                "swap-window",
                "-s",
                &format!("{session_name}:{index1}"),
                "-t",
                &format!("{session_name}:{index2}"),
            ]),
        )
        .await;
    }

    pub async fn move_window(&self, container_id: &str, src_session: &str, window_index: u32, dst_session: &str) {
        self.run_cmd(
            container_id,
            &argv([
                "tmux",
                "move-window",
                "-s",
                &format!("{src_session}:{window_index}"),
                "-t",
                &format!("{dst_session}:"),
            ]),
        )
        .await;
    }

    pub async fn set_pane_status(&self, container_id: &str, session_name: &str, window_index: u32, status: &str) {
        self.run_cmd(
            container_id,
            &argv([
                "tmux",
                "set-option",
                "-p",
                "-t",
                &format!("{session_name}:{window_index}"),
                "@pane_status",
                status,
            ]),
        )
        .await;
    }

    pub async fn capture_pane(&self, container_id: &str, session_name: &str, window_index: u32, ansi: bool) -> String {
        let target = format!("{session_name}:{window_index}");
        let mut cmd = vec!["tmux".to_string(), "capture-pane".to_string(), "-p".to_string()];
        if ansi {
            cmd.push("-e".to_string());
        }
        cmd.push("-t".to_string());
        cmd.push(target);
        self.run_cmd(container_id, &cmd).await
    }

    pub async fn send_keys(&self, container_id: &str, session_name: &str, window_index: u32, text: &str, enter: bool) {
        let target = format!("{session_name}:{window_index}");
        let mut cmd = argv(["tmux", "send-keys", "-t", &target, text]);
        if enter {
            cmd.push("Enter".to_string());
        }
        self.run_cmd(container_id, &cmd).await;
    }

    pub async fn resolve_session_id(&self, container_id: &str, session_id: &str) -> Option<String> {
        self.list_sessions(container_id)
            .await
            .into_iter()
            .find(|s| s.id == session_id)
            .map(|s| s.name)
    }

    /// Scans every known container. Kept as a linear scan per the spec's
    /// open question (an index is "likely warranted but absent from the
    /// source"); callers that hit this on a hot path should maintain their
    /// own `session_id -> container_id` cache rather than this function
    /// building one per call.
    pub async fn resolve_session_id_global(
        &self,
        container_ids: &[String],
        session_id: &str,
    ) -> Option<(String, String)> {
        for container_id in container_ids {
            if let Some(name) = self.resolve_session_id(container_id, session_id).await {
                return Some((container_id.clone(), name));
            }
        }
        None
    }
}

fn session_option_commands() -> [Vec<String>; 4] {
    [
        argv(["tmux", "set-option", "-s", "extended-keys", "always"]),
        argv(["tmux", "set-option", "-g", "allow-passthrough", "on"]),
        argv(["tmux", "set-option", "-g", "monitor-activity", "on"]),
        argv(["tmux", "set-option", "-g", "activity-action", "none"]),
    ]
}

fn argv<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Pulls the session name out of a tmux argv's `-t <session[:window]>` flag,
/// if present, so a bridge-routed command can be matched against the
/// session's last-reported sub-source. Global commands (`-g` options,
/// `list-sessions`) have no `-t` and return `None`.
fn target_session_name(argv: &[String]) -> Option<&str> {
    let pos = argv.iter().position(|a| a == "-t")?;
    let target = argv.get(pos + 1)?;
    Some(target.split(':').next().unwrap_or(target))
}

fn new_request_id() -> String {
    let full = uuid::Uuid::new_v4().simple().to_string();
    full[..8].to_string()
}

async fn run_local(argv: &[String]) -> Result<String> {
    run_process(argv).await
}

async fn run_host(socket: &str, argv: &[String]) -> Result<String> {
    if argv.is_empty() {
        return Ok(String::new());
    }
    let mut host_argv = Vec::with_capacity(argv.len() + 2);
    host_argv.push(argv[0].clone());
    host_argv.push("-S".to_string());
    host_argv.push(socket.to_string());
    host_argv.extend_from_slice(&argv[1..]);
    run_process(&host_argv).await
}

async fn run_process(argv: &[String]) -> Result<String> {
    if argv.is_empty() {
        return Ok(String::new());
    }
    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_session_line(container_id: &str, line: &str) -> Option<TmuxSession> {
    let line = line.trim();
    if line.is_empty() || !line.contains('|') {
        return None;
    }
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 4 {
        return None;
    }
    let name = parts[0].to_string();
    let created = parts[2]
        .parse::<i64>()
        .ok()
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
    let attached = parts[3] == "1";
    let id = if is_bridge(container_id) {
        make_bridge_session_id(container_id.trim_start_matches("bridge:"), &name)
    } else {
        make_session_id(container_id, &name)
    };
    Some(TmuxSession {
        id,
        name,
        windows: Vec::new(),
        created,
        attached,
    })
}

fn parse_window_line(line: &str) -> Option<TmuxWindow> {
    parse_window_fields(line)
}

fn parse_window_line_with_session(line: &str) -> Option<(String, TmuxWindow)> {
    let line = line.trim();
    if line.is_empty() || !line.contains('|') {
        return None;
    }
    let (session_name, rest) = line.split_once('|')?;
    let window = parse_window_fields(rest)?;
    Some((session_name.to_string(), window))
}

fn parse_window_fields(fields: &str) -> Option<TmuxWindow> {
    let fields = fields.trim();
    if fields.is_empty() {
        return None;
    }
    let parts: Vec<&str> = fields.split('|').collect();
    if parts.len() < 4 {
        return None;
    }
    Some(TmuxWindow {
        index: parts[0].parse().unwrap_or(0),
        name: parts[1].to_string(),
        active: parts[2] == "1",
        panes: parts[3].parse().unwrap_or(1),
        bell: parts.get(4).map(|s| *s == "1").unwrap_or(false),
        activity: parts.get(5).map(|s| *s == "1").unwrap_or(false),
        command: parts.get(6).map(|s| s.to_string()).unwrap_or_default(),
        pane_status: parts.get(7).map(|s| s.to_string()).unwrap_or_default(),
    })
}

fn parse_pane_line(line: &str) -> Option<Pane> {
    let line = line.trim();
    if line.is_empty() || !line.contains('|') {
        return None;
    }
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 4 {
        return None;
    }
    Some(Pane {
        index: parts[0].parse().unwrap_or(0),
        active: parts[1] == "1",
        width: parts[2].parse().unwrap_or(0),
        height: parts[3].parse().unwrap_or(0),
        title: parts.get(4).map(|s| s.to_string()).unwrap_or_default(),
        command: parts.get(5).map(|s| s.to_string()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_line_skips_short_lines() {
        assert!(parse_session_line("local", "main|1").is_none());
        assert!(parse_session_line("local", "").is_none());
    }

    #[test]
    fn test_parse_session_line_assigns_deterministic_id() {
        let s = parse_session_line("local", "main|1|1700000000|0").unwrap();
        assert_eq!(s.id, make_session_id("local", "main"));
        assert!(!s.attached);
    }

    #[test]
    fn test_parse_session_line_malformed_timestamp_falls_back_to_now() {
        let s = parse_session_line("local", "main|1|not-a-number|1").unwrap();
        assert!(s.attached);
        assert!(chrono::DateTime::parse_from_rfc3339(&s.created).is_ok());
    }

    #[test]
    fn test_bridge_container_uses_bridge_session_id() {
        let s = parse_session_line("bridge:agent1", "main|1|1700000000|0").unwrap();
        assert_eq!(s.id, make_bridge_session_id("agent1", "main"));
    }

    #[test]
    fn test_parse_window_line_with_session_splits_session_name() {
        let (session, window) = parse_window_line_with_session("main|0|bash|1|1|0|0|bash|").unwrap();
        assert_eq!(session, "main");
        assert_eq!(window.index, 0);
        assert!(window.active);
    }

    #[test]
    fn test_parse_window_fields_tolerates_missing_trailing_fields() {
        let window = parse_window_fields("0|bash|1|1").unwrap();
        assert_eq!(window.name, "bash");
        assert!(!window.bell);
        assert_eq!(window.pane_status, "");
    }

    #[test]
    fn test_parse_pane_line() {
        let pane = parse_pane_line("0|1|80|24|title|bash").unwrap();
        assert_eq!(pane.width, 80);
        assert!(pane.active);
    }
}
