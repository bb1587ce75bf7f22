//! Bridge agent: the client half of the bridge protocol, run as the
//! `tmuxdeck-bridge` binary on a machine the server cannot reach directly.
//! Connects out to the server, authenticates, reports sessions, and proxies
//! PTYs for attach requests.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

use futures_util::{SinkExt, StreamExt};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::model::make_bridge_session_id;

use super::protocol::{BridgeMessage, BridgeSession};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct BridgeAgentConfig {
    pub url: String,
    pub token: String,
    pub name: String,
    pub local: bool,
    pub host_tmux_socket: Option<String>,
    pub docker_socket: Option<String>,
    pub docker_label: Option<String>,
    pub session_report_interval: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl Default for BridgeAgentConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            name: hostname(),
            local: true,
            host_tmux_socket: None,
            docker_socket: None,
            docker_label: None,
            session_report_interval: Duration::from_secs(5),
            reconnect_min: Duration::from_secs(5),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "bridge".to_string())
}

struct TerminalSession {
    master: Arc<StdMutex<Box<dyn MasterPty + Send>>>,
    writer: Arc<StdMutex<Box<dyn Write + Send>>>,
    child: Arc<StdMutex<Box<dyn Child + Send + Sync>>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl TerminalSession {
    fn start(channel_id: u16, cmd: CommandBuilder, cols: u16, rows: u16, out: mpsc::UnboundedSender<Message>) -> std::io::Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        let reader = Arc::new(StdMutex::new(reader));
        let reader_task = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            loop {
                let n = {
                    let mut reader = reader.lock().unwrap();
                    match reader.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    }
                };
                let mut frame = Vec::with_capacity(2 + n);
                frame.extend_from_slice(&channel_id.to_be_bytes());
                frame.extend_from_slice(&buf[..n]);
                if out.send(Message::Binary(frame.into())).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            master: Arc::new(StdMutex::new(pair.master)),
            writer: Arc::new(StdMutex::new(writer)),
            child: Arc::new(StdMutex::new(child)),
            reader_task,
        })
    }

    fn write(&self, data: &[u8]) {
        if let Ok(mut w) = self.writer.lock() {
            let _ = w.write_all(data);
            let _ = w.flush();
        }
    }

    fn resize(&self, cols: u16, rows: u16) {
        if let Ok(master) = self.master.lock() {
            let _ = master.resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            });
        }
    }

    async fn stop(self) {
        self.reader_task.abort();
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }
}

/// Auto-reconnect loop with exponential backoff, matching the agent's
/// original connect/auth/report/dispatch cycle.
/// Test-connects the host tmux socket once at startup and permanently drops
/// it from the config if unreachable, so a dead host source doesn't fail
/// every subsequent session-report cycle.
async fn probe_host_socket(mut config: BridgeAgentConfig) -> BridgeAgentConfig {
    let Some(socket) = config.host_tmux_socket.clone() else {
        return config;
    };
    let probe = tokio::time::timeout(
        Duration::from_secs(2),
        tokio::process::Command::new("tmux")
            .arg("-S")
            .arg(&socket)
            .arg("list-sessions")
            .output(),
    )
    .await;
    match probe {
        Ok(Ok(_)) => config,
        _ => {
            tracing::warn!(socket = %socket, "host tmux socket unreachable at startup, excluding");
            config.host_tmux_socket = None;
            config
        }
    }
}

/// Runs the reconnect loop until an unrecoverable failure. Returns `true` for
/// a clean shutdown (the only way out short of that is the process being
/// killed), `false` when the server rejects our auth token, so the caller can
/// map this to the documented exit code contract.
pub async fn run(config: BridgeAgentConfig) -> bool {
    let config = probe_host_socket(config).await;
    let mut delay = config.reconnect_min;

    loop {
        tracing::info!(url = %config.url, "connecting to bridge server");
        match connect_and_serve(&config).await {
            Ok(()) => {
                tracing::warn!("bridge connection closed");
            }
            Err(BridgeRunError::AuthRejected(reason)) => {
                tracing::error!(reason = %reason, "bridge authentication rejected, stopping");
                return false;
            }
            Err(BridgeRunError::Transport(e)) => {
                tracing::warn!(error = %e, "bridge connection failed");
            }
        }

        tracing::info!(delay_secs = delay.as_secs(), "reconnecting");
        tokio::time::sleep(delay).await;
        delay = std::cmp::min(delay * 2, config.reconnect_max);
    }
}

enum BridgeRunError {
    AuthRejected(String),
    Transport(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeRunError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeRunError::Transport(e.to_string())
    }
}

async fn connect_and_serve(config: &BridgeAgentConfig) -> Result<(), BridgeRunError> {
    let (ws, _) = tokio_tungstenite::connect_async(&config.url).await?;
    let (mut sink, mut stream) = ws.split();

    let auth = BridgeMessage::Auth {
        token: config.token.clone(),
        name: config.name.clone(),
    };
    sink.send(Message::Text(serde_json::to_string(&auth).unwrap().into()))
        .await?;

    let reply = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .map_err(|_| BridgeRunError::Transport("auth timed out".to_string()))?
        .ok_or_else(|| BridgeRunError::Transport("connection closed during auth".to_string()))??;

    let text = match reply {
        Message::Text(t) => t.to_string(),
        other => return Err(BridgeRunError::Transport(format!("unexpected auth reply frame: {other:?}"))),
    };
    match serde_json::from_str::<BridgeMessage>(&text) {
        Ok(BridgeMessage::AuthOk { .. }) => {}
        Ok(BridgeMessage::AuthError { reason }) => return Err(BridgeRunError::AuthRejected(reason)),
        _ => return Err(BridgeRunError::Transport("unexpected auth reply".to_string())),
    }
    tracing::info!(name = %config.name, "authenticated");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let terminals: Arc<Mutex<HashMap<u16, TerminalSession>>> = Arc::new(Mutex::new(HashMap::new()));
    let config = Arc::new(config.clone());

    if let Ok(sessions) = collect_sessions(&config).await {
        let _ = out_tx.send(Message::Text(
            serde_json::to_string(&BridgeMessage::Sessions { sessions, sources: Vec::new() }).unwrap().into(),
        ));
    }

    let reporter = {
        let out_tx = out_tx.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.session_report_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Ok(sessions) = collect_sessions(&config).await {
                    let msg = BridgeMessage::Sessions { sessions, sources: Vec::new() };
                    if out_tx.send(Message::Text(serde_json::to_string(&msg).unwrap().into())).is_err() {
                        break;
                    }
                }
            }
        })
    };

    let last_seen = Arc::new(AtomicI64::new(now_secs()));
    let pinger = {
        let last_seen = last_seen.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PING_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let idle = now_secs() - last_seen.load(Ordering::Relaxed);
                if idle > (PING_INTERVAL + PONG_TIMEOUT).as_secs() as i64 {
                    break;
                }
                if out_tx.send(text_message(&BridgeMessage::Ping)).is_err() {
                    break;
                }
            }
        })
    };

    let result = message_loop(&mut stream, &terminals, &out_tx, &config, &last_seen).await;

    pinger.abort();
    reporter.abort();
    writer_task.abort();
    let mut terminals = terminals.lock().await;
    for (_, session) in terminals.drain() {
        session.stop().await;
    }

    result.map_err(BridgeRunError::Transport)
}

async fn message_loop(
    stream: &mut futures_util::stream::SplitStream<WsStream>,
    terminals: &Arc<Mutex<HashMap<u16, TerminalSession>>>,
    out_tx: &mpsc::UnboundedSender<Message>,
    config: &Arc<BridgeAgentConfig>,
    last_seen: &Arc<AtomicI64>,
) -> Result<(), String> {
    while let Some(msg) = stream.next().await {
        let msg = msg.map_err(|e| e.to_string())?;
        last_seen.store(now_secs(), Ordering::Relaxed);
        match msg {
            Message::Binary(data) => handle_binary(&data, terminals).await,
            Message::Text(text) => {
                let parsed: BridgeMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                handle_control(parsed, terminals, out_tx, config).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

async fn handle_binary(data: &[u8], terminals: &Arc<Mutex<HashMap<u16, TerminalSession>>>) {
    if data.len() < 2 {
        return;
    }
    let channel_id = u16::from_be_bytes([data[0], data[1]]);
    let terminals = terminals.lock().await;
    if let Some(session) = terminals.get(&channel_id) {
        session.write(&data[2..]);
    }
}

async fn handle_control(
    msg: BridgeMessage,
    terminals: &Arc<Mutex<HashMap<u16, TerminalSession>>>,
    out_tx: &mpsc::UnboundedSender<Message>,
    config: &Arc<BridgeAgentConfig>,
) {
    match msg {
        BridgeMessage::Attach {
            id,
            session_name,
            window_index,
            channel_id,
            cols,
            rows,
            source,
        } => {
            let target = format!("{session_name}:{window_index}");
            let cmd = build_tmux_cmd(config, &source, vec!["attach-session".into(), "-t".into(), target.clone()]);

            match TerminalSession::start(channel_id, cmd, cols, rows, out_tx.clone()) {
                Ok(session) => {
                    terminals.lock().await.insert(channel_id, session);
                    let _ = out_tx.send(text_message(&BridgeMessage::AttachOk { id }));
                    tracing::info!(channel_id, target = %target, "attached");
                }
                Err(e) => {
                    let _ = out_tx.send(text_message(&BridgeMessage::AttachError { id, reason: e.to_string() }));
                }
            }
        }
        BridgeMessage::Detach { channel_id } => {
            if let Some(session) = terminals.lock().await.remove(&channel_id) {
                session.stop().await;
            }
            let _ = out_tx.send(text_message(&BridgeMessage::Detached { channel_id }));
        }
        BridgeMessage::Resize { channel_id, cols, rows } => {
            if let Some(session) = terminals.lock().await.get(&channel_id) {
                session.resize(cols, rows);
            }
        }
        BridgeMessage::TmuxCmd { id, cmd, source } => {
            let result = run_tmux_cmd(config, &source, cmd).await;
            let (output, error) = match result {
                Ok(out) => (out, None),
                Err(e) => (String::new(), Some(e)),
            };
            let _ = out_tx.send(text_message(&BridgeMessage::CmdResult { id, output, error }));
        }
        BridgeMessage::ListSessions => {
            if let Ok(sessions) = collect_sessions(config).await {
                let _ = out_tx.send(text_message(&BridgeMessage::Sessions { sessions, sources: Vec::new() }));
            }
        }
        BridgeMessage::Ping => {
            let _ = out_tx.send(text_message(&BridgeMessage::Pong));
        }
        _ => {}
    }
}

fn text_message(msg: &BridgeMessage) -> Message {
    Message::Text(serde_json::to_string(msg).unwrap().into())
}

/// Apply the host socket to a tmux argv the same way the server-side host
/// source does, and route docker-sourced commands through `docker exec`.
/// Kept as a pure function returning the full argv so it can be unit tested
/// without constructing a [`CommandBuilder`].
fn build_argv(config: &BridgeAgentConfig, source: &str, cmd: Vec<String>) -> Vec<String> {
    let mut tmux_argv = vec!["tmux".to_string()];
    if source == "host" {
        if let Some(socket) = &config.host_tmux_socket {
            tmux_argv.push("-S".to_string());
            tmux_argv.push(socket.clone());
        }
    }
    tmux_argv.extend(cmd);

    if let Some(container_id) = source.strip_prefix("docker:") {
        let mut argv = vec!["docker".to_string(), "exec".to_string(), "-it".to_string(), container_id.to_string()];
        argv.extend(tmux_argv);
        return argv;
    }
    tmux_argv
}

fn build_tmux_cmd(config: &BridgeAgentConfig, source: &str, cmd: Vec<String>) -> CommandBuilder {
    let argv = build_argv(config, source, cmd);
    let mut builder = CommandBuilder::new(&argv[0]);
    for arg in &argv[1..] {
        builder.arg(arg);
    }
    builder.env_remove("TMUX");
    builder.env("TERM", "xterm-256color");
    builder
}

async fn run_tmux_cmd(config: &BridgeAgentConfig, source: &str, cmd: Vec<String>) -> Result<String, String> {
    if cmd.is_empty() {
        return Err("empty command".to_string());
    }

    let mut argv = cmd;
    if source == "host" {
        if let Some(socket) = &config.host_tmux_socket {
            if argv.first().map(|s| s.as_str()) == Some("tmux") {
                argv.insert(1, "-S".to_string());
                argv.insert(2, socket.clone());
            }
        }
    }

    let output = if let Some(container_id) = source.strip_prefix("docker:") {
        tokio::process::Command::new("docker")
            .arg("exec")
            .arg(container_id)
            .args(&argv)
            .output()
            .await
    } else {
        tokio::process::Command::new(&argv[0]).args(&argv[1..]).output().await
    };

    let output = tokio::time::timeout(Duration::from_secs(10), async { output })
        .await
        .map_err(|_| "command timed out".to_string())?
        .map_err(|e| e.to_string())?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).into_owned())
    }
}

/// Collects sessions uniformly across all configured sources using the same
/// `md5("bridge:<source>:<name>")` id as the server assigns, so an id
/// reported by the agent matches what the server independently computes.
async fn collect_sessions(config: &BridgeAgentConfig) -> Result<Vec<BridgeSession>, String> {
    let mut sessions = Vec::new();

    if config.local {
        sessions.extend(list_tmux_sessions("local", &[]).await);
    }
    if let Some(socket) = &config.host_tmux_socket {
        sessions.extend(list_tmux_sessions("host", &["-S".to_string(), socket.clone()]).await);
    }
    if let Some(docker_socket) = &config.docker_socket {
        sessions.extend(list_docker_sessions(docker_socket, config.docker_label.as_deref()).await);
    }

    Ok(sessions)
}

async fn list_tmux_sessions(source: &str, extra_args: &[String]) -> Vec<BridgeSession> {
    let mut args = extra_args.to_vec();
    args.push("list-sessions".to_string());
    args.push("-F".to_string());
    args.push("#{session_name}|#{session_windows}|#{session_created}|#{session_attached}".to_string());

    let output = match tokio::time::timeout(
        Duration::from_secs(5),
        tokio::process::Command::new("tmux").args(&args).output(),
    )
    .await
    {
        Ok(Ok(o)) => o,
        _ => return Vec::new(),
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| parse_session_line(source, line))
        .collect()
}

async fn list_docker_sessions(docker_socket: &str, label_filter: Option<&str>) -> Vec<BridgeSession> {
    let docker = match bollard::Docker::connect_with_unix(docker_socket, 120, bollard::API_DEFAULT_VERSION) {
        Ok(d) => d,
        Err(_) => return Vec::new(),
    };

    let filters: HashMap<String, Vec<String>> = label_filter
        .map(|label| {
            let mut m = HashMap::new();
            m.insert("label".to_string(), vec![label.to_string()]);
            m
        })
        .unwrap_or_default();

    let containers = match docker
        .list_containers(Some(bollard::container::ListContainersOptions {
            all: false,
            filters,
            ..Default::default()
        }))
        .await
    {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    let mut out = Vec::new();
    for container in containers {
        let Some(id) = container.id else { continue };
        let source = format!("docker:{id}");
        let argv = vec![
            "tmux".to_string(),
            "list-sessions".to_string(),
            "-F".to_string(),
            "#{session_name}|#{session_windows}|#{session_created}|#{session_attached}".to_string(),
        ];
        if let Ok(text) = crate::tmux::docker::exec_command(&docker, &id, &argv).await {
            out.extend(text.lines().filter_map(|line| parse_session_line(&source, line)));
        }
    }
    out
}

fn parse_session_line(source: &str, line: &str) -> Option<BridgeSession> {
    let line = line.trim();
    if line.is_empty() || !line.contains('|') {
        return None;
    }
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 4 {
        return None;
    }
    let name = parts[0].to_string();
    let windows = parts[1].parse().unwrap_or(0);
    let created = parts[2]
        .parse::<i64>()
        .ok()
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
    let attached = parts[3] == "1";

    Some(BridgeSession {
        id: make_bridge_session_id(source, &name),
        name,
        source: source.to_string(),
        windows,
        created,
        attached,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_line_computes_bridge_id() {
        let session = parse_session_line("local", "main|2|1700000000|1").unwrap();
        assert_eq!(session.name, "main");
        assert_eq!(session.windows, 2);
        assert!(session.attached);
        assert_eq!(session.id, make_bridge_session_id("local", "main"));
    }

    #[test]
    fn test_parse_session_line_rejects_malformed_lines() {
        assert!(parse_session_line("local", "not-a-session-line").is_none());
        assert!(parse_session_line("local", "").is_none());
    }

    #[test]
    fn test_build_argv_routes_docker_through_exec() {
        let config = BridgeAgentConfig::default();
        let argv = build_argv(&config, "docker:abc123", vec!["attach-session".into(), "-t".into(), "main:0".into()]);
        assert_eq!(argv[0], "docker");
        assert_eq!(argv[1], "exec");
        assert_eq!(argv[3], "abc123");
        assert!(argv.contains(&"tmux".to_string()));
    }

    #[test]
    fn test_build_argv_inserts_host_socket() {
        let mut config = BridgeAgentConfig::default();
        config.host_tmux_socket = Some("/tmp/host.sock".to_string());
        let argv = build_argv(&config, "host", vec!["list-sessions".into()]);
        assert_eq!(argv, vec!["tmux", "-S", "/tmp/host.sock", "list-sessions"]);
    }
}
