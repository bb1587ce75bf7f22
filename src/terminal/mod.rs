//! Browser-facing terminal proxy: attaches a `/ws/terminal/{container}/{session}/{window}`
//! WebSocket to the right tmux upstream (local PTY, host PTY, docker exec, or
//! a bridge agent channel) and multiplexes it until any of three concurrent
//! activities — upstream read, browser read, window-state poll — completes.

mod control;

use std::io::{Read, Write};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::auth::SessionStore;
use crate::bridge::protocol::BridgeMessage;
use crate::bridge::{BridgeConnection, BridgeManager};
use crate::debug_log::DebugLog;
use crate::model::Pane;
use crate::tmux::{Source, TmuxManager};

pub use control::{parse_control_tag, ControlTag};

pub const CLOSE_AUTH_REQUIRED: u16 = 4001;
const CLOSE_UPSTREAM_FAILED: u16 = 4002;

/// Shared handles the terminal proxy needs, constructed once in [`crate::app::App`].
pub struct TerminalContext {
    pub tmux: Arc<TmuxManager>,
    pub bridge_manager: Arc<BridgeManager>,
    pub docker: Option<bollard::Docker>,
    pub debug_log: Arc<DebugLog>,
    pub sessions: Arc<SessionStore>,
    pub pin: Option<String>,
}

impl TerminalContext {
    /// `None` means the handshake should be rejected with 4001.
    pub async fn authorize(&self, session_cookie: Option<&str>) -> bool {
        match &self.pin {
            None => true,
            Some(_) => match session_cookie {
                Some(token) => self.sessions.validate(token).await,
                None => false,
            },
        }
    }
}

enum OutboundFrame {
    Binary(Vec<u8>),
    Text(String),
}

/// Entry point called from the axum WS upgrade handler once the route params
/// and (optional) session cookie have been extracted.
pub async fn handle_terminal(
    socket: WebSocket,
    ctx: Arc<TerminalContext>,
    container_id: String,
    session_name: String,
    window_index: u32,
    cols: u16,
    rows: u16,
) {
    let target = format!("{session_name}:{window_index}");
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let source = ctx.tmux.resolve_source(&container_id).await;
    let setup = setup_upstream(&ctx, source, &target, &session_name, window_index, cols, rows, outbound_tx.clone()).await;

    let (handle, write_tx, reader_task) = match setup {
        Ok((handle, write_tx, reader_task)) => (Arc::new(handle), write_tx, reader_task),
        Err(reason) => {
            let _ = ws_sender
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_UPSTREAM_FAILED,
                    reason: reason.into(),
                })))
                .await;
            return;
        }
    };

    run_preattach_checks(&ctx, &container_id, &outbound_tx).await;

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let msg = match frame {
                OutboundFrame::Binary(data) => Message::Binary(data.into()),
                OutboundFrame::Text(text) => Message::Text(text.into()),
            };
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let poller_ctx = ctx.clone();
    let poller_container = container_id.clone();
    let poller_session = session_name.clone();
    let poller_tx = outbound_tx.clone();
    let poller_task = tokio::spawn(async move {
        run_window_state_poller(poller_ctx, poller_container, poller_session, poller_tx).await;
    });

    let browser_ctx = ctx.clone();
    let browser_container = container_id.clone();
    let browser_session = session_name.clone();
    let browser_tx = outbound_tx.clone();
    let browser_write_tx = write_tx.clone();
    let browser_handle = handle.clone();
    let browser_task = tokio::spawn(async move {
        run_browser_loop(
            browser_ctx,
            browser_container,
            browser_session,
            window_index,
            browser_handle,
            browser_write_tx,
            browser_tx,
            &mut ws_receiver,
        )
        .await;
    });

    let reader_abort = reader_task.abort_handle();
    let poller_abort = poller_task.abort_handle();
    let browser_abort = browser_task.abort_handle();

    tokio::select! {
        _ = reader_task => {},
        _ = poller_task => {},
        _ = browser_task => {},
    }

    // Whichever of the three lost the race is still running in the
    // background at this point — select! only stops polling its future.
    reader_abort.abort();
    poller_abort.abort();
    browser_abort.abort();

    handle.close().await;
    drop(write_tx);
    drop(outbound_tx);
    writer_task.abort();
}

struct PtyHandle {
    master: Arc<StdMutex<Box<dyn MasterPty + Send>>>,
    child: Arc<StdMutex<Box<dyn Child + Send + Sync>>>,
}

struct DockerHandle {
    docker: bollard::Docker,
    exec_id: String,
}

struct BridgeHandle {
    connection: Arc<BridgeConnection>,
    channel_id: u16,
}

enum UpstreamHandle {
    Pty(PtyHandle),
    Docker(DockerHandle),
    Bridge(BridgeHandle),
}

impl UpstreamHandle {
    async fn resize(&self, cols: u16, rows: u16) {
        match self {
            UpstreamHandle::Pty(p) => {
                if let Ok(master) = p.master.lock() {
                    let _ = master.resize(PtySize {
                        rows,
                        cols,
                        pixel_width: 0,
                        pixel_height: 0,
                    });
                }
            }
            UpstreamHandle::Docker(d) => {
                let _ = d
                    .docker
                    .resize_exec(
                        &d.exec_id,
                        bollard::exec::ResizeExecOptions {
                            height: rows as u64,
                            width: cols as u64,
                        },
                    )
                    .await;
            }
            UpstreamHandle::Bridge(b) => {
                let _ = b.connection.send_text(&BridgeMessage::Resize {
                    channel_id: b.channel_id,
                    cols,
                    rows,
                });
            }
        }
    }

    async fn close(&self) {
        match self {
            UpstreamHandle::Pty(p) => {
                if let Ok(mut child) = p.child.lock() {
                    let _ = child.kill();
                }
            }
            UpstreamHandle::Docker(_) => {}
            UpstreamHandle::Bridge(b) => {
                let _ = b.connection.send_text(&BridgeMessage::Detach { channel_id: b.channel_id });
                b.connection.unregister_terminal(b.channel_id).await;
            }
        }
    }
}

type SetupResult = Result<(UpstreamHandle, mpsc::UnboundedSender<Vec<u8>>, tokio::task::JoinHandle<()>), String>;

#[allow(clippy::too_many_arguments)]
async fn setup_upstream(
    ctx: &Arc<TerminalContext>,
    source: Source,
    target: &str,
    session_name: &str,
    window_index: u32,
    cols: u16,
    rows: u16,
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
) -> SetupResult {
    match source {
        Source::Local => setup_pty(None, target, cols, rows, outbound_tx),
        Source::Host { socket } => setup_pty(Some(socket), target, cols, rows, outbound_tx),
        Source::Docker { id } => setup_docker(ctx, &id, target, cols, rows, outbound_tx).await,
        Source::Bridge { connection } => {
            setup_bridge(connection, session_name, window_index, cols, rows, outbound_tx).await
        }
        Source::Unavailable => Err("bridge agent not connected".to_string()),
    }
}

fn setup_pty(host_socket: Option<String>, target: &str, cols: u16, rows: u16, outbound_tx: mpsc::UnboundedSender<OutboundFrame>) -> SetupResult {
    let mut cmd = CommandBuilder::new("tmux");
    if let Some(socket) = &host_socket {
        cmd.arg("-S");
        cmd.arg(socket);
    }
    cmd.arg("attach-session");
    cmd.arg("-t");
    cmd.arg(target);
    cmd.env_remove("TMUX");
    cmd.env("TERM", "xterm-256color");

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| e.to_string())?;

    let child = pair.slave.spawn_command(cmd).map_err(|e| e.to_string())?;
    drop(pair.slave);

    let reader = pair.master.try_clone_reader().map_err(|e| e.to_string())?;
    let writer = pair.master.take_writer().map_err(|e| e.to_string())?;

    let master = Arc::new(StdMutex::new(pair.master));
    let child = Arc::new(StdMutex::new(child));
    let writer = Arc::new(StdMutex::new(writer));

    let reader_task = tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];
        let mut reader = reader;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if outbound_tx.send(OutboundFrame::Binary(buf[..n].to_vec())).is_err() {
                break;
            }
        }
    });

    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::task::spawn_blocking(move || {
        while let Some(data) = write_rx.blocking_recv() {
            if let Ok(mut w) = writer.lock() {
                if w.write_all(&data).is_err() {
                    break;
                }
                let _ = w.flush();
            }
        }
    });

    Ok((UpstreamHandle::Pty(PtyHandle { master, child }), write_tx, reader_task))
}

async fn setup_docker(
    ctx: &Arc<TerminalContext>,
    container_id: &str,
    target: &str,
    cols: u16,
    rows: u16,
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
) -> SetupResult {
    let docker = ctx.docker.clone().ok_or_else(|| "no docker client configured".to_string())?;

    let exec = docker
        .create_exec(
            container_id,
            bollard::exec::CreateExecOptions {
                cmd: Some(vec!["tmux".to_string(), "attach-session".to_string(), "-t".to_string(), target.to_string()]),
                attach_stdin: Some(true),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                tty: Some(true),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| e.to_string())?;

    let start = docker
        .start_exec(
            &exec.id,
            Some(bollard::exec::StartExecOptions {
                detach: false,
                tty: true,
                ..Default::default()
            }),
        )
        .await
        .map_err(|e| e.to_string())?;

    let (mut output, mut input) = match start {
        bollard::exec::StartExecResults::Attached { output, input } => (output, input),
        bollard::exec::StartExecResults::Detached => return Err("exec started detached".to_string()),
    };

    let _ = docker
        .resize_exec(
            &exec.id,
            bollard::exec::ResizeExecOptions {
                height: rows as u64,
                width: cols as u64,
            },
        )
        .await;

    let reader_task = tokio::spawn(async move {
        use bollard::container::LogOutput;
        while let Some(chunk) = output.next().await {
            let bytes = match chunk {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) | Ok(LogOutput::Console { message }) => message.to_vec(),
                Ok(_) => continue,
                Err(_) => break,
            };
            if outbound_tx.send(OutboundFrame::Binary(bytes)).is_err() {
                break;
            }
        }
    });

    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        while let Some(data) = write_rx.recv().await {
            if input.write_all(&data).await.is_err() {
                break;
            }
        }
    });

    Ok((
        UpstreamHandle::Docker(DockerHandle { docker, exec_id: exec.id }),
        write_tx,
        reader_task,
    ))
}

async fn setup_bridge(
    connection: Arc<BridgeConnection>,
    session_name: &str,
    window_index: u32,
    cols: u16,
    rows: u16,
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
) -> SetupResult {
    let (sink, mut sink_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let channel_id = connection.register_terminal(sink).await.map_err(|e| e.to_string())?;

    let source = connection.resolve_session_source(session_name).await;
    let attach_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let reply = connection
        .request(
            attach_id.clone(),
            BridgeMessage::Attach {
                id: attach_id,
                session_name: session_name.to_string(),
                window_index,
                channel_id,
                cols,
                rows,
                source,
            },
        )
        .await
        .map_err(|e| e.to_string())?;

    match reply {
        BridgeMessage::AttachOk { .. } => {}
        BridgeMessage::AttachError { reason, .. } => {
            connection.unregister_terminal(channel_id).await;
            return Err(reason);
        }
        _ => {
            connection.unregister_terminal(channel_id).await;
            return Err("unexpected attach reply".to_string());
        }
    }

    let reader_task = tokio::spawn(async move {
        while let Some(bytes) = sink_rx.recv().await {
            if outbound_tx.send(OutboundFrame::Binary(bytes)).is_err() {
                break;
            }
        }
    });

    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let write_connection = connection.clone();
    tokio::spawn(async move {
        while let Some(data) = write_rx.recv().await {
            if write_connection.send_binary(channel_id, &data).is_err() {
                break;
            }
        }
    });

    Ok((UpstreamHandle::Bridge(BridgeHandle { connection, channel_id }), write_tx, reader_task))
}

/// `set-option` one-shots plus the mouse/bell sanity checks the original
/// deployment runs before handing control to the user.
async fn run_preattach_checks(ctx: &Arc<TerminalContext>, container_id: &str, outbound_tx: &mpsc::UnboundedSender<OutboundFrame>) {
    ctx.tmux
        .run_cmd(container_id, &["tmux".into(), "set-option".into(), "-s".into(), "extended-keys".into(), "always".into()])
        .await;
    ctx.tmux
        .run_cmd(container_id, &["tmux".into(), "set-option".into(), "-g".into(), "allow-passthrough".into(), "on".into()])
        .await;

    let mouse = ctx
        .tmux
        .run_cmd(container_id, &["tmux".into(), "show-options".into(), "-gv".into(), "mouse".into()])
        .await;
    if mouse.trim() == "on" {
        let _ = outbound_tx.send(OutboundFrame::Text("MOUSE_WARNING:on".to_string()));
    }

    let bell_action = ctx
        .tmux
        .run_cmd(container_id, &["tmux".into(), "show-options".into(), "-gv".into(), "bell-action".into()])
        .await;
    let visual_bell = ctx
        .tmux
        .run_cmd(container_id, &["tmux".into(), "show-options".into(), "-gv".into(), "visual-bell".into()])
        .await;
    if bell_action.trim() == "none" || visual_bell.trim() == "on" {
        let problems = BellProblems {
            bell_action: bell_action.trim().to_string(),
            visual_bell: visual_bell.trim().to_string(),
        };
        let _ = outbound_tx.send(OutboundFrame::Text(format!(
            "BELL_WARNING:{}",
            serde_json::to_string(&problems).unwrap_or_default()
        )));
    }
}

#[derive(Serialize)]
struct BellProblems {
    bell_action: String,
    visual_bell: String,
}

#[derive(Serialize)]
struct WindowStateFrame {
    active: u32,
    windows: Vec<WindowSummary>,
    panes: Vec<Pane>,
}

#[derive(Serialize, Clone, PartialEq)]
struct WindowSummary {
    index: u32,
    name: String,
    bell: bool,
    activity: bool,
}

async fn run_window_state_poller(ctx: Arc<TerminalContext>, container_id: String, session_name: String, outbound_tx: mpsc::UnboundedSender<OutboundFrame>) {
    let mut previous: Option<(u32, Vec<WindowSummary>)> = None;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let windows = ctx.tmux.list_windows(&container_id, &session_name).await;
        let active = windows.iter().find(|w| w.active).map(|w| w.index).unwrap_or(0);
        let summary: Vec<WindowSummary> = windows
            .iter()
            .map(|w| WindowSummary {
                index: w.index,
                name: w.name.clone(),
                bell: w.bell,
                activity: w.activity,
            })
            .collect();

        let changed = previous.as_ref() != Some(&(active, summary.clone()));
        if changed {
            let panes = ctx.tmux.list_panes(&container_id, &session_name, active).await;
            let frame = WindowStateFrame { active, windows: summary.clone(), panes };
            let payload = serde_json::to_string(&frame).unwrap_or_default();
            if outbound_tx.send(OutboundFrame::Text(format!("WINDOW_STATE:{payload}"))).is_err() {
                break;
            }
            previous = Some((active, summary));
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_browser_loop(
    ctx: Arc<TerminalContext>,
    container_id: String,
    session_name: String,
    window_index: u32,
    handle: Arc<UpstreamHandle>,
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
    ws_receiver: &mut futures_util::stream::SplitStream<WebSocket>,
) {
    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => break,
        };
        match msg {
            Message::Text(text) => {
                if let Some(ControlTag::Resize { cols, rows }) = parse_control_tag(&text) {
                    handle.resize(cols, rows).await;
                } else if let Some(tag) = parse_control_tag(&text) {
                    handle_control_tag(&ctx, &container_id, &session_name, window_index, tag, &outbound_tx).await;
                } else if write_tx.send(text.as_bytes().to_vec()).is_err() {
                    break;
                }
            }
            Message::Binary(data) => {
                if write_tx.send(data.to_vec()).is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn handle_control_tag(
    ctx: &Arc<TerminalContext>,
    container_id: &str,
    session_name: &str,
    window_index: u32,
    tag: ControlTag,
    outbound_tx: &mpsc::UnboundedSender<OutboundFrame>,
) {
    let target = format!("{session_name}:{window_index}");
    match tag {
        // RESIZE is intercepted in `run_browser_loop` before it reaches here,
        // since resizing needs the UpstreamHandle, not the tmux façade.
        ControlTag::Resize { .. } => {}
        ControlTag::SelectWindow(idx) => {
            ctx.tmux
                .run_cmd(container_id, &["tmux".into(), "select-window".into(), "-t".into(), format!("{session_name}:{idx}")])
                .await;
        }
        ControlTag::SelectPane(direction) => {
            ctx.tmux
                .run_cmd(container_id, &["tmux".into(), "select-pane".into(), format!("-{direction}"), "-t".into(), session_name.to_string()])
                .await;
        }
        ControlTag::ToggleZoom => {
            ctx.tmux
                .run_cmd(container_id, &["tmux".into(), "resize-pane".into(), "-Z".into(), "-t".into(), target])
                .await;
        }
        ControlTag::ScrollUp(n) => {
            ctx.tmux.run_cmd(container_id, &["tmux".into(), "copy-mode".into(), "-e".into(), "-t".into(), target.clone()]).await;
            ctx.tmux
                .run_cmd(container_id, &["tmux".into(), "send-keys".into(), "-X".into(), "-N".into(), n.to_string(), "scroll-up".into(), "-t".into(), target])
                .await;
        }
        ControlTag::ScrollDown(n) => {
            ctx.tmux
                .run_cmd(container_id, &["tmux".into(), "send-keys".into(), "-X".into(), "-N".into(), n.to_string(), "scroll-down".into(), "-t".into(), target])
                .await;
        }
        ControlTag::ScrollExit => {
            ctx.tmux
                .run_cmd(container_id, &["tmux".into(), "send-keys".into(), "-X".into(), "cancel".into(), "-t".into(), target])
                .await;
        }
        ControlTag::ShiftEnter => {
            ctx.tmux
                .run_cmd(container_id, &["tmux".into(), "send-keys".into(), "-l".into(), "-t".into(), target, "\x1b[13;2u".into()])
                .await;
        }
        ControlTag::DisableMouse => {
            ctx.tmux.run_cmd(container_id, &["tmux".into(), "set-option".into(), "-g".into(), "mouse".into(), "off".into()]).await;
            let _ = outbound_tx.send(OutboundFrame::Text("MOUSE_WARNING:off".to_string()));
        }
        ControlTag::FixBell => {
            ctx.tmux
                .run_cmd(container_id, &["tmux".into(), "set-option".into(), "-g".into(), "bell-action".into(), "any".into()])
                .await;
            ctx.tmux
                .run_cmd(container_id, &["tmux".into(), "set-option".into(), "-g".into(), "visual-bell".into(), "off".into()])
                .await;
            let _ = outbound_tx.send(OutboundFrame::Text("BELL_WARNING:ok".to_string()));
        }
        ControlTag::ListPanes(idx) => {
            let panes = ctx.tmux.list_panes(container_id, session_name, idx).await;
            let payload = serde_json::to_string(&panes).unwrap_or_default();
            let _ = outbound_tx.send(OutboundFrame::Text(format!("PANE_LIST:{payload}")));
        }
        ControlTag::ZoomPane(win, pane) => {
            let pane_target = format!("{session_name}:{win}.{pane}");
            ctx.tmux.run_cmd(container_id, &["tmux".into(), "select-pane".into(), "-t".into(), pane_target.clone()]).await;
            ctx.tmux.run_cmd(container_id, &["tmux".into(), "resize-pane".into(), "-Z".into(), "-t".into(), pane_target]).await;
        }
        ControlTag::UnzoomPane => {
            let zoomed = ctx
                .tmux
                .run_cmd(container_id, &["tmux".into(), "display-message".into(), "-p".into(), "-t".into(), target.clone(), "#{window_zoomed_flag}".into()])
                .await;
            if zoomed.trim() == "1" {
                ctx.tmux.run_cmd(container_id, &["tmux".into(), "resize-pane".into(), "-Z".into(), "-t".into(), target]).await;
            }
        }
        ControlTag::CapturePane(win, pane) => {
            let pane_target = format!("{session_name}:{win}.{pane}");
            let text = ctx
                .tmux
                .run_cmd(container_id, &["tmux".into(), "capture-pane".into(), "-p".into(), "-e".into(), "-t".into(), pane_target])
                .await;
            let _ = outbound_tx.send(OutboundFrame::Text(format!("PANE_CONTENT:{win}.{pane}:{text}")));
        }
    }
}
