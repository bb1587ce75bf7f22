//! `/ws/bridge` — the agent-facing WebSocket. First text frame must be an
//! `auth` message; on success the connection is registered and relayed
//! until it closes.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::app::App;
use crate::auth::constant_time_eq;
use crate::bridge::protocol::BridgeMessage;

const CLOSE_AUTH_FAILED: u16 = 4001;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(app): State<Arc<App>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_bridge(socket, app))
}

fn find_bridge_token<'a>(app: &'a App, token: &str) -> Option<&'a crate::config::BridgeConfigEntry> {
    app.config
        .bridge
        .configs
        .iter()
        .find(|entry| entry.enabled && constant_time_eq(entry.token.as_bytes(), token.as_bytes()))
}

async fn handle_bridge(socket: WebSocket, app: Arc<App>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let first = match ws_receiver.next().await {
        Some(Ok(Message::Text(text))) => text,
        _ => return,
    };
    let auth: BridgeMessage = match serde_json::from_str(&first) {
        Ok(m) => m,
        Err(_) => return,
    };
    let (token, _name) = match auth {
        BridgeMessage::Auth { token, name } => (token, name),
        _ => {
            let _ = ws_sender
                .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: CLOSE_AUTH_FAILED,
                    reason: "expected auth frame first".into(),
                })))
                .await;
            return;
        }
    };

    let entry = match find_bridge_token(&app, &token) {
        Some(e) => e.clone(),
        None => {
            let reply = serde_json::to_string(&BridgeMessage::AuthError {
                reason: "unknown or disabled token".to_string(),
            })
            .unwrap_or_default();
            let _ = ws_sender.send(Message::Text(reply.into())).await;
            let _ = ws_sender
                .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: CLOSE_AUTH_FAILED,
                    reason: "auth failed".into(),
                })))
                .await;
            return;
        }
    };

    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Message>();
    let connection = app.bridge_manager.register(entry.id.clone(), entry.name.clone(), outbox_tx).await;

    let ok = serde_json::to_string(&BridgeMessage::AuthOk {
        bridge_id: entry.id.clone(),
    })
    .unwrap_or_default();
    let _ = ws_sender.send(Message::Text(ok.into())).await;

    app.debug_log
        .info("bridge", format!("agent '{}' connected", entry.name), None)
        .await;

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let last_seen = Arc::new(AtomicI64::new(now_secs()));
    let pinger = {
        let last_seen = last_seen.clone();
        let connection = connection.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PING_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let idle = now_secs() - last_seen.load(Ordering::Relaxed);
                if idle > (PING_INTERVAL + PONG_TIMEOUT).as_secs() as i64 {
                    break;
                }
                if connection.send_text(&BridgeMessage::Ping).is_err() {
                    break;
                }
            }
        })
    };

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => break,
        };
        last_seen.store(now_secs(), Ordering::Relaxed);
        match msg {
            Message::Text(text) => {
                if let Ok(parsed) = serde_json::from_str::<BridgeMessage>(&text) {
                    handle_agent_message(&connection, parsed).await;
                }
            }
            Message::Binary(data) => relay_binary(&connection, &data).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    pinger.abort();
    writer_task.abort();
    app.bridge_manager.unregister(&entry.id).await;
    connection.close_all_terminals().await;
    app.debug_log
        .info("bridge", format!("agent '{}' disconnected", entry.name), None)
        .await;
}

async fn handle_agent_message(connection: &Arc<crate::bridge::BridgeConnection>, msg: BridgeMessage) {
    match msg {
        BridgeMessage::Sessions { sessions, .. } => connection.set_sessions(sessions).await,
        other if other.request_id().is_some() => connection.resolve_pending(other).await,
        BridgeMessage::Detached { channel_id } => connection.unregister_terminal(channel_id).await,
        BridgeMessage::Pong => {}
        _ => {}
    }
}

async fn relay_binary(connection: &Arc<crate::bridge::BridgeConnection>, data: &[u8]) {
    if data.len() < 2 {
        return;
    }
    let channel_id = u16::from_be_bytes([data[0], data[1]]);
    if let Some(sink) = connection.get_terminal(channel_id).await {
        let _ = sink.send(data[2..].to_vec());
    }
}
