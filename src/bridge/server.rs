//! Server-side bridge protocol: registry of connected agents, request/response
//! correlation, and channel-multiplexed binary relay to browser terminal
//! WebSockets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::bridge::protocol::{BridgeMessage, BridgeSession};
use crate::error::{Result, TmuxDeckError};

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// A sender that forwards bytes to the browser-side terminal task registered
/// on a given channel.
pub type TerminalSink = mpsc::UnboundedSender<Vec<u8>>;

struct Inner {
    sessions: Mutex<Vec<BridgeSession>>,
    terminals: Mutex<HashMap<u16, TerminalSink>>,
    pending: Mutex<HashMap<String, oneshot::Sender<BridgeMessage>>>,
    next_channel: Mutex<u16>,
    outbox: mpsc::UnboundedSender<Message>,
}

/// One live connection from a bridge agent.
pub struct BridgeConnection {
    pub bridge_id: String,
    pub name: String,
    inner: Inner,
}

impl BridgeConnection {
    fn new(bridge_id: String, name: String, outbox: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            bridge_id,
            name,
            inner: Inner {
                sessions: Mutex::new(Vec::new()),
                terminals: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                next_channel: Mutex::new(1),
                outbox,
            },
        }
    }

    pub async fn set_sessions(&self, sessions: Vec<BridgeSession>) {
        *self.inner.sessions.lock().await = sessions;
    }

    pub async fn sessions(&self) -> Vec<BridgeSession> {
        self.inner.sessions.lock().await.clone()
    }

    /// The agent-reported sub-source (`local`/`host`/`docker:<id>`) a named
    /// session lives on, so attach/tmux-cmd requests route to the same
    /// physical tmux the session was last reported under rather than
    /// whichever sub-source the agent happens to check first. Falls back to
    /// `local` for a session not in the last report (e.g. one just created).
    pub async fn resolve_session_source(&self, session_name: &str) -> String {
        self.inner
            .sessions
            .lock()
            .await
            .iter()
            .find(|s| s.name == session_name)
            .map(|s| s.source.clone())
            .unwrap_or_else(|| "local".to_string())
    }

    /// Allocate a channel id, holding the registration lock across the probe
    /// and the insert so a concurrent allocator can never observe (or steal)
    /// a half-registered id — resolves the spec's channel-collision open
    /// question as reject-and-retry rather than silent overwrite.
    pub async fn register_terminal(&self, sink: TerminalSink) -> Result<u16> {
        let mut terminals = self.inner.terminals.lock().await;
        let mut next = self.inner.next_channel.lock().await;
        let start = *next;
        loop {
            let candidate = *next;
            *next = next.wrapping_add(1);
            if *next == 0 {
                *next = 1;
            }
            if !terminals.contains_key(&candidate) && candidate != 0 {
                terminals.insert(candidate, sink);
                return Ok(candidate);
            }
            if *next == start {
                return Err(TmuxDeckError::bridge("no free channel ids (65535 terminals in use)"));
            }
        }
    }

    pub async fn get_terminal(&self, channel_id: u16) -> Option<TerminalSink> {
        self.inner.terminals.lock().await.get(&channel_id).cloned()
    }

    pub async fn unregister_terminal(&self, channel_id: u16) {
        self.inner.terminals.lock().await.remove(&channel_id);
    }

    pub async fn close_all_terminals(&self) {
        let mut terminals = self.inner.terminals.lock().await;
        terminals.clear();
        let mut pending = self.inner.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(BridgeMessage::CmdResult {
                id: String::new(),
                output: String::new(),
                error: Some("bridge disconnected".to_string()),
            });
        }
    }

    fn send_raw(&self, message: Message) -> Result<()> {
        self.inner
            .outbox
            .send(message)
            .map_err(|_| TmuxDeckError::bridge("bridge connection closed"))
    }

    pub fn send_text(&self, msg: &BridgeMessage) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        self.send_raw(Message::Text(text.into()))
    }

    /// `send(">H", channel_id) + payload`, mirroring the Python helper.
    pub fn send_binary(&self, channel_id: u16, payload: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(2 + payload.len());
        frame.extend_from_slice(&channel_id.to_be_bytes());
        frame.extend_from_slice(payload);
        self.send_raw(Message::Binary(frame.into()))
    }

    /// Send a request and await its correlated response, failing after
    /// [`RPC_TIMEOUT`].
    pub async fn request(&self, id: String, msg: BridgeMessage) -> Result<BridgeMessage> {
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id.clone(), tx);
        if let Err(e) = self.send_text(&msg) {
            self.inner.pending.lock().await.remove(&id);
            return Err(e);
        }
        match tokio::time::timeout(RPC_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TmuxDeckError::bridge("request cancelled")),
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                Err(TmuxDeckError::timeout(format!("bridge request {id} timed out")))
            }
        }
    }

    pub async fn resolve_pending(&self, msg: BridgeMessage) {
        if let Some(id) = msg.request_id() {
            if let Some(tx) = self.inner.pending.lock().await.remove(id) {
                let _ = tx.send(msg);
            }
        }
    }
}

/// Process-wide registry of connected bridge agents, keyed by `bridge_id`.
#[derive(Default)]
pub struct BridgeManager {
    bridges: RwLock<HashMap<String, Arc<BridgeConnection>>>,
}

impl BridgeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection, evicting and tearing down any existing
    /// connection for the same `bridge_id` first — satisfies invariant #2
    /// (at most one live connection per bridge id).
    pub async fn register(
        &self,
        bridge_id: String,
        name: String,
        outbox: mpsc::UnboundedSender<Message>,
    ) -> Arc<BridgeConnection> {
        if let Some(old) = self.unregister(&bridge_id).await {
            old.close_all_terminals().await;
        }
        let conn = Arc::new(BridgeConnection::new(bridge_id.clone(), name, outbox));
        self.bridges.write().await.insert(bridge_id, conn.clone());
        conn
    }

    pub async fn unregister(&self, bridge_id: &str) -> Option<Arc<BridgeConnection>> {
        self.bridges.write().await.remove(bridge_id)
    }

    pub async fn get(&self, bridge_id: &str) -> Option<Arc<BridgeConnection>> {
        self.bridges.read().await.get(bridge_id).cloned()
    }

    /// Resolve the connection backing a `bridge:<id>` container id.
    pub async fn get_for_container(&self, container_id: &str) -> Option<Arc<BridgeConnection>> {
        let id = container_id.strip_prefix("bridge:")?;
        self.get(id).await
    }

    pub async fn list(&self) -> Vec<Arc<BridgeConnection>> {
        self.bridges.read().await.values().cloned().collect()
    }
}

pub fn is_bridge(container_id: &str) -> bool {
    container_id.starts_with("bridge:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_evicts_previous_connection() {
        let manager = BridgeManager::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let first = manager.register("b1".into(), "a".into(), tx1).await;
        let second = manager.register("b1".into(), "a".into(), tx2).await;

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(manager.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_channel_allocation_avoids_collisions() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = BridgeConnection::new("b1".into(), "a".into(), tx);

        let (s1, _r1) = mpsc::unbounded_channel();
        let (s2, _r2) = mpsc::unbounded_channel();
        let c1 = conn.register_terminal(s1).await.unwrap();
        let c2 = conn.register_terminal(s2).await.unwrap();
        assert_ne!(c1, c2);
        assert!((1..=65535).contains(&c1));
    }

    #[test]
    fn test_is_bridge_prefix() {
        assert!(is_bridge("bridge:abc123"));
        assert!(!is_bridge("local"));
        assert!(!is_bridge("docker-container"));
    }
}
