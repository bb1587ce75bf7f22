//! In-memory notification store: SSE broadcast to browsers, deferred
//! Telegram delivery, and reply-to-terminal routing.

pub mod notifier;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::tmux::TmuxManager;
use notifier::Notifier;

const SSE_QUEUE_DEPTH: usize = 32;
const ALL_CHANNELS: [Channel; 3] = [Channel::Web, Channel::Os, Channel::Telegram];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Web,
    Os,
    Telegram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    TelegramSent,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub message: String,
    pub title: String,
    pub notification_type: String,
    pub session_id: String,
    pub container_id: String,
    pub tmux_session: String,
    pub tmux_window: u32,
    pub created_at: String,
    pub status: Status,
    #[serde(default)]
    pub telegram_message_id: Option<i64>,
    #[serde(default)]
    pub telegram_chat_id: Option<i64>,
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub responses: Vec<String>,
}

pub struct NotificationCreate {
    pub message: String,
    pub title: String,
    pub notification_type: String,
    pub session_id: String,
    pub container_id: String,
    pub tmux_session: String,
    pub tmux_window: u32,
    /// Empty means "all three" — normalized here per the spec's Open
    /// Question decision, rather than left ambiguous at the call site.
    pub channels: Vec<Channel>,
}

impl NotificationRecord {
    pub fn new(data: NotificationCreate) -> Self {
        let channels = if data.channels.is_empty() {
            ALL_CHANNELS.to_vec()
        } else {
            data.channels
        };
        Self {
            id: Uuid::new_v4().to_string(),
            message: data.message,
            title: data.title,
            notification_type: data.notification_type,
            session_id: data.session_id,
            container_id: data.container_id,
            tmux_session: data.tmux_session,
            tmux_window: data.tmux_window,
            created_at: Utc::now().to_rfc3339(),
            status: Status::Pending,
            telegram_message_id: None,
            telegram_chat_id: None,
            channels,
            responses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum SseEvent {
    #[serde(rename = "notification")]
    Notification(NotificationRecord),
    #[serde(rename = "dismiss")]
    Dismiss { count: usize },
}

#[derive(Default)]
pub struct DismissFilter {
    pub session_id: Option<String>,
    pub container_id: Option<String>,
    pub tmux_session: Option<String>,
    pub tmux_window: Option<u32>,
}

impl DismissFilter {
    fn matches(&self, record: &NotificationRecord) -> bool {
        if let Some(ref v) = self.session_id {
            if &record.session_id != v {
                return false;
            }
        }
        if let Some(ref v) = self.container_id {
            if &record.container_id != v {
                return false;
            }
        }
        if let Some(ref v) = self.tmux_session {
            if &record.tmux_session != v {
                return false;
            }
        }
        if let Some(v) = self.tmux_window {
            if record.tmux_window != v {
                return false;
            }
        }
        true
    }
}

struct State {
    records: HashMap<String, NotificationRecord>,
    timers: HashMap<String, JoinHandle<()>>,
    subscribers: Vec<mpsc::Sender<Option<SseEvent>>>,
}

pub struct NotificationManager {
    state: Mutex<State>,
    notifier: Arc<dyn Notifier>,
    tmux_manager: Arc<TmuxManager>,
    telegram_timeout: Duration,
}

impl NotificationManager {
    pub fn new(notifier: Arc<dyn Notifier>, tmux_manager: Arc<TmuxManager>, telegram_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                records: HashMap::new(),
                timers: HashMap::new(),
                subscribers: Vec::new(),
            }),
            notifier,
            tmux_manager,
            telegram_timeout,
        })
    }

    pub async fn create(self: &Arc<Self>, data: NotificationCreate) -> NotificationRecord {
        let record = NotificationRecord::new(data);
        let wants_telegram = record.channels.contains(&Channel::Telegram);
        let wants_web = record.channels.contains(&Channel::Web);
        let id = record.id.clone();

        {
            let mut state = self.state.lock().await;
            state.records.insert(id.clone(), record.clone());
        }
        self.broadcast(SseEvent::Notification(record.clone())).await;

        if wants_telegram {
            let delay = if wants_web { self.telegram_timeout } else { Duration::ZERO };
            let this = self.clone();
            let timer_id = id.clone();
            let handle = tokio::spawn(async move {
                this.fire_telegram(timer_id, delay).await;
            });
            self.state.lock().await.timers.insert(id, handle);
        }

        record
    }

    async fn fire_telegram(self: Arc<Self>, id: String, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let record = {
            let mut state = self.state.lock().await;
            state.timers.remove(&id);
            match state.records.get(&id) {
                Some(r) if r.status == Status::Pending => r.clone(),
                _ => return,
            }
        };
        match self.notifier.send(&record).await {
            Ok(message_id) => {
                let mut state = self.state.lock().await;
                if let Some(r) = state.records.get_mut(&id) {
                    r.status = Status::TelegramSent;
                    r.telegram_message_id = message_id;
                }
            }
            Err(e) => {
                tracing::warn!(notification_id = %id, error = %e, "telegram delivery failed");
            }
        }
    }

    pub async fn dismiss(&self, filter: DismissFilter) -> usize {
        let mut count = 0;
        let mut state = self.state.lock().await;
        for record in state.records.values_mut() {
            if record.status != Status::Pending {
                continue;
            }
            if !filter.matches(record) {
                continue;
            }
            record.status = Status::Dismissed;
            count += 1;
        }
        let finished_ids: Vec<String> = state
            .records
            .values()
            .filter(|r| r.status == Status::Dismissed)
            .map(|r| r.id.clone())
            .collect();
        for id in finished_ids {
            if let Some(handle) = state.timers.remove(&id) {
                handle.abort();
            }
        }
        drop(state);
        if count > 0 {
            self.broadcast(SseEvent::Dismiss { count }).await;
        }
        count
    }

    pub async fn get_pending(&self) -> Vec<NotificationRecord> {
        self.state
            .lock()
            .await
            .records
            .values()
            .filter(|r| r.status == Status::Pending)
            .cloned()
            .collect()
    }

    pub async fn get_all(&self) -> Vec<NotificationRecord> {
        self.state.lock().await.records.values().cloned().collect()
    }

    /// Look up the notification a Telegram reply targets, append the reply
    /// text, and route it to the originating tmux pane via `send-keys`.
    pub async fn handle_telegram_reply(self: &Arc<Self>, message_id: i64, text: String) -> Option<NotificationRecord> {
        let record = {
            let mut state = self.state.lock().await;
            let record = state
                .records
                .values_mut()
                .find(|r| r.telegram_message_id == Some(message_id))?;
            record.responses.push(text.clone());
            record.clone()
        };

        let tmux_manager = self.tmux_manager.clone();
        let container_id = record.container_id.clone();
        let tmux_session = record.tmux_session.clone();
        let tmux_window = record.tmux_window;
        tokio::spawn(async move {
            tmux_manager
                .send_keys(&container_id, &tmux_session, tmux_window, &text, true)
                .await;
        });

        Some(record)
    }

    /// Non-blocking bounded queue per subscriber: a full queue drops the
    /// event for that subscriber rather than stalling the producer.
    pub async fn subscribe(&self) -> mpsc::Receiver<Option<SseEvent>> {
        let (tx, rx) = mpsc::channel(SSE_QUEUE_DEPTH);
        self.state.lock().await.subscribers.push(tx);
        rx
    }

    async fn broadcast(&self, event: SseEvent) {
        let mut state = self.state.lock().await;
        state.subscribers.retain(|tx| tx.try_send(Some(event.clone())).is_ok() || !tx.is_closed());
    }

    pub async fn cleanup(&self) {
        let mut state = self.state.lock().await;
        for (_, handle) in state.timers.drain() {
            handle.abort();
        }
        for tx in state.subscribers.drain(..) {
            let _ = tx.try_send(None);
        }
        state.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeManager;
    use crate::debug_log::DebugLog;
    use notifier::LoggingNotifier;

    fn make_manager() -> Arc<NotificationManager> {
        let debug_log = Arc::new(DebugLog::new());
        let bridge_manager = Arc::new(BridgeManager::new());
        let tmux_manager = Arc::new(TmuxManager::new(bridge_manager, None, None, debug_log));
        NotificationManager::new(Arc::new(LoggingNotifier), tmux_manager, Duration::from_millis(20))
    }

    fn sample_create(channels: Vec<Channel>) -> NotificationCreate {
        NotificationCreate {
            message: "hi".into(),
            title: "title".into(),
            notification_type: "test".into(),
            session_id: "s1".into(),
            container_id: "local".into(),
            tmux_session: "main".into(),
            tmux_window: 0,
            channels,
        }
    }

    #[tokio::test]
    async fn test_empty_channels_defaults_to_all_three() {
        let manager = make_manager();
        let record = manager.create(sample_create(vec![])).await;
        assert_eq!(record.channels.len(), 3);
    }

    #[tokio::test]
    async fn test_dismiss_cancels_pending_timer_and_transitions_status() {
        let manager = make_manager();
        let record = manager.create(sample_create(vec![Channel::Web, Channel::Telegram])).await;

        let dismissed = manager
            .dismiss(DismissFilter {
                session_id: Some(record.session_id.clone()),
                ..Default::default()
            })
            .await;
        assert_eq!(dismissed, 1);

        let all = manager.get_all().await;
        assert_eq!(all[0].status, Status::Dismissed);
    }

    #[tokio::test]
    async fn test_telegram_only_channel_fires_immediately() {
        let manager = make_manager();
        manager.create(sample_create(vec![Channel::Telegram])).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let all = manager.get_all().await;
        assert_eq!(all[0].status, Status::TelegramSent);
    }

    #[tokio::test]
    async fn test_reply_routing_appends_response() {
        let manager = make_manager();
        let mut record = manager.create(sample_create(vec![Channel::Web])).await;
        record.telegram_message_id = Some(42);
        {
            let mut state = manager.state.lock().await;
            state.records.insert(record.id.clone(), record.clone());
        }

        let updated = manager.handle_telegram_reply(42, "yes".into()).await.unwrap();
        assert_eq!(updated.responses, vec!["yes".to_string()]);
    }
}
