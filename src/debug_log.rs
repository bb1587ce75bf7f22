//! Process-wide ring buffer of operator-visible events, used by the tmux
//! façade, bridge protocol, session API, and notification manager.

use std::collections::VecDeque;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

const MAX_ENTRIES: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LogEntry {
    fn new(level: LogLevel, source: impl Into<String>, message: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            id: {
                let full = Uuid::new_v4().simple().to_string();
                full[..8].to_string()
            },
            timestamp: Utc::now().to_rfc3339(),
            level,
            source: source.into(),
            message: message.into(),
            detail,
        }
    }
}

/// Bounded FIFO ring buffer, at most [`MAX_ENTRIES`] entries (invariant #6).
pub struct DebugLog {
    entries: Mutex<VecDeque<LogEntry>>,
}

impl Default for DebugLog {
    fn default() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(MAX_ENTRIES)),
        }
    }
}

impl DebugLog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock().await;
        if entries.len() >= MAX_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub async fn info(&self, source: impl Into<String>, message: impl Into<String>, detail: Option<String>) {
        self.push(LogEntry::new(LogLevel::Info, source, message, detail)).await;
    }

    pub async fn warn(&self, source: impl Into<String>, message: impl Into<String>, detail: Option<String>) {
        self.push(LogEntry::new(LogLevel::Warn, source, message, detail)).await;
    }

    pub async fn error(&self, source: impl Into<String>, message: impl Into<String>, detail: Option<String>) {
        self.push(LogEntry::new(LogLevel::Error, source, message, detail)).await;
    }

    pub async fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ring_buffer_evicts_oldest_past_capacity() {
        let log = DebugLog::new();
        for i in 0..MAX_ENTRIES + 10 {
            log.info("test", format!("entry {i}"), None).await;
        }
        let entries = log.entries().await;
        assert_eq!(entries.len(), MAX_ENTRIES);
        assert_eq!(entries.first().unwrap().message, "entry 10");
    }

    #[tokio::test]
    async fn test_clear_empties_the_log() {
        let log = DebugLog::new();
        log.warn("test", "hello", None).await;
        log.clear().await;
        assert!(log.entries().await.is_empty());
    }
}
