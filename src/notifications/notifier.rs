//! The abstract delivery contract the notification fan-out talks to. The
//! concrete Telegram bot (registration, command handling, reply polling) is
//! an external collaborator out of scope here; this crate only needs a
//! `Notifier` to call and a reply channel to route responses back through.

use async_trait::async_trait;

use super::NotificationRecord;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification to whatever external channel this notifier
    /// represents (Telegram, in the original deployment). Returns the
    /// delivered message id when the channel assigns one, so the caller can
    /// populate `telegram_message_id`.
    async fn send(&self, record: &NotificationRecord) -> Result<Option<i64>, String>;
}

/// Default notifier for standalone/dev runs: logs instead of calling out to
/// Telegram. Swapped out by a real implementation when bridged to the
/// external bot glue.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, record: &NotificationRecord) -> Result<Option<i64>, String> {
        tracing::info!(
            notification_id = %record.id,
            title = %record.title,
            "notification delivery (no Telegram bot configured, logging instead)"
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationCreate;

    #[tokio::test]
    async fn test_logging_notifier_always_succeeds() {
        let record = NotificationRecord::new(NotificationCreate {
            message: "hi".into(),
            title: "title".into(),
            notification_type: "test".into(),
            session_id: "s1".into(),
            container_id: "local".into(),
            tmux_session: "main".into(),
            tmux_window: 0,
            channels: vec![],
        });
        let notifier = LoggingNotifier;
        assert_eq!(notifier.send(&record).await, Ok(None));
    }
}
