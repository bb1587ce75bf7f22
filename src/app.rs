//! Process-wide context: every long-lived manager, constructed once in
//! `main` and injected into the axum router as `State`.

use std::sync::Arc;

use crate::auth::SessionStore;
use crate::bridge::BridgeManager;
use crate::config::Config;
use crate::debug_log::DebugLog;
use crate::notifications::notifier::{LoggingNotifier, Notifier};
use crate::notifications::NotificationManager;
use crate::terminal::TerminalContext;
use crate::tmux::TmuxManager;

pub struct App {
    pub config: Config,
    pub tmux: Arc<TmuxManager>,
    pub bridge_manager: Arc<BridgeManager>,
    pub notifications: Arc<NotificationManager>,
    pub debug_log: Arc<DebugLog>,
    pub sessions: Arc<SessionStore>,
    pub terminal: Arc<TerminalContext>,
}

impl App {
    pub fn new(config: Config, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        let debug_log = Arc::new(DebugLog::new());
        let bridge_manager = Arc::new(BridgeManager::new());

        let docker = config
            .server
            .docker_socket
            .as_ref()
            .and_then(|socket| bollard::Docker::connect_with_unix(socket, 120, bollard::API_DEFAULT_VERSION).ok());

        let tmux = Arc::new(TmuxManager::new(
            bridge_manager.clone(),
            config.server.host_tmux_socket.clone(),
            docker.clone(),
            debug_log.clone(),
        ));
        let notification_timeout = std::time::Duration::from_secs(config.notifications.telegram_notification_timeout_secs);
        let notifications = NotificationManager::new(notifier, tmux.clone(), notification_timeout);
        let sessions = Arc::new(SessionStore::new());

        let terminal = Arc::new(TerminalContext {
            tmux: tmux.clone(),
            bridge_manager: bridge_manager.clone(),
            docker,
            debug_log: debug_log.clone(),
            sessions: sessions.clone(),
            pin: config.server.pin.clone(),
        });

        Arc::new(Self {
            config,
            tmux,
            bridge_manager,
            notifications,
            debug_log,
            sessions,
            terminal,
        })
    }

    /// Convenience constructor for a standalone server with no Telegram
    /// delivery wired up — the default when no `Notifier` is injected.
    pub fn standalone(config: Config) -> Arc<Self> {
        Self::new(config, Arc::new(LoggingNotifier))
    }
}
