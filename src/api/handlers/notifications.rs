//! Notification hook endpoints: create, dismiss, and the SSE stream the
//! browser subscribes to.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::{http::StatusCode, Json};
use futures_util::stream::{self, Stream};
use serde::Deserialize;

use crate::app::App;
use crate::notifications::{Channel, DismissFilter, NotificationCreate};

#[derive(Deserialize)]
pub struct CreateNotificationRequest {
    pub message: String,
    pub title: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub session_id: String,
    pub container_id: String,
    pub tmux_session: String,
    pub tmux_window: u32,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

pub async fn create_notification(
    State(app): State<Arc<App>>,
    Json(req): Json<CreateNotificationRequest>,
) -> impl IntoResponse {
    let record = app
        .notifications
        .create(NotificationCreate {
            message: req.message,
            title: req.title,
            notification_type: req.notification_type,
            session_id: req.session_id,
            container_id: req.container_id,
            tmux_session: req.tmux_session,
            tmux_window: req.tmux_window,
            channels: req.channels,
        })
        .await;
    (StatusCode::CREATED, Json(record))
}

#[derive(Deserialize, Default)]
pub struct DismissRequest {
    pub session_id: Option<String>,
    pub container_id: Option<String>,
    pub tmux_session: Option<String>,
    pub tmux_window: Option<u32>,
}

pub async fn dismiss_notifications(State(app): State<Arc<App>>, Json(req): Json<DismissRequest>) -> impl IntoResponse {
    let dismissed = app
        .notifications
        .dismiss(DismissFilter {
            session_id: req.session_id,
            container_id: req.container_id,
            tmux_session: req.tmux_session,
            tmux_window: req.tmux_window,
        })
        .await;
    Json(serde_json::json!({ "dismissed": dismissed }))
}

pub async fn stream_notifications(State(app): State<Arc<App>>) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = app.notifications.subscribe().await;
    let stream = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Some(Some(event)) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some((Ok(Event::default().data(json)), rx))
            }
            _ => None,
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("keepalive"))
}
