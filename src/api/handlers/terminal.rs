//! `/ws/terminal/{container_id}/{session_name}/{window_index}` upgrade
//! handler: gates on the session cookie, then hands off to the proxy.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use crate::api::auth::session_cookie;
use crate::app::App;
use crate::terminal::{self, CLOSE_AUTH_REQUIRED};

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((container_id, session_name, window_index)): Path<(String, String, u32)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(app): State<Arc<App>>,
) -> impl IntoResponse {
    let cookie = session_cookie(&headers);
    let cols = params.get("cols").and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_COLS);
    let rows = params.get("rows").and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_ROWS);

    ws.on_upgrade(move |socket| async move {
        if !app.terminal.authorize(cookie.as_deref()).await {
            reject(socket).await;
            return;
        }
        terminal::handle_terminal(socket, app.terminal.clone(), container_id, session_name, window_index, cols, rows).await;
    })
}

async fn reject(mut socket: WebSocket) {
    use futures_util::SinkExt;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_AUTH_REQUIRED,
            reason: "session required".into(),
        })))
        .await;
}
