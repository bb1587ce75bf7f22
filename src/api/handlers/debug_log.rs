//! Read-only endpoint over the in-memory debug log ring buffer.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::app::App;
use crate::debug_log::LogEntry;

pub async fn list_entries(State(app): State<Arc<App>>) -> Json<Vec<LogEntry>> {
    Json(app.debug_log.entries().await)
}

pub async fn clear_entries(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    app.debug_log.clear().await;
    Json(serde_json::json!({ "cleared": true }))
}
