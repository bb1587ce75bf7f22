//! axum router wiring for the external interfaces this crate owns: the
//! terminal WS, the bridge WS, notification SSE + hook POSTs, and the
//! debug-log read endpoint.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::app::App;

pub fn create_router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/ws/terminal/{container_id}/{session_name}/{window_index}", get(handlers::terminal::ws_handler))
        .route("/ws/bridge", get(handlers::bridge_ws::ws_handler))
        .route("/api/v1/notifications", post(handlers::notifications::create_notification))
        .route("/api/v1/notifications/dismiss", post(handlers::notifications::dismiss_notifications))
        .route("/api/v1/notifications/stream", get(handlers::notifications::stream_notifications))
        .route("/api/v1/debug-log", get(handlers::debug_log::list_entries))
        .route("/api/v1/debug-log/clear", post(handlers::debug_log::clear_entries))
        .layer(cors)
        .with_state(app)
}
