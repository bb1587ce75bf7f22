//! API handlers

pub mod bridge_ws;
pub mod debug_log;
pub mod notifications;
pub mod terminal;
