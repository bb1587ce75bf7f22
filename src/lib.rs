//! Shared library crate: data model, tmux façade, bridge protocol, and the
//! ambient stack (config, errors, logging) used by both the `tmuxdeck`
//! server binary and the `tmuxdeck-bridge` agent binary.

pub mod api;
pub mod app;
pub mod auth;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod debug_log;
pub mod error;
pub mod logging;
pub mod model;
pub mod notifications;
pub mod terminal;
pub mod tmux;
