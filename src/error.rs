//! Unified error type for the server, the bridge agent, and the tmux façade.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TmuxDeckError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("tmux error: {0}")]
    Tmux(String),

    #[error("bridge error: {0}")]
    Bridge(String),

    #[error("docker error: {0}")]
    Docker(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, TmuxDeckError>;

impl TmuxDeckError {
    pub fn tmux(msg: impl Into<String>) -> Self {
        Self::Tmux(msg.into())
    }

    pub fn bridge(msg: impl Into<String>) -> Self {
        Self::Bridge(msg.into())
    }

    pub fn docker(msg: impl Into<String>) -> Self {
        Self::Docker(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TmuxDeckError::tmux("no such session");
        assert_eq!(err.to_string(), "tmux error: no such session");

        let err = TmuxDeckError::bridge("auth failed");
        assert_eq!(err.to_string(), "bridge error: auth failed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: TmuxDeckError = io_err.into();
        assert!(matches!(err, TmuxDeckError::Io(_)));
    }

    #[test]
    fn test_error_from_string() {
        let err = TmuxDeckError::not_found("session xyz");
        assert!(err.to_string().contains("xyz"));
    }
}
