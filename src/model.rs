//! Wire-facing data model shared across the façade, terminal proxy, bridge
//! protocol, and notification fan-out.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Creating,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Local,
    Host,
    Docker,
    Bridge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: String,
    pub display_name: String,
    pub status: ContainerStatus,
    pub container_type: ContainerType,
    pub sessions: Vec<TmuxSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TmuxSession {
    pub id: String,
    pub name: String,
    pub windows: Vec<TmuxWindow>,
    pub created: String,
    pub attached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TmuxWindow {
    pub index: u32,
    pub name: String,
    pub active: bool,
    pub panes: u32,
    pub bell: bool,
    pub activity: bool,
    pub command: String,
    pub pane_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pane {
    pub index: u32,
    pub active: bool,
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub command: String,
}

/// Deterministic session id: first 12 hex chars of `md5(container_id:name)`.
pub fn make_session_id(container_id: &str, name: &str) -> String {
    let digest = md5::compute(format!("{}:{}", container_id, name));
    format!("{:x}", digest)[..12].to_string()
}

/// Deterministic session id used by bridge sources so ids stay unique and
/// stable across server restarts, regardless of which agent reports them.
pub fn make_bridge_session_id(source: &str, name: &str) -> String {
    let digest = md5::compute(format!("bridge:{}:{}", source, name));
    format!("{:x}", digest)[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_session_id_is_deterministic() {
        let a = make_session_id("local", "main");
        let b = make_session_id("local", "main");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
    }

    #[test]
    fn test_make_session_id_depends_on_container() {
        let a = make_session_id("local", "main");
        let b = make_session_id("host", "main");
        assert_ne!(a, b);
    }

    #[test]
    fn test_bridge_session_id_includes_source() {
        let a = make_bridge_session_id("local", "main");
        let b = make_bridge_session_id("docker:abc123", "main");
        assert_ne!(a, b);
    }
}
