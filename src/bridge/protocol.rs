//! Wire messages carried as JSON text frames on `/ws/bridge`, shared by the
//! server and the agent binary.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    Auth {
        token: String,
        name: String,
    },
    AuthOk {
        bridge_id: String,
    },
    AuthError {
        reason: String,
    },
    Sessions {
        sessions: Vec<BridgeSession>,
        #[serde(default)]
        sources: Vec<String>,
    },
    Attach {
        id: String,
        session_name: String,
        window_index: u32,
        channel_id: u16,
        cols: u16,
        rows: u16,
        source: String,
    },
    AttachOk {
        id: String,
    },
    AttachError {
        id: String,
        reason: String,
    },
    Detach {
        channel_id: u16,
    },
    Detached {
        channel_id: u16,
    },
    Resize {
        channel_id: u16,
        cols: u16,
        rows: u16,
    },
    TmuxCmd {
        id: String,
        cmd: Vec<String>,
        source: String,
    },
    CmdResult {
        id: String,
        output: String,
        #[serde(default)]
        error: Option<String>,
    },
    ListSessions,
    Ping,
    Pong,
}

impl BridgeMessage {
    /// The correlation id for messages that resolve a pending request, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            BridgeMessage::AttachOk { id } => Some(id),
            BridgeMessage::AttachError { id, .. } => Some(id),
            BridgeMessage::CmdResult { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSession {
    pub id: String,
    pub name: String,
    pub source: String,
    pub windows: u32,
    pub created: String,
    pub attached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_message_roundtrips() {
        let msg = BridgeMessage::Auth {
            token: "t".into(),
            name: "agent-1".into(),
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"type\":\"auth\""));
        let back: BridgeMessage = serde_json::from_str(&text).unwrap();
        assert!(matches!(back, BridgeMessage::Auth { .. }));
    }

    #[test]
    fn test_request_id_extraction() {
        let msg = BridgeMessage::CmdResult {
            id: "abc12345".into(),
            output: "".into(),
            error: None,
        };
        assert_eq!(msg.request_id(), Some("abc12345"));
        assert_eq!(BridgeMessage::Ping.request_id(), None);
    }
}
