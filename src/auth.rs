//! PIN-based session gate shared by the HTTP login endpoint, the terminal
//! WebSocket upgrade, and the bridge agent handshake.

use std::collections::HashSet;

use tokio::sync::Mutex;
use uuid::Uuid;

/// Byte-for-byte constant-time comparison so PIN/token checks don't leak
/// timing information about how many leading bytes matched.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// In-memory set of session tokens issued after a successful PIN check.
/// No persistence across restarts — a restart revokes every outstanding
/// browser session, same as the original single-process deployment.
#[derive(Default)]
pub struct SessionStore {
    tokens: Mutex<HashSet<String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn issue(&self) -> String {
        let token = Uuid::new_v4().to_string();
        self.tokens.lock().await.insert(token.clone());
        token
    }

    pub async fn validate(&self, token: &str) -> bool {
        self.tokens.lock().await.contains(token)
    }

    pub async fn revoke(&self, token: &str) {
        self.tokens.lock().await.remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq_matches_equal_slices() {
        assert!(constant_time_eq(b"secret", b"secret"));
    }

    #[test]
    fn test_constant_time_eq_rejects_different_length_or_content() {
        assert!(!constant_time_eq(b"secret", b"wrong!"));
        assert!(!constant_time_eq(b"secret", b"short"));
    }

    #[tokio::test]
    async fn test_session_store_issue_then_validate_then_revoke() {
        let store = SessionStore::new();
        let token = store.issue().await;
        assert!(store.validate(&token).await);
        store.revoke(&token).await;
        assert!(!store.validate(&token).await);
    }
}
