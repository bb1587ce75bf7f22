//! Minimal pass/fail session-cookie gate for the WS/SSE boundary. Issuing
//! and rotating PINs is out of scope here — this only enforces the check
//! `spec.md` describes: reject the handshake with close code 4001 when a
//! PIN is configured and the `session` cookie doesn't match a known token.

use axum::http::HeaderMap;

/// Extracts the `session` cookie value from a raw `Cookie` header, if present.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix("session=").map(|v| v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_session_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::COOKIE, "theme=dark; session=abc123; other=1".parse().unwrap());
        assert_eq!(session_cookie(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_missing_cookie_header_returns_none() {
        let headers = HeaderMap::new();
        assert_eq!(session_cookie(&headers), None);
    }
}
