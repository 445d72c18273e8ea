//! Admin API token authentication
//!
//! Accepted credentials:
//! - `Authorization: Bearer <token>`
//! - `X-Hookrelay-Token: <token>`
//!
//! With no token configured, only loopback clients are admitted.

use std::net::SocketAddr;

use axum::http::HeaderMap;

use crate::crypto::timing_safe_equal;

/// Extract the admin token from the request headers.
pub fn extract_admin_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get("authorization") {
        if let Ok(auth_str) = auth.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    if let Some(token) = headers.get("x-hookrelay-token") {
        if let Ok(token_str) = token.to_str() {
            return Some(token_str.trim().to_string());
        }
    }

    None
}

/// Validate a provided token against the configured one.
pub fn validate_admin_token(provided: &str, configured: &str) -> bool {
    if provided.is_empty() || configured.is_empty() {
        return false;
    }
    timing_safe_equal(provided, configured)
}

/// Decide whether an admin request may proceed.
pub fn authorize_admin(
    configured: Option<&str>,
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
) -> bool {
    match configured.filter(|t| !t.is_empty()) {
        Some(configured) => extract_admin_token(headers)
            .map(|provided| validate_admin_token(&provided, configured))
            .unwrap_or(false),
        None => remote_addr.map(|a| a.ip().is_loopback()).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer my-secret-token"),
        );
        assert_eq!(
            extract_admin_token(&headers),
            Some("my-secret-token".to_string())
        );
    }

    #[test]
    fn test_extract_header_token() {
        let mut headers = HeaderMap::new();
        headers.insert("x-hookrelay-token", HeaderValue::from_static("another"));
        assert_eq!(extract_admin_token(&headers), Some("another".to_string()));
    }

    #[test]
    fn test_bearer_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer bearer"));
        headers.insert("x-hookrelay-token", HeaderValue::from_static("header"));
        assert_eq!(extract_admin_token(&headers), Some("bearer".to_string()));
    }

    #[test]
    fn test_no_token() {
        assert_eq!(extract_admin_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_validate_admin_token() {
        assert!(validate_admin_token("t", "t"));
        assert!(!validate_admin_token("t", "u"));
        assert!(!validate_admin_token("", "t"));
        assert!(!validate_admin_token("t", ""));
    }

    #[test]
    fn test_authorize_admin() {
        let mut with_token = HeaderMap::new();
        with_token.insert("authorization", HeaderValue::from_static("Bearer secret"));
        let loopback: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let remote: SocketAddr = "203.0.113.7:5000".parse().unwrap();

        assert!(authorize_admin(Some("secret"), &with_token, Some(remote)));
        assert!(!authorize_admin(Some("other"), &with_token, Some(loopback)));
        assert!(!authorize_admin(Some("secret"), &HeaderMap::new(), Some(loopback)));

        // No token configured: loopback only.
        assert!(authorize_admin(None, &HeaderMap::new(), Some(loopback)));
        assert!(!authorize_admin(None, &HeaderMap::new(), Some(remote)));
        assert!(!authorize_admin(Some(""), &HeaderMap::new(), None));
    }
}
