use axum::http::HeaderMap;
use slotfire_core::config::{AuthConfig, AuthMode};

/// Check the `Authorization: Bearer <token>` header against the gateway config.
pub fn check_auth(auth: &AuthConfig, headers: &HeaderMap) -> bool {
    match auth.mode {
        AuthMode::None => true,
        AuthMode::Token => {
            let expected = match &auth.token {
                Some(t) => t.as_str(),
                // Token mode configured but no token value: deny.
                None => return false,
            };
            extract_bearer(headers)
                .map(|t| t == expected)
                .unwrap_or(false)
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
