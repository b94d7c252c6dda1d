//! Route registration and request helpers

pub mod auth;
pub mod health;
pub mod invitations;
pub mod recovery;
pub mod session;

use axum::http::HeaderMap;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::audit::AuditContext;
use crate::auth::require_auth;
use crate::state::AppState;

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    let protected = Router::new()
        .route("/api/auth/session", get(session::current_session))
        .route("/api/auth/logout", post(session::logout))
        .route("/api/invitations", post(invitations::create_invitation))
        .route("/api/invitations/{id}", delete(invitations::revoke_invitation))
        .route(
            "/api/invitations/{id}/resend",
            post(invitations::resend_invitation),
        )
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/verify-email", post(auth::verify_email))
        .route("/api/auth/login", post(auth::request_login_code))
        .route(
            "/api/auth/resend-verification",
            post(auth::resend_verification),
        )
        .route("/api/auth/forgot-password", post(recovery::forgot_password))
        .route("/api/auth/recover", post(recovery::recover))
        .route(
            "/api/auth/recover/backup-email",
            post(recovery::backup_email_code),
        )
        .route("/api/auth/refresh", post(session::refresh))
        .merge(protected)
        .with_state(state)
}

/// Extract the client IP from proxy headers (X-Forwarded-For first,
/// then CF-Connecting-IP, then X-Real-IP).
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("X-Forwarded-For").and_then(|h| h.to_str().ok()) {
        return xff.split(',').next().map(|s| s.trim().to_string());
    }
    if let Some(ip) = headers.get("CF-Connecting-IP").and_then(|h| h.to_str().ok()) {
        return Some(ip.to_string());
    }
    headers
        .get("X-Real-IP")
        .and_then(|h| h.to_str().ok())
        .map(String::from)
}

/// Audit context (ip + user agent) from the request headers.
pub fn audit_context(headers: &HeaderMap) -> AuditContext {
    AuditContext {
        ip_address: extract_client_ip(headers),
        user_agent: headers
            .get("user-agent")
            .and_then(|h| h.to_str().ok())
            .map(String::from),
    }
}

/// Rate-limit key for a request: the client IP, or a fixed bucket when
/// no proxy header is present.
pub fn rate_limit_key(headers: &HeaderMap) -> String {
    extract_client_ip(headers).unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Forwarded-For",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        headers.insert("X-Real-IP", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn missing_headers_use_fixed_bucket() {
        let headers = HeaderMap::new();
        assert_eq!(rate_limit_key(&headers), "unknown");
    }
}
