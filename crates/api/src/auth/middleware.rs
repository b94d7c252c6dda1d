//! Authentication middleware
//!
//! Bearer-token validation for the endpoints that require a signed-in
//! user (session introspection, logout, invitation management). The JWT
//! is validated locally, then the session row is checked for revocation
//! and ownership.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::jwt::JwtManager;
use crate::auth::sessions;
use crate::error::ApiError;

/// Authenticated user attached to the request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    /// Default family carried in the session claims
    pub family_id: Option<Uuid>,
    pub role: String,
    /// jti of the access token, for revocation and audit linkage
    pub jti: String,
}

/// State needed for authentication, extracted from [`crate::state::AppState`].
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
    pub pool: PgPool,
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(String::from)
}

/// Middleware that rejects unauthenticated requests with 401.
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(&request) else {
        return ApiError::Unauthorized.into_response();
    };

    let claims = match auth_state.jwt_manager.validate_access_token(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(error = %e, "access token rejected");
            return ApiError::Unauthorized.into_response();
        }
    };

    // Revocation and ownership check against the session store.
    match sessions::is_session_valid(&auth_state.pool, &claims.jti, claims.sub).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(jti = %claims.jti, user_id = %claims.sub, "session revoked or expired");
            return ApiError::Unauthorized.into_response();
        }
        Err(e) => return e.into_response(),
    }

    request.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        email: claims.email,
        family_id: claims.family_id,
        role: claims.role,
        jti: claims.jti,
    });
    next.run(request).await
}
