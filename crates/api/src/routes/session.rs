//! Session introspection, refresh, and logout
//!
//! The client's lifecycle timers are driven by `GET /api/auth/session`:
//! it reports when the current access token expires and whether
//! Remember-Me applies, and the client schedules its warning, refresh,
//! and forced-logout timers from that. Refresh rotates the access token
//! under the existing refresh session and can never extend past the
//! refresh ceiling.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::audit::AuditEvent;
use crate::audit_constants::{category, event_type};
use crate::auth::sessions::{
    self, is_session_valid, revoke_session_family, save_access_rotation, SessionExpiry,
};
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::routes::audit_context;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CurrentSessionResponse {
    pub success: bool,
    pub session: SessionExpiry,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub success: bool,
    pub access_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
    pub remember_me: bool,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// GET /api/auth/session
pub async fn current_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<CurrentSessionResponse>> {
    let session = sessions::session_expiry(&state.pool, &auth_user.jti)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok(Json(CurrentSessionResponse {
        success: true,
        session,
    }))
}

/// POST /api/auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let ctx = audit_context(&headers);

    let claims = state
        .jwt_manager
        .validate_refresh_token(&payload.refresh_token)
        .map_err(|e| {
            tracing::debug!(error = %e, "refresh token rejected");
            ApiError::Unauthorized
        })?;

    if !is_session_valid(&state.pool, &claims.jti, claims.sub).await? {
        return Err(ApiError::Unauthorized);
    }

    // The refresh session's own expiry is the rotation ceiling.
    let refresh_session = sessions::session_expiry(&state.pool, &claims.jti)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let access = state
        .jwt_manager
        .generate_access_token_capped(
            claims.sub,
            &claims.email,
            claims.family_id,
            &claims.role,
            refresh_session.expires_at,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "failed to sign rotated access token");
            ApiError::Internal
        })?;

    save_access_rotation(
        &state.pool,
        claims.sub,
        &access.jti,
        access.expires_at,
        &claims.jti,
        &ctx,
    )
    .await?;

    state
        .audit
        .log(
            AuditEvent::new(event_type::SESSION_REFRESHED, category::AUTHENTICATION)
                .actor(claims.sub),
            &ctx,
        )
        .await;

    Ok(Json(RefreshResponse {
        success: true,
        access_token: access.token,
        expires_at: access.expires_at,
        refresh_expires_at: refresh_session.expires_at,
        remember_me: refresh_session.remember_me,
    }))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<LogoutResponse>> {
    let ctx = audit_context(&headers);

    revoke_session_family(&state.pool, &auth_user.jti, "logout").await?;

    state
        .audit
        .log(
            AuditEvent::new(event_type::LOGOUT, category::AUTHENTICATION).actor(auth_user.user_id),
            &ctx,
        )
        .await;

    Ok(Json(LogoutResponse { success: true }))
}
