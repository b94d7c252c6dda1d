//! Family invitation lifecycle
//!
//! Coordinators invite prospective members by email. The invitation is a
//! single-use auth token bound to a family, role, and (optionally) the
//! invited address; signup redeems it. Only the token digest is stored,
//! so a resend rotates the token rather than re-sending the original.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::audit_constants::{category, event_type};
use crate::auth::tokens::{self, NewToken, TokenKind};
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::routes::audit_context;
use crate::routes::auth::INVITATION_TTL_DAYS;
use crate::state::AppState;
use crate::validation::require_valid_email;

#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    pub email: String,
    pub family_id: Uuid,
    pub member_role: Option<String>,
    pub relationship: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateInvitationResponse {
    pub success: bool,
    pub invitation_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub email_sent: bool,
}

#[derive(Debug, Serialize)]
pub struct InvitationActionResponse {
    pub success: bool,
}

/// Only coordinators of the family may manage its invitations.
async fn require_coordinator(state: &AppState, user_id: Uuid, family_id: Uuid) -> ApiResult<()> {
    let role: Option<String> = sqlx::query_scalar(
        r#"
        SELECT member_role
        FROM family_memberships
        WHERE family_id = $1 AND user_id = $2
        "#,
    )
    .bind(family_id)
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?;

    match role.as_deref() {
        Some("coordinator") => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

/// POST /api/invitations
pub async fn create_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<CreateInvitationRequest>,
) -> ApiResult<(StatusCode, Json<CreateInvitationResponse>)> {
    let ctx = audit_context(&headers);
    let email = require_valid_email(&payload.email)?;

    require_coordinator(&state, auth_user.user_id, payload.family_id).await?;

    let member_role = payload.member_role.as_deref().unwrap_or("member");
    let (invitation_id, raw_token) = tokens::create(
        &state.pool,
        TokenKind::FamilyInvitation,
        NewToken {
            email: Some(&email),
            family_id: Some(payload.family_id),
            member_role: Some(member_role),
            relationship: payload.relationship.as_deref(),
            ttl: Duration::days(INVITATION_TTL_DAYS),
            max_uses: 1,
            metadata: json!({ "invited_by": auth_user.user_id }),
            ..NewToken::default()
        },
    )
    .await?;

    let family_name: String = sqlx::query_scalar("SELECT name FROM families WHERE id = $1")
        .bind(payload.family_id)
        .fetch_one(&state.pool)
        .await?;

    let email_sent = state
        .mailer
        .send_invitation(&email, &family_name, &raw_token)
        .await;

    let expires_at = OffsetDateTime::now_utc() + Duration::days(INVITATION_TTL_DAYS);

    state
        .audit
        .log(
            AuditEvent::new(event_type::INVITATION_CREATED, category::INVITATION)
                .actor(auth_user.user_id)
                .target(invitation_id)
                .data(json!({
                    "email": email,
                    "family_id": payload.family_id,
                    "member_role": member_role,
                })),
            &ctx,
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(CreateInvitationResponse {
            success: true,
            invitation_id,
            expires_at,
            email_sent,
        }),
    ))
}

/// DELETE /api/invitations/{id}
pub async fn revoke_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<InvitationActionResponse>> {
    let ctx = audit_context(&headers);

    let row = tokens::find_by_id(&state.pool, id, TokenKind::FamilyInvitation)
        .await?
        .ok_or(ApiError::NotFound)?;
    let family_id = row.family_id.ok_or(ApiError::NotFound)?;

    require_coordinator(&state, auth_user.user_id, family_id).await?;

    if !tokens::revoke(&state.pool, id).await? {
        // Already used, expired, or previously revoked.
        return Err(ApiError::NotFound);
    }

    state
        .audit
        .log(
            AuditEvent::new(event_type::INVITATION_REVOKED, category::INVITATION)
                .actor(auth_user.user_id)
                .target(id),
            &ctx,
        )
        .await;

    Ok(Json(InvitationActionResponse { success: true }))
}

/// POST /api/invitations/{id}/resend
pub async fn resend_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<InvitationActionResponse>> {
    let ctx = audit_context(&headers);

    let row = tokens::find_by_id(&state.pool, id, TokenKind::FamilyInvitation)
        .await?
        .ok_or(ApiError::NotFound)?;
    let family_id = row.family_id.ok_or(ApiError::NotFound)?;
    let email = row.email.clone().ok_or(ApiError::NotFound)?;

    require_coordinator(&state, auth_user.user_id, family_id).await?;

    // Rotation mints a fresh raw token and extends the expiry; the old
    // link stops working.
    let raw_token = tokens::rotate(&state.pool, id, Duration::days(INVITATION_TTL_DAYS))
        .await?
        .ok_or(ApiError::TokenUsed)?;

    let family_name: String = sqlx::query_scalar("SELECT name FROM families WHERE id = $1")
        .bind(family_id)
        .fetch_one(&state.pool)
        .await?;

    state
        .mailer
        .send_invitation(&email, &family_name, &raw_token)
        .await;

    state
        .audit
        .log(
            AuditEvent::new(event_type::INVITATION_RESENT, category::INVITATION)
                .actor(auth_user.user_id)
                .target(id),
            &ctx,
        )
        .await;

    Ok(Json(InvitationActionResponse { success: true }))
}
