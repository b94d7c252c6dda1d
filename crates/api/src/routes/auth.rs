//! Signup and email-verification handlers
//!
//! Signup runs the full state machine: validate → redeem invitation →
//! duplicate check → provider create → recovery code + verification →
//! email dispatch → family resolution → audit. Verification accepts the
//! six-digit code (primary) or a legacy opaque token (fallback), consumes
//! it atomically, confirms the email at the provider, and mints a fresh
//! session so the client need not separately log in.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::audit::{AuditContext, AuditEvent};
use crate::audit_constants::{category, event_type, severity};
use crate::auth::sessions::{mint_session, SessionPayload};
use crate::auth::tokens::{self, TokenKind};
use crate::auth::verification::{self, VerificationType};
use crate::auth::{recovery_codes, AuthTokenRow};
use crate::error::{ApiError, ApiResult};
use crate::routes::{audit_context, rate_limit_key};
use crate::state::AppState;
use crate::validation::{is_disposable_email, require_valid_email};

/// Family invitations are valid for a week.
pub const INVITATION_TTL_DAYS: i64 = 7;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub family_invitation_token: Option<String>,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct FamilyJoined {
    pub family_id: Uuid,
    pub family_name: String,
    pub member_role: String,
    pub via_invitation: bool,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub success: bool,
    pub user: UserSummary,
    pub session: SessionPayload,
    pub needs_email_verification: bool,
    pub family_joined: FamilyJoined,
    /// Displayed once; only the hash is retained.
    pub recovery_code: String,
    pub recovery_code_hint: String,
    pub verification_code_sent: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub code: Option<String>,
    pub token: Option<String>,
    #[serde(rename = "type")]
    pub verification_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyEmailResponse {
    pub success: bool,
    pub verified: bool,
    pub session: SessionPayload,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct GenericResponse {
    pub success: bool,
    pub message: &'static str,
}

/// An invitation that has been validated and atomically claimed.
struct ClaimedInvitation {
    family_id: Uuid,
    member_role: String,
    relationship: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DefaultMembershipRow {
    pub(crate) family_id: Uuid,
    pub(crate) member_role: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /api/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SignupRequest>,
) -> ApiResult<(StatusCode, Json<SignupResponse>)> {
    let ip = rate_limit_key(&headers);
    let ctx = audit_context(&headers);

    if let hearthside_shared::RateLimitResult::Limited { retry_after } =
        state.rate_limiter.check("signup", &ip).await
    {
        return Err(ApiError::RateLimited { retry_after });
    }

    match signup_inner(&state, &ctx, &ip, payload).await {
        Ok(response) => Ok((StatusCode::CREATED, Json(response))),
        Err(err) => {
            state
                .rate_limiter
                .record_attempt("signup", &ip, ctx.user_agent.as_deref(), false, None)
                .await;
            state
                .audit
                .log(
                    AuditEvent::new(event_type::SIGNUP_FAILED, category::AUTHENTICATION)
                        .severity(severity::WARNING)
                        .data(json!({ "code": err.code() }))
                        .failed(),
                    &ctx,
                )
                .await;
            Err(err)
        }
    }
}

async fn signup_inner(
    state: &AppState,
    ctx: &AuditContext,
    ip: &str,
    payload: SignupRequest,
) -> ApiResult<SignupResponse> {
    let email = require_valid_email(&payload.email)?;
    if is_disposable_email(&email) {
        return Err(ApiError::DisposableEmail);
    }

    // Redeem the invitation before creating the user: an invalid, expired,
    // or mismatched token aborts the whole signup.
    let invitation = match &payload.family_invitation_token {
        Some(raw) => Some(redeem_invitation(state, raw, &email).await?),
        None => None,
    };

    // Advisory duplicate check; the provider remains the arbiter of
    // uniqueness. Two concurrent signups for the same email race here and
    // are settled by the provider's create call.
    if state.identity.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::EmailExists);
    }

    let first_name = payload.first_name.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let last_name = payload.last_name.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let user = state
        .identity
        .create_user(
            &email,
            json!({
                "first_name": first_name,
                "last_name": last_name,
                "phone_number": payload.phone_number,
            }),
        )
        .await?;

    let recovery = recovery_codes::issue(&state.pool, user.id).await?;
    let issued = verification::issue(&state.pool, user.id, &email, VerificationType::Signup).await?;

    // Email dispatch is not fatal; the user can request a resend.
    let verification_code_sent = state
        .mailer
        .send_verification_code(&email, &issued.code)
        .await;

    let family_joined = match invitation {
        Some(claimed) => join_family(state, user.id, claimed).await?,
        None => provision_default_family(state, user.id, first_name, &email).await?,
    };

    let session = mint_session(
        &state.pool,
        &state.jwt_manager,
        user.id,
        &email,
        Some(family_joined.family_id),
        &family_joined.member_role,
        payload.remember_me,
        ctx,
    )
    .await?;

    state
        .rate_limiter
        .record_attempt("signup", ip, ctx.user_agent.as_deref(), true, Some(&email))
        .await;
    state
        .audit
        .log(
            AuditEvent::new(event_type::SIGNUP, category::AUTHENTICATION)
                .actor(user.id)
                .data(json!({
                    "email": email,
                    "family_id": family_joined.family_id,
                    "via_invitation": family_joined.via_invitation,
                    "verification_code_sent": verification_code_sent,
                })),
            ctx,
        )
        .await;

    Ok(SignupResponse {
        success: true,
        user: UserSummary { id: user.id, email },
        session,
        needs_email_verification: true,
        family_joined,
        recovery_code: recovery.code,
        recovery_code_hint: recovery.hint,
        verification_code_sent,
    })
}

/// Validate and atomically claim a family invitation. The email-match
/// check runs before the claim so a mismatched signup does not consume
/// the token.
async fn redeem_invitation(
    state: &AppState,
    raw: &str,
    email: &str,
) -> ApiResult<ClaimedInvitation> {
    let row = tokens::find_by_raw(&state.pool, raw, TokenKind::FamilyInvitation)
        .await?
        .ok_or(ApiError::InvalidToken)?;

    check_invitation(&row, email)?;

    // The claim only matches while the row is still active and under its
    // use cap; a concurrent redemption loses here.
    if !tokens::claim(&state.pool, row.id).await? {
        return Err(ApiError::TokenUsed);
    }

    let family_id = row.family_id.ok_or_else(|| {
        tracing::error!(token_id = %row.id, "invitation token has no family");
        ApiError::Internal
    })?;

    Ok(ClaimedInvitation {
        family_id,
        member_role: row.member_role.unwrap_or_else(|| "member".to_string()),
        relationship: row.relationship,
    })
}

fn check_invitation(row: &AuthTokenRow, email: &str) -> ApiResult<()> {
    if row.status == "revoked" {
        return Err(ApiError::InvalidToken);
    }
    if row.is_spent() {
        return Err(ApiError::TokenUsed);
    }
    if row.is_expired() {
        return Err(ApiError::ExpiredToken);
    }
    if let Some(invited_email) = &row.email {
        if invited_email != email {
            return Err(ApiError::InvitationEmailMismatch);
        }
    }
    Ok(())
}

/// Insert a membership in the invited family. The default flag is set
/// only when the user has no default yet, keeping exactly one default
/// membership per user.
async fn join_family(
    state: &AppState,
    user_id: Uuid,
    claimed: ClaimedInvitation,
) -> ApiResult<FamilyJoined> {
    sqlx::query(
        r#"
        INSERT INTO family_memberships (family_id, user_id, member_role, relationship, is_default_family)
        VALUES ($1, $2, $3, $4, NOT EXISTS (
            SELECT 1 FROM family_memberships WHERE user_id = $2 AND is_default_family
        ))
        "#,
    )
    .bind(claimed.family_id)
    .bind(user_id)
    .bind(&claimed.member_role)
    .bind(&claimed.relationship)
    .execute(&state.pool)
    .await?;

    let family_name: String = sqlx::query_scalar("SELECT name FROM families WHERE id = $1")
        .bind(claimed.family_id)
        .fetch_one(&state.pool)
        .await?;

    Ok(FamilyJoined {
        family_id: claimed.family_id,
        family_name,
        member_role: claimed.member_role,
        via_invitation: true,
    })
}

/// No invitation: auto-provision a default family named after the user,
/// with the user as its sole coordinator.
async fn provision_default_family(
    state: &AppState,
    user_id: Uuid,
    first_name: Option<&str>,
    email: &str,
) -> ApiResult<FamilyJoined> {
    let display = first_name
        .map(str::to_string)
        .unwrap_or_else(|| email.split('@').next().unwrap_or("My").to_string());
    let family_name = format!("{display}'s Family");

    let family_id: Uuid =
        sqlx::query_scalar("INSERT INTO families (name) VALUES ($1) RETURNING id")
            .bind(&family_name)
            .fetch_one(&state.pool)
            .await?;

    sqlx::query(
        r#"
        INSERT INTO family_memberships (family_id, user_id, member_role, is_default_family)
        VALUES ($1, $2, 'coordinator', TRUE)
        "#,
    )
    .bind(family_id)
    .bind(user_id)
    .execute(&state.pool)
    .await?;

    Ok(FamilyJoined {
        family_id,
        family_name,
        member_role: "coordinator".to_string(),
        via_invitation: false,
    })
}

/// POST /api/auth/verify-email
pub async fn verify_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<VerifyEmailRequest>,
) -> ApiResult<Json<VerifyEmailResponse>> {
    let ip = rate_limit_key(&headers);
    let ctx = audit_context(&headers);

    if let hearthside_shared::RateLimitResult::Limited { retry_after } =
        state.rate_limiter.check("verify_email", &ip).await
    {
        return Err(ApiError::RateLimited { retry_after });
    }

    match verify_email_inner(&state, &ctx, payload).await {
        Ok((response, user_id)) => {
            state
                .rate_limiter
                .record_attempt("verify_email", &ip, ctx.user_agent.as_deref(), true, None)
                .await;
            // A completed code login also forgives prior login failures.
            state
                .rate_limiter
                .record_attempt("login", &ip, ctx.user_agent.as_deref(), true, None)
                .await;
            state
                .audit
                .log(
                    AuditEvent::new(event_type::EMAIL_VERIFIED, category::AUTHENTICATION)
                        .actor(user_id),
                    &ctx,
                )
                .await;
            Ok(Json(response))
        }
        Err(err) => {
            state
                .rate_limiter
                .record_attempt("verify_email", &ip, ctx.user_agent.as_deref(), false, None)
                .await;
            state
                .audit
                .log(
                    AuditEvent::new(
                        event_type::EMAIL_VERIFICATION_FAILED,
                        category::AUTHENTICATION,
                    )
                    .severity(severity::WARNING)
                    .data(json!({ "code": err.code() }))
                    .failed(),
                    &ctx,
                )
                .await;
            Err(err)
        }
    }
}

async fn verify_email_inner(
    state: &AppState,
    ctx: &AuditContext,
    payload: VerifyEmailRequest,
) -> ApiResult<(VerifyEmailResponse, Uuid)> {
    // Code-based lookup is primary; the opaque token is a compatibility
    // fallback used only when no code is supplied.
    let row = if let Some(code) = payload.code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(ApiError::InvalidCode);
        }
        verification::find_by_code(&state.pool, code)
            .await?
            .ok_or(ApiError::InvalidCode)?
    } else if let Some(token) = payload.token.as_deref().filter(|t| !t.is_empty()) {
        let vtype = payload
            .verification_type
            .as_deref()
            .and_then(VerificationType::parse)
            .unwrap_or(VerificationType::Signup);
        verification::find_by_token(&state.pool, token, vtype)
            .await?
            .ok_or(ApiError::InvalidToken)?
    } else {
        return Err(ApiError::Validation {
            field: "code",
            message: "a verification code or token is required".to_string(),
        });
    };

    if row.is_verified() {
        return Err(ApiError::AlreadyVerified);
    }
    if row.is_expired() {
        return Err(ApiError::ExpiredCode);
    }

    // Atomic consumption: a concurrent redemption of the same code loses.
    if !verification::claim(&state.pool, row.id).await? {
        return Err(ApiError::AlreadyVerified);
    }

    state.identity.confirm_email(row.user_id).await?;

    // First-time signup verification: lazily create the profile row and
    // send the welcome email. Both are cosmetic follow-ups; failures are
    // logged and do not fail the request.
    if row.verification_type == VerificationType::Signup.as_str() {
        if let Err(e) = sqlx::query(
            "INSERT INTO user_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(row.user_id)
        .execute(&state.pool)
        .await
        {
            tracing::warn!(user_id = %row.user_id, error = %e, "failed to create profile row");
        }
        state.mailer.send_welcome(&row.email, None).await;
    }

    let membership = default_membership(state, row.user_id).await?;
    let session = mint_session(
        &state.pool,
        &state.jwt_manager,
        row.user_id,
        &row.email,
        membership.as_ref().map(|m| m.family_id),
        membership
            .as_ref()
            .map(|m| m.member_role.as_str())
            .unwrap_or("member"),
        false,
        ctx,
    )
    .await?;

    Ok((
        VerifyEmailResponse {
            success: true,
            verified: true,
            session,
        },
        row.user_id,
    ))
}

pub(crate) async fn default_membership(
    state: &AppState,
    user_id: Uuid,
) -> ApiResult<Option<DefaultMembershipRow>> {
    let row = sqlx::query_as::<_, DefaultMembershipRow>(
        r#"
        SELECT family_id, member_role
        FROM family_memberships
        WHERE user_id = $1 AND is_default_family
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?;
    Ok(row)
}

/// POST /api/auth/login: request a one-time sign-in code.
///
/// Always returns the same generic body whether or not the account
/// exists; only the audit log records the real outcome.
pub async fn request_login_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<GenericResponse>> {
    let ip = rate_limit_key(&headers);
    let ctx = audit_context(&headers);

    if let hearthside_shared::RateLimitResult::Limited { retry_after } =
        state.rate_limiter.check("login_code", &ip).await
    {
        return Err(ApiError::RateLimited { retry_after });
    }

    let email = require_valid_email(&payload.email)?;

    let found = state.identity.find_user_by_email(&email).await?;
    if let Some(user) = &found {
        let issued =
            verification::issue(&state.pool, user.id, &email, VerificationType::Login).await?;
        state.mailer.send_verification_code(&email, &issued.code).await;
    }

    // Recorded as success regardless of whether the account exists, so
    // limiter state cannot be used to probe for accounts.
    state
        .rate_limiter
        .record_attempt("login_code", &ip, ctx.user_agent.as_deref(), true, Some(&email))
        .await;
    state
        .audit
        .log(
            AuditEvent::new(event_type::LOGIN_CODE_REQUESTED, category::AUTHENTICATION)
                .data(json!({ "email": email, "account_exists": found.is_some() })),
            &ctx,
        )
        .await;

    Ok(Json(GenericResponse {
        success: true,
        message: "If an account exists for that address, a sign-in code has been sent.",
    }))
}

/// POST /api/auth/resend-verification
pub async fn resend_verification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ResendVerificationRequest>,
) -> ApiResult<Json<GenericResponse>> {
    let ip = rate_limit_key(&headers);
    let ctx = audit_context(&headers);

    if let hearthside_shared::RateLimitResult::Limited { retry_after } =
        state.rate_limiter.check("resend_verification", &ip).await
    {
        return Err(ApiError::RateLimited { retry_after });
    }

    let email = require_valid_email(&payload.email)?;

    if let Some(user) = state.identity.find_user_by_email(&email).await? {
        // Only resend while a verification is actually pending.
        if verification::latest_pending(&state.pool, user.id, VerificationType::Signup)
            .await?
            .is_some()
        {
            let issued =
                verification::issue(&state.pool, user.id, &email, VerificationType::Signup).await?;
            state.mailer.send_verification_code(&email, &issued.code).await;
            state
                .audit
                .log(
                    AuditEvent::new(event_type::VERIFICATION_RESENT, category::AUTHENTICATION)
                        .actor(user.id),
                    &ctx,
                )
                .await;
        }
    }

    state
        .rate_limiter
        .record_attempt(
            "resend_verification",
            &ip,
            ctx.user_agent.as_deref(),
            true,
            Some(&email),
        )
        .await;

    Ok(Json(GenericResponse {
        success: true,
        message: "If a verification is pending for that address, a new code has been sent.",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Duration, OffsetDateTime};

    fn invitation(email: Option<&str>) -> AuthTokenRow {
        AuthTokenRow {
            id: Uuid::new_v4(),
            token_type: "family_invitation".into(),
            status: "active".into(),
            user_id: None,
            email: email.map(String::from),
            family_id: Some(Uuid::new_v4()),
            member_role: Some("member".into()),
            relationship: Some("grandparent".into()),
            expires_at: OffsetDateTime::now_utc() + Duration::days(7),
            max_uses: 1,
            use_count: 0,
            metadata: json!({}),
        }
    }

    #[test]
    fn invitation_email_must_match_signup_email() {
        let row = invitation(Some("invited@example.com"));
        let err = check_invitation(&row, "someone-else@example.com").unwrap_err();
        assert!(matches!(err, ApiError::InvitationEmailMismatch));
        assert!(check_invitation(&row, "invited@example.com").is_ok());
    }

    #[test]
    fn invitation_without_target_email_matches_anyone() {
        let row = invitation(None);
        assert!(check_invitation(&row, "anyone@example.com").is_ok());
    }

    #[test]
    fn expired_invitation_is_a_distinct_error() {
        let mut row = invitation(None);
        row.expires_at = OffsetDateTime::now_utc() - Duration::hours(1);
        assert!(matches!(
            check_invitation(&row, "x@example.com").unwrap_err(),
            ApiError::ExpiredToken
        ));
    }

    #[test]
    fn spent_invitation_is_a_distinct_error() {
        let mut row = invitation(None);
        row.use_count = 1;
        assert!(matches!(
            check_invitation(&row, "x@example.com").unwrap_err(),
            ApiError::TokenUsed
        ));
    }

    #[test]
    fn revoked_invitation_reads_as_invalid() {
        let mut row = invitation(None);
        row.status = "revoked".into();
        assert!(matches!(
            check_invitation(&row, "x@example.com").unwrap_err(),
            ApiError::InvalidToken
        ));
    }
}
