//! Account recovery handlers
//!
//! Two recovery paths converge on the same externally observable
//! behavior so responses cannot be used to enumerate accounts:
//!
//! - forgot-password and the backup-email path always return the same
//!   generic 200 body whether or not the account exists
//! - recovery-code redemption returns one identical error for unknown
//!   emails and wrong codes
//!
//! Only the server-side audit log distinguishes the real outcomes.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::Duration;

use crate::audit::AuditEvent;
use crate::audit_constants::{category, event_type, severity};
use crate::auth::codes::verify_recovery_code;
use crate::auth::sessions::{mint_session, revoke_all_sessions, SessionPayload};
use crate::auth::tokens::{self, NewToken, TokenKind};
use crate::auth::verification::{self, VerificationType};
use crate::auth::recovery_codes;
use crate::error::{ApiError, ApiResult};
use crate::routes::{audit_context, rate_limit_key};
use crate::state::AppState;
use crate::validation::require_valid_email;

/// Password-reset links expire after an hour.
const RESET_TOKEN_TTL_HOURS: i64 = 1;

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenericRecoveryResponse {
    pub success: bool,
    pub message: &'static str,
}

/// The one body every forgot-password request receives.
pub const RECOVERY_SENT_MESSAGE: &str =
    "If an account exists for that address, a recovery email has been sent.";

#[derive(Debug, Deserialize)]
pub struct RecoverRequest {
    pub email: String,
    pub recovery_code: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize)]
pub struct RecoverResponse {
    pub success: bool,
    pub session: SessionPayload,
    /// The replacement code, displayed once. The redeemed code is retired.
    pub recovery_code: String,
    pub recovery_code_hint: String,
}

#[derive(Debug, Deserialize)]
pub struct BackupEmailRequest {
    pub email: String,
}

/// POST /api/auth/forgot-password
///
/// Always 200 with [`RECOVERY_SENT_MESSAGE`]. The limiter records every
/// request as a success so its state is identical for existing and
/// non-existing accounts.
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<GenericRecoveryResponse>> {
    let ip = rate_limit_key(&headers);
    let ctx = audit_context(&headers);

    if let hearthside_shared::RateLimitResult::Limited { retry_after } =
        state.rate_limiter.check("forgot_password", &ip).await
    {
        return Err(ApiError::RateLimited { retry_after });
    }

    let email = require_valid_email(&payload.email)?;

    let found = state.identity.find_user_by_email(&email).await;
    let user = match found {
        Ok(user) => user,
        Err(e) => {
            // Even a provider outage must not change the response shape.
            tracing::error!(error = %e, "provider lookup failed during forgot-password");
            None
        }
    };

    if let Some(user) = &user {
        let (_, raw_token) = tokens::create(
            &state.pool,
            TokenKind::PasswordReset,
            NewToken {
                user_id: Some(user.id),
                email: Some(&email),
                ttl: Duration::hours(RESET_TOKEN_TTL_HOURS),
                max_uses: 1,
                metadata: json!({ "redirect_url": payload.redirect_url }),
                ..NewToken::default()
            },
        )
        .await?;
        state
            .mailer
            .send_reset_link(&email, &raw_token, payload.redirect_url.as_deref())
            .await;
    }

    state
        .rate_limiter
        .record_attempt("forgot_password", &ip, ctx.user_agent.as_deref(), true, Some(&email))
        .await;
    state
        .audit
        .log(
            AuditEvent::new(event_type::PASSWORD_RESET_REQUESTED, category::ACCOUNT_RECOVERY)
                .data(json!({ "email": email, "account_exists": user.is_some() })),
            &ctx,
        )
        .await;

    Ok(Json(GenericRecoveryResponse {
        success: true,
        message: RECOVERY_SENT_MESSAGE,
    }))
}

/// POST /api/auth/recover: redeem a recovery code.
///
/// Unknown email, missing code row, wrong code, and expired code all
/// produce the identical `invalid_recovery_code` error. On success the
/// redeemed code is retired, a replacement is issued (returned once),
/// all other sessions are revoked, and a fresh session is minted.
pub async fn recover(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RecoverRequest>,
) -> ApiResult<Json<RecoverResponse>> {
    let ip = rate_limit_key(&headers);
    let ctx = audit_context(&headers);

    if let hearthside_shared::RateLimitResult::Limited { retry_after } =
        state.rate_limiter.check("recover", &ip).await
    {
        return Err(ApiError::RateLimited { retry_after });
    }

    let email = require_valid_email(&payload.email)?;

    let verified_user = match state.identity.find_user_by_email(&email).await? {
        Some(user) => {
            let row = recovery_codes::active_for_user(&state.pool, user.id).await?;
            match row {
                Some(row)
                    if !row.is_expired()
                        && verify_recovery_code(&payload.recovery_code, &row.code_hash) =>
                {
                    Some(user)
                }
                _ => None,
            }
        }
        None => None,
    };

    let Some(user) = verified_user else {
        state
            .rate_limiter
            .record_attempt("recover", &ip, ctx.user_agent.as_deref(), false, Some(&email))
            .await;
        state
            .audit
            .log(
                AuditEvent::new(event_type::RECOVERY_CODE_REJECTED, category::ACCOUNT_RECOVERY)
                    .severity(severity::WARNING)
                    .data(json!({ "email": email }))
                    .failed(),
                &ctx,
            )
            .await;
        return Err(ApiError::InvalidRecoveryCode);
    };

    // The redeemed code is single-use: issue() retires it and returns the
    // replacement shown to the user exactly once.
    let replacement = recovery_codes::issue(&state.pool, user.id).await?;

    revoke_all_sessions(&state.pool, user.id, "recovery_code_redeemed").await?;

    let membership = crate::routes::auth::default_membership(&state, user.id).await?;
    let session = mint_session(
        &state.pool,
        &state.jwt_manager,
        user.id,
        &email,
        membership.as_ref().map(|m| m.family_id),
        membership
            .as_ref()
            .map(|m| m.member_role.as_str())
            .unwrap_or("member"),
        payload.remember_me,
        &ctx,
    )
    .await?;

    state
        .rate_limiter
        .record_attempt("recover", &ip, ctx.user_agent.as_deref(), true, Some(&email))
        .await;
    state
        .audit
        .log(
            AuditEvent::new(event_type::RECOVERY_CODE_REDEEMED, category::ACCOUNT_RECOVERY)
                .actor(user.id),
            &ctx,
        )
        .await;

    Ok(Json(RecoverResponse {
        success: true,
        session,
        recovery_code: replacement.code,
        recovery_code_hint: replacement.hint,
    }))
}

/// POST /api/auth/recover/backup-email
///
/// Issues a short-lived sign-in code to the account's backup address.
/// Always the generic 200, whether or not the account or backup address
/// exists.
pub async fn backup_email_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BackupEmailRequest>,
) -> ApiResult<Json<GenericRecoveryResponse>> {
    let ip = rate_limit_key(&headers);
    let ctx = audit_context(&headers);

    if let hearthside_shared::RateLimitResult::Limited { retry_after } =
        state.rate_limiter.check("recover_backup_email", &ip).await
    {
        return Err(ApiError::RateLimited { retry_after });
    }

    let email = require_valid_email(&payload.email)?;

    let mut code_sent = false;
    if let Some(user) = state.identity.find_user_by_email(&email).await? {
        let backup_email: Option<String> = sqlx::query_scalar(
            "SELECT backup_email FROM user_profiles WHERE user_id = $1",
        )
        .bind(user.id)
        .fetch_optional(&state.pool)
        .await?
        .flatten();

        if let Some(backup) = backup_email {
            let issued =
                verification::issue(&state.pool, user.id, &email, VerificationType::Login).await?;
            code_sent = state.mailer.send_verification_code(&backup, &issued.code).await;
            state
                .audit
                .log(
                    AuditEvent::new(event_type::BACKUP_EMAIL_CODE_SENT, category::ACCOUNT_RECOVERY)
                        .actor(user.id)
                        .data(json!({ "code_sent": code_sent })),
                    &ctx,
                )
                .await;
        }
    }

    state
        .rate_limiter
        .record_attempt(
            "recover_backup_email",
            &ip,
            ctx.user_agent.as_deref(),
            true,
            Some(&email),
        )
        .await;

    Ok(Json(GenericRecoveryResponse {
        success: true,
        message: RECOVERY_SENT_MESSAGE,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_response_is_identical_for_all_outcomes() {
        // The enumeration-safety property: both branches of
        // forgot-password serialize to exactly the same bytes.
        let exists = GenericRecoveryResponse {
            success: true,
            message: RECOVERY_SENT_MESSAGE,
        };
        let missing = GenericRecoveryResponse {
            success: true,
            message: RECOVERY_SENT_MESSAGE,
        };
        assert_eq!(
            serde_json::to_string(&exists).unwrap(),
            serde_json::to_string(&missing).unwrap()
        );
    }
}
