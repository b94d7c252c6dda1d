//! Session persistence
//!
//! Every issued JWT pair is tracked in `user_sessions` by jti so tokens
//! can be revoked before expiry and so the client can query when its
//! session ends. The refresh row is the parent session; the access row
//! links to it. Minting a session never involves a password: it happens
//! after a verification or recovery code redeems.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::audit::AuditContext;
use crate::auth::jwt::JwtManager;
use crate::error::{ApiError, ApiResult};

/// Maximum concurrent refresh sessions per user; the oldest is revoked
/// beyond this.
const MAX_SESSIONS_PER_USER: i64 = 10;

/// The session body returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct SessionPayload {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
    pub remember_me: bool,
}

/// Mint a fresh access/refresh pair and persist both rows.
pub async fn mint_session(
    pool: &PgPool,
    jwt: &JwtManager,
    user_id: Uuid,
    email: &str,
    family_id: Option<Uuid>,
    role: &str,
    remember_me: bool,
    ctx: &AuditContext,
) -> ApiResult<SessionPayload> {
    let access = jwt
        .generate_access_token(user_id, email, family_id, role)
        .map_err(|e| {
            tracing::error!(error = %e, "failed to sign access token");
            ApiError::Internal
        })?;
    let refresh = jwt
        .generate_refresh_token(user_id, email, family_id, role, remember_me)
        .map_err(|e| {
            tracing::error!(error = %e, "failed to sign refresh token");
            ApiError::Internal
        })?;

    save_session_pair(
        pool,
        user_id,
        &access.jti,
        access.expires_at,
        &refresh.jti,
        refresh.expires_at,
        remember_me,
        ctx,
    )
    .await?;

    Ok(SessionPayload {
        access_token: access.token,
        refresh_token: refresh.token,
        expires_at: access.expires_at,
        refresh_expires_at: refresh.expires_at,
        remember_me,
    })
}

/// Persist a refresh/access pair in one transaction, enforcing the
/// per-user session cap by revoking the oldest refresh session.
#[allow(clippy::too_many_arguments)]
async fn save_session_pair(
    pool: &PgPool,
    user_id: Uuid,
    access_jti: &str,
    access_expires_at: OffsetDateTime,
    refresh_jti: &str,
    refresh_expires_at: OffsetDateTime,
    remember_me: bool,
    ctx: &AuditContext,
) -> ApiResult<()> {
    let mut tx = pool.begin().await?;

    let session_count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM user_sessions
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND expires_at > NOW()
          AND token_type = 'refresh'
        "#,
    )
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    if session_count.0 >= MAX_SESSIONS_PER_USER {
        tracing::info!(
            user_id = %user_id,
            current_sessions = session_count.0,
            "revoking oldest session, per-user cap reached"
        );
        sqlx::query(
            r#"
            UPDATE user_sessions
            SET revoked_at = NOW(),
                revocation_reason = 'max_sessions_exceeded'
            WHERE id IN (
                SELECT id FROM user_sessions
                WHERE user_id = $1
                  AND revoked_at IS NULL
                  AND token_type = 'refresh'
                ORDER BY created_at ASC
                LIMIT 1
            )
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    }

    let refresh_session_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO user_sessions (
            user_id, jti, token_type, remember_me, expires_at, ip_address, user_agent
        ) VALUES ($1, $2, 'refresh', $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(refresh_jti)
    .bind(remember_me)
    .bind(refresh_expires_at)
    .bind(&ctx.ip_address)
    .bind(&ctx.user_agent)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO user_sessions (
            user_id, jti, token_type, remember_me, expires_at,
            ip_address, user_agent, parent_session_id
        ) VALUES ($1, $2, 'access', $3, $4, $5, $6, $7)
        "#,
    )
    .bind(user_id)
    .bind(access_jti)
    .bind(remember_me)
    .bind(access_expires_at)
    .bind(&ctx.ip_address)
    .bind(&ctx.user_agent)
    .bind(refresh_session_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Check that a jti belongs to the expected user and is neither revoked
/// nor expired. Called by the auth middleware on every request.
pub async fn is_session_valid(pool: &PgPool, jti: &str, expected_user_id: Uuid) -> ApiResult<bool> {
    let result: Option<(bool,)> = sqlx::query_as(
        r#"
        SELECT TRUE
        FROM user_sessions
        WHERE jti = $1
          AND user_id = $2
          AND revoked_at IS NULL
          AND expires_at > NOW()
        "#,
    )
    .bind(jti)
    .bind(expected_user_id)
    .fetch_optional(pool)
    .await?;

    Ok(result.is_some())
}

/// Session expiry metadata for the client's lifecycle timers.
#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct SessionExpiry {
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub remember_me: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub async fn session_expiry(pool: &PgPool, jti: &str) -> ApiResult<Option<SessionExpiry>> {
    let row = sqlx::query_as::<_, SessionExpiry>(
        r#"
        SELECT expires_at, remember_me, created_at
        FROM user_sessions
        WHERE jti = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(jti)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Persist a rotated access token under an existing refresh session.
pub async fn save_access_rotation(
    pool: &PgPool,
    user_id: Uuid,
    access_jti: &str,
    access_expires_at: OffsetDateTime,
    refresh_jti: &str,
    ctx: &AuditContext,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO user_sessions (
            user_id, jti, token_type, remember_me, expires_at,
            ip_address, user_agent, parent_session_id
        )
        SELECT $1, $2, 'access', parent.remember_me, $3, $4, $5, parent.id
        FROM user_sessions parent
        WHERE parent.jti = $6
        "#,
    )
    .bind(user_id)
    .bind(access_jti)
    .bind(access_expires_at)
    .bind(&ctx.ip_address)
    .bind(&ctx.user_agent)
    .bind(refresh_jti)
    .execute(pool)
    .await?;
    Ok(())
}

/// Revoke a session, its parent refresh session, and all siblings.
/// Used by logout.
pub async fn revoke_session_family(pool: &PgPool, jti: &str, reason: &str) -> ApiResult<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE user_sessions
        SET revoked_at = NOW(),
            revocation_reason = $2
        WHERE revoked_at IS NULL
          AND (
            jti = $1
            OR id = (SELECT parent_session_id FROM user_sessions WHERE jti = $1)
            OR parent_session_id = (SELECT parent_session_id FROM user_sessions WHERE jti = $1)
            OR parent_session_id = (SELECT id FROM user_sessions WHERE jti = $1)
          )
        "#,
    )
    .bind(jti)
    .bind(reason)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// Revoke one session and any child access sessions.
pub async fn revoke_session(pool: &PgPool, jti: &str, reason: &str) -> ApiResult<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE user_sessions
        SET revoked_at = NOW(),
            revocation_reason = $2
        WHERE revoked_at IS NULL
          AND (jti = $1 OR parent_session_id = (
                SELECT id FROM user_sessions WHERE jti = $1
          ))
        "#,
    )
    .bind(jti)
    .bind(reason)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// Revoke every live session for a user (recovery-code redemption,
/// security incident).
pub async fn revoke_all_sessions(pool: &PgPool, user_id: Uuid, reason: &str) -> ApiResult<u64> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE user_sessions
        SET revoked_at = NOW(),
            revocation_reason = $2
        WHERE user_id = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(user_id)
    .bind(reason)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cap_is_ten() {
        assert_eq!(MAX_SESSIONS_PER_USER, 10);
    }

    #[test]
    fn session_payload_serializes_rfc3339() {
        let payload = SessionPayload {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: OffsetDateTime::from_unix_timestamp(1_767_225_600).unwrap(),
            refresh_expires_at: OffsetDateTime::from_unix_timestamp(1_767_398_400).unwrap(),
            remember_me: false,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["expires_at"], "2026-01-01T00:00:00Z");
        assert!(!json["remember_me"].as_bool().unwrap());
    }
}
