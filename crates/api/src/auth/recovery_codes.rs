//! Recovery code storage
//!
//! One active code per user, argon2-hashed at rest with a 3-character
//! display hint. Regeneration supersedes: the old row is deactivated and
//! a new row inserted, never mutated in place. The plaintext code exists
//! only in the one-time response payload returned at creation.

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::auth::codes::{generate_recovery_code, hash_recovery_code, recovery_code_hint};
use crate::error::ApiResult;

/// Recovery codes are long-lived secondary credentials.
pub const RECOVERY_CODE_TTL_DAYS: i64 = 2 * 365;

#[derive(Debug, sqlx::FromRow)]
pub struct RecoveryCodeRow {
    pub id: Uuid,
    pub code_hash: String,
    pub hint: String,
    pub expires_at: OffsetDateTime,
}

/// A freshly issued code: the plaintext for the one-time response.
#[derive(Debug)]
pub struct IssuedRecoveryCode {
    pub code: String,
    pub hint: String,
}

/// Deactivate any existing active code and insert a fresh one.
pub async fn issue(pool: &PgPool, user_id: Uuid) -> ApiResult<IssuedRecoveryCode> {
    let code = generate_recovery_code();
    let hint = recovery_code_hint(&code);
    let code_hash = hash_recovery_code(&code)?;
    let expires_at = OffsetDateTime::now_utc() + Duration::days(RECOVERY_CODE_TTL_DAYS);

    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE recovery_codes SET active = FALSE WHERE user_id = $1 AND active")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO recovery_codes (user_id, code_hash, hint, expires_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(user_id)
    .bind(&code_hash)
    .bind(&hint)
    .bind(expires_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(IssuedRecoveryCode { code, hint })
}

/// The user's current active code, if any.
pub async fn active_for_user(pool: &PgPool, user_id: Uuid) -> ApiResult<Option<RecoveryCodeRow>> {
    let row = sqlx::query_as::<_, RecoveryCodeRow>(
        r#"
        SELECT id, code_hash, hint, expires_at
        FROM recovery_codes
        WHERE user_id = $1 AND active
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

impl RecoveryCodeRow {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= OffsetDateTime::now_utc()
    }
}
