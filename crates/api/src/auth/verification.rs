//! Email verification records
//!
//! A verification is a six-digit display code plus a legacy opaque token
//! (kept for older email templates that link instead of showing a code).
//! Records are single-use via `verified_at` and expire after 15 minutes;
//! consumed and expired rows are retained for audit, never deleted.
//!
//! Code lookup is the primary path; token lookup is a compatibility
//! fallback used only when the request carries no code.

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::auth::codes::{generate_opaque_token, generate_verification_code, hash_token};
use crate::error::ApiResult;

pub const VERIFICATION_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    Signup,
    EmailChange,
    Login,
}

impl VerificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationType::Signup => "signup",
            VerificationType::EmailChange => "email_change",
            VerificationType::Login => "login",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "signup" => Some(VerificationType::Signup),
            "email_change" => Some(VerificationType::EmailChange),
            "login" => Some(VerificationType::Login),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VerificationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub code: String,
    pub verification_type: String,
    pub expires_at: OffsetDateTime,
    pub verified_at: Option<OffsetDateTime>,
}

const VERIFICATION_COLUMNS: &str =
    "id, user_id, email, code, verification_type, expires_at, verified_at";

/// A freshly issued verification: the code and raw token for the email.
#[derive(Debug)]
pub struct IssuedVerification {
    pub id: Uuid,
    pub code: String,
    pub raw_token: String,
    pub expires_at: OffsetDateTime,
}

/// Create a verification record for a user/email pair.
pub async fn issue(
    pool: &PgPool,
    user_id: Uuid,
    email: &str,
    verification_type: VerificationType,
) -> ApiResult<IssuedVerification> {
    let code = generate_verification_code();
    let token = generate_opaque_token();
    let expires_at = OffsetDateTime::now_utc() + Duration::minutes(VERIFICATION_TTL_MINUTES);

    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO email_verifications (
            user_id, email, code, token_hash, verification_type, expires_at
        ) VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(email)
    .bind(&code)
    .bind(&token.hash)
    .bind(verification_type.as_str())
    .bind(expires_at)
    .fetch_one(pool)
    .await?;

    Ok(IssuedVerification {
        id,
        code,
        raw_token: token.raw,
        expires_at,
    })
}

/// Primary lookup: by exact code, newest record first, any status, so
/// the caller can report expired and already-verified distinctly.
pub async fn find_by_code(pool: &PgPool, code: &str) -> ApiResult<Option<VerificationRow>> {
    let row = sqlx::query_as::<_, VerificationRow>(&format!(
        r#"
        SELECT {VERIFICATION_COLUMNS}
        FROM email_verifications
        WHERE code = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#
    ))
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Compatibility fallback: by opaque token digest plus type.
pub async fn find_by_token(
    pool: &PgPool,
    raw_token: &str,
    verification_type: VerificationType,
) -> ApiResult<Option<VerificationRow>> {
    let row = sqlx::query_as::<_, VerificationRow>(&format!(
        r#"
        SELECT {VERIFICATION_COLUMNS}
        FROM email_verifications
        WHERE token_hash = $1 AND verification_type = $2
        ORDER BY created_at DESC
        LIMIT 1
        "#
    ))
    .bind(hash_token(raw_token))
    .bind(verification_type.as_str())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Atomically consume a verification. Returns false when another request
/// already set `verified_at`.
pub async fn claim(pool: &PgPool, id: Uuid) -> ApiResult<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE email_verifications
        SET verified_at = NOW()
        WHERE id = $1 AND verified_at IS NULL
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// Latest pending verification for a user, used by resend.
pub async fn latest_pending(
    pool: &PgPool,
    user_id: Uuid,
    verification_type: VerificationType,
) -> ApiResult<Option<VerificationRow>> {
    let row = sqlx::query_as::<_, VerificationRow>(&format!(
        r#"
        SELECT {VERIFICATION_COLUMNS}
        FROM email_verifications
        WHERE user_id = $1
          AND verification_type = $2
          AND verified_at IS NULL
        ORDER BY created_at DESC
        LIMIT 1
        "#
    ))
    .bind(user_id)
    .bind(verification_type.as_str())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

impl VerificationRow {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= OffsetDateTime::now_utc()
    }

    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_strings_round_trip() {
        for t in [
            VerificationType::Signup,
            VerificationType::EmailChange,
            VerificationType::Login,
        ] {
            assert_eq!(VerificationType::parse(t.as_str()), Some(t));
        }
        assert_eq!(VerificationType::parse("bogus"), None);
    }

    #[test]
    fn expiry_and_verified_checks() {
        let mut row = VerificationRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            email: "x@example.com".into(),
            code: "123456".into(),
            verification_type: "signup".into(),
            expires_at: OffsetDateTime::now_utc() + Duration::minutes(15),
            verified_at: None,
        };
        assert!(!row.is_expired());
        assert!(!row.is_verified());

        row.expires_at = OffsetDateTime::now_utc() - Duration::minutes(1);
        assert!(row.is_expired());

        row.verified_at = Some(OffsetDateTime::now_utc());
        assert!(row.is_verified());
    }
}
