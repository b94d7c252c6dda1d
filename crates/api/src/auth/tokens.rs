//! Single-use and multi-use auth tokens
//!
//! Generic token rows backing emailed links: password resets, family
//! invitations, magic links. Only the sha256 digest of a token is ever
//! stored; the raw value exists once, in the email.
//!
//! Consumption uses a conditional-UPDATE claim so two concurrent
//! redemptions of the same token cannot both succeed: the statement only
//! matches while the row is still active, unexpired, and under its use
//! cap, and the loser of the race matches zero rows.

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::auth::codes::{generate_opaque_token, hash_token};
use crate::error::ApiResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    PasswordReset,
    FamilyInvitation,
    MagicLink,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::PasswordReset => "password_reset",
            TokenKind::FamilyInvitation => "family_invitation",
            TokenKind::MagicLink => "magic_link",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthTokenRow {
    pub id: Uuid,
    pub token_type: String,
    pub status: String,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub family_id: Option<Uuid>,
    pub member_role: Option<String>,
    pub relationship: Option<String>,
    pub expires_at: OffsetDateTime,
    pub max_uses: i32,
    pub use_count: i32,
    pub metadata: serde_json::Value,
}

const TOKEN_COLUMNS: &str = "id, token_type, status, user_id, email, family_id, \
     member_role, relationship, expires_at, max_uses, use_count, metadata";

/// Parameters for a new token row.
#[derive(Debug)]
pub struct NewToken<'a> {
    pub user_id: Option<Uuid>,
    pub email: Option<&'a str>,
    pub family_id: Option<Uuid>,
    pub member_role: Option<&'a str>,
    pub relationship: Option<&'a str>,
    pub ttl: Duration,
    pub max_uses: i32,
    pub metadata: serde_json::Value,
}

impl Default for NewToken<'_> {
    fn default() -> Self {
        Self {
            user_id: None,
            email: None,
            family_id: None,
            member_role: None,
            relationship: None,
            ttl: Duration::ZERO,
            max_uses: 1,
            metadata: serde_json::json!({}),
        }
    }
}

/// Insert a token row; returns the row id and the raw token for the
/// email. The raw value is not recoverable afterwards.
pub async fn create(pool: &PgPool, kind: TokenKind, params: NewToken<'_>) -> ApiResult<(Uuid, String)> {
    let token = generate_opaque_token();
    let expires_at = OffsetDateTime::now_utc() + params.ttl;
    let max_uses = params.max_uses.max(1);

    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO auth_tokens (
            token_hash, token_type, user_id, email, family_id,
            member_role, relationship, expires_at, max_uses, metadata
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id
        "#,
    )
    .bind(&token.hash)
    .bind(kind.as_str())
    .bind(params.user_id)
    .bind(params.email)
    .bind(params.family_id)
    .bind(params.member_role)
    .bind(params.relationship)
    .bind(expires_at)
    .bind(max_uses)
    .bind(&params.metadata)
    .fetch_one(pool)
    .await?;

    Ok((id, token.raw))
}

/// Look up a token row by its raw value, regardless of status, so the
/// caller can report invalid vs expired vs used distinctly.
pub async fn find_by_raw(
    pool: &PgPool,
    raw: &str,
    kind: TokenKind,
) -> ApiResult<Option<AuthTokenRow>> {
    let row = sqlx::query_as::<_, AuthTokenRow>(&format!(
        r#"
        SELECT {TOKEN_COLUMNS}
        FROM auth_tokens
        WHERE token_hash = $1 AND token_type = $2
        "#
    ))
    .bind(hash_token(raw))
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_by_id(
    pool: &PgPool,
    id: Uuid,
    kind: TokenKind,
) -> ApiResult<Option<AuthTokenRow>> {
    let row = sqlx::query_as::<_, AuthTokenRow>(&format!(
        r#"
        SELECT {TOKEN_COLUMNS}
        FROM auth_tokens
        WHERE id = $1 AND token_type = $2
        "#
    ))
    .bind(id)
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Atomically consume one use. Returns false if the token was already
/// spent, expired, or revoked by the time the claim ran.
pub async fn claim(pool: &PgPool, id: Uuid) -> ApiResult<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE auth_tokens
        SET use_count = use_count + 1,
            used_at = NOW(),
            status = CASE WHEN use_count + 1 >= max_uses THEN 'used' ELSE status END
        WHERE id = $1
          AND status = 'active'
          AND expires_at > NOW()
          AND use_count < max_uses
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// Revoke an active token (invitation withdrawal).
pub async fn revoke(pool: &PgPool, id: Uuid) -> ApiResult<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE auth_tokens
        SET status = 'revoked'
        WHERE id = $1 AND status = 'active'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// Rotate an active token for resending: only the digest is stored, so a
/// resend mints a fresh raw value and extends the expiry. Returns the
/// new raw token, or None if the token is no longer active.
pub async fn rotate(pool: &PgPool, id: Uuid, ttl: Duration) -> ApiResult<Option<String>> {
    let token = generate_opaque_token();
    let expires_at = OffsetDateTime::now_utc() + ttl;

    let rows_affected = sqlx::query(
        r#"
        UPDATE auth_tokens
        SET token_hash = $2,
            expires_at = $3
        WHERE id = $1 AND status = 'active'
        "#,
    )
    .bind(id)
    .bind(&token.hash)
    .bind(expires_at)
    .execute(pool)
    .await?
    .rows_affected();

    Ok((rows_affected > 0).then_some(token.raw))
}

impl AuthTokenRow {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= OffsetDateTime::now_utc()
    }

    pub fn is_spent(&self) -> bool {
        self.status == "used" || self.use_count >= self.max_uses
    }

    pub fn is_active(&self) -> bool {
        self.status == "active" && !self.is_expired() && !self.is_spent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, expires_in: Duration, use_count: i32, max_uses: i32) -> AuthTokenRow {
        AuthTokenRow {
            id: Uuid::new_v4(),
            token_type: "family_invitation".into(),
            status: status.into(),
            user_id: None,
            email: Some("invited@example.com".into()),
            family_id: Some(Uuid::new_v4()),
            member_role: Some("member".into()),
            relationship: None,
            expires_at: OffsetDateTime::now_utc() + expires_in,
            max_uses,
            use_count,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn kind_strings_match_schema_values() {
        assert_eq!(TokenKind::PasswordReset.as_str(), "password_reset");
        assert_eq!(TokenKind::FamilyInvitation.as_str(), "family_invitation");
        assert_eq!(TokenKind::MagicLink.as_str(), "magic_link");
    }

    #[test]
    fn active_token_is_active() {
        assert!(row("active", Duration::hours(1), 0, 1).is_active());
    }

    #[test]
    fn expired_token_is_not_active() {
        let r = row("active", Duration::hours(-1), 0, 1);
        assert!(r.is_expired());
        assert!(!r.is_active());
    }

    #[test]
    fn spent_token_is_not_active() {
        let r = row("used", Duration::hours(1), 1, 1);
        assert!(r.is_spent());
        assert!(!r.is_active());
    }

    #[test]
    fn multi_use_token_stays_active_under_cap() {
        let r = row("active", Duration::hours(1), 3, 5);
        assert!(!r.is_spent());
        assert!(r.is_active());
    }
}
