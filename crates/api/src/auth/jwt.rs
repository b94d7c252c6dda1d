//! Session JWT issuance and validation
//!
//! Sessions are passwordless: tokens are minted after a verification
//! code or recovery code redeems, never from a password check. Each
//! token carries a jti that is persisted in `user_sessions` so it can be
//! revoked before expiry.
//!
//! Refresh lifetimes are capped by the Remember-Me ceilings: 48 hours
//! without Remember-Me, 7 days with it.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

pub const REFRESH_CEILING_HOURS: i64 = 48;
pub const REMEMBER_ME_CEILING_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Provider user id
    pub sub: Uuid,
    pub email: String,
    /// The user's default family at issuance time
    pub family_id: Option<Uuid>,
    pub role: String,
    pub jti: String,
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly minted token plus the metadata persisted alongside it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str, access_expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_expiry_hours,
        }
    }

    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        email: &str,
        family_id: Option<Uuid>,
        role: &str,
    ) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
        self.generate(
            user_id,
            email,
            family_id,
            role,
            TokenType::Access,
            Duration::hours(self.access_expiry_hours),
        )
    }

    /// Access token whose expiry never passes `cap` (the parent refresh
    /// session's expiry). Used by the refresh endpoint so rotation cannot
    /// extend a session past its ceiling.
    pub fn generate_access_token_capped(
        &self,
        user_id: Uuid,
        email: &str,
        family_id: Option<Uuid>,
        role: &str,
        cap: OffsetDateTime,
    ) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
        let default_lifetime = Duration::hours(self.access_expiry_hours);
        let to_cap = cap - OffsetDateTime::now_utc();
        let lifetime = default_lifetime.min(to_cap).max(Duration::ZERO);
        self.generate(user_id, email, family_id, role, TokenType::Access, lifetime)
    }

    pub fn generate_refresh_token(
        &self,
        user_id: Uuid,
        email: &str,
        family_id: Option<Uuid>,
        role: &str,
        remember_me: bool,
    ) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
        let lifetime = if remember_me {
            Duration::days(REMEMBER_ME_CEILING_DAYS)
        } else {
            Duration::hours(REFRESH_CEILING_HOURS)
        };
        self.generate(user_id, email, family_id, role, TokenType::Refresh, lifetime)
    }

    fn generate(
        &self,
        user_id: Uuid,
        email: &str,
        family_id: Option<Uuid>,
        role: &str,
        token_type: TokenType,
        lifetime: Duration,
    ) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
        let now = OffsetDateTime::now_utc();
        let expires_at = now + lifetime;
        let jti = Uuid::new_v4().to_string();
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            family_id,
            role: role.to_string(),
            jti: jti.clone(),
            token_type,
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(IssuedToken {
            token,
            jti,
            expires_at,
        })
    }

    pub fn validate_access_token(
        &self,
        token: &str,
    ) -> Result<Claims, jsonwebtoken::errors::Error> {
        self.validate(token, TokenType::Access)
    }

    pub fn validate_refresh_token(
        &self,
        token: &str,
    ) -> Result<Claims, jsonwebtoken::errors::Error> {
        self.validate(token, TokenType::Refresh)
    }

    fn validate(
        &self,
        token: &str,
        expected: TokenType,
    ) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )?;
        if data.claims.token_type != expected {
            return Err(jsonwebtoken::errors::ErrorKind::InvalidToken.into());
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new("test-jwt-secret-key-for-testing-only", 1)
    }

    #[test]
    fn access_token_round_trips() {
        let m = manager();
        let user_id = Uuid::new_v4();
        let family_id = Uuid::new_v4();
        let issued = m
            .generate_access_token(user_id, "test@example.com", Some(family_id), "coordinator")
            .unwrap();

        let claims = m.validate_access_token(&issued.token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.family_id, Some(family_id));
        assert_eq!(claims.role, "coordinator");
        assert_eq!(claims.jti, issued.jti);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issued = manager()
            .generate_access_token(Uuid::new_v4(), "x@example.com", None, "member")
            .unwrap();
        let other = JwtManager::new("a-different-secret", 1);
        assert!(other.validate_access_token(&issued.token).is_err());
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let m = manager();
        let issued = m
            .generate_refresh_token(Uuid::new_v4(), "x@example.com", None, "member", false)
            .unwrap();
        assert!(m.validate_access_token(&issued.token).is_err());
        assert!(m.validate_refresh_token(&issued.token).is_ok());
    }

    #[test]
    fn refresh_ceiling_without_remember_me_is_48_hours() {
        let issued = manager()
            .generate_refresh_token(Uuid::new_v4(), "x@example.com", None, "member", false)
            .unwrap();
        let lifetime = issued.expires_at - OffsetDateTime::now_utc();
        assert!(lifetime <= Duration::hours(REFRESH_CEILING_HOURS));
        assert!(lifetime > Duration::hours(REFRESH_CEILING_HOURS) - Duration::minutes(1));
    }

    #[test]
    fn refresh_ceiling_with_remember_me_is_7_days() {
        let issued = manager()
            .generate_refresh_token(Uuid::new_v4(), "x@example.com", None, "member", true)
            .unwrap();
        let lifetime = issued.expires_at - OffsetDateTime::now_utc();
        assert!(lifetime <= Duration::days(REMEMBER_ME_CEILING_DAYS));
        assert!(lifetime > Duration::days(REMEMBER_ME_CEILING_DAYS) - Duration::minutes(1));
    }
}
