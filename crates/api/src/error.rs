//! API error taxonomy
//!
//! Every failure a handler can return maps to a stable machine-readable
//! `code` plus a human-readable `error` message, rendered as
//! `{"success": false, "error": ..., "code": ...}`. Unexpected errors
//! (database, provider outages) collapse into a generic internal-error
//! body that never leaks internals.

use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::identity::ProviderError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation { field: &'static str, message: String },

    #[error("disposable email addresses are not allowed")]
    DisposableEmail,

    #[error("an account with this email already exists")]
    EmailExists,

    #[error("invalid verification code")]
    InvalidCode,

    #[error("verification code has expired")]
    ExpiredCode,

    #[error("this email has already been verified")]
    AlreadyVerified,

    #[error("invalid or unknown token")]
    InvalidToken,

    #[error("token has expired")]
    ExpiredToken,

    #[error("token has already been used")]
    TokenUsed,

    #[error("this invitation was issued for a different email address")]
    InvitationEmailMismatch,

    #[error("invalid recovery code")]
    InvalidRecoveryCode,

    #[error("authentication required")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("too many requests")]
    RateLimited { retry_after: Duration },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("internal server error")]
    Internal,

    #[error("internal server error")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    /// Stable machine-readable code for client branching.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "validation_error",
            ApiError::DisposableEmail => "disposable_email",
            ApiError::EmailExists => "email_exists",
            ApiError::InvalidCode => "invalid_code",
            ApiError::ExpiredCode => "expired_code",
            ApiError::AlreadyVerified => "already_verified",
            ApiError::InvalidToken => "invalid_token",
            ApiError::ExpiredToken => "expired_token",
            ApiError::TokenUsed => "token_used",
            ApiError::InvitationEmailMismatch => "invitation_email_mismatch",
            ApiError::InvalidRecoveryCode => "invalid_recovery_code",
            ApiError::Unauthorized => "unauthorized",
            ApiError::NotFound => "not_found",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Provider(e) => match e {
                ProviderError::EmailExists => "email_exists",
                ProviderError::InvalidEmail => "invalid_email",
                ProviderError::InvalidToken => "invalid_token",
                ProviderError::Unavailable(_) => "provider_unavailable",
            },
            ApiError::Internal | ApiError::Database(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. }
            | ApiError::DisposableEmail
            | ApiError::InvalidCode
            | ApiError::ExpiredCode
            | ApiError::AlreadyVerified
            | ApiError::InvalidToken
            | ApiError::ExpiredToken
            | ApiError::TokenUsed
            | ApiError::InvitationEmailMismatch
            | ApiError::InvalidRecoveryCode => StatusCode::BAD_REQUEST,
            ApiError::EmailExists => StatusCode::CONFLICT,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Provider(e) => match e {
                ProviderError::EmailExists => StatusCode::CONFLICT,
                ProviderError::InvalidEmail | ProviderError::InvalidToken => {
                    StatusCode::BAD_REQUEST
                }
                ProviderError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Internal | ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-visible message. Internal variants never expose their source.
    fn public_message(&self) -> String {
        match self {
            ApiError::Database(e) => {
                tracing::error!(error = %e, "database error surfaced to handler boundary");
                "internal server error".to_string()
            }
            ApiError::Provider(ProviderError::Unavailable(detail)) => {
                tracing::error!(detail = %detail, "identity provider unavailable");
                "authentication service is temporarily unavailable".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": false,
            "error": self.public_message(),
            "code": self.code(),
        });
        if let ApiError::Validation { field, .. } = &self {
            body["field"] = json!(field);
        }

        let status = self.status();
        if let ApiError::RateLimited { retry_after } = &self {
            let mut response = (status, Json(body)).into_response();
            if let Ok(value) = retry_after.as_secs().to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            return response;
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ApiError::DisposableEmail.code(), "disposable_email");
        assert_eq!(ApiError::EmailExists.code(), "email_exists");
        assert_eq!(ApiError::AlreadyVerified.code(), "already_verified");
        assert_eq!(ApiError::Internal.code(), "internal_error");
    }

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(ApiError::EmailExists.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::InvalidCode.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::RateLimited {
                retry_after: Duration::from_secs(60)
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn database_errors_do_not_leak() {
        let err = ApiError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.public_message(), "internal server error");
        assert_eq!(err.code(), "internal_error");
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited {
            retry_after: Duration::from_secs(120),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("120")
        );
    }
}
