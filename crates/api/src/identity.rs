//! Identity provider adapter
//!
//! Wraps the managed identity provider's HTTP admin API. The provider
//! owns the user records; this service owns everything else. Three
//! operations are used throughout the auth flows:
//!
//! - admin user creation with email auto-confirm, so the provider never
//!   emails the user directly (this service runs its own verification
//!   code flow). Admin create needs no password, so no throwaway
//!   credential is ever generated.
//! - confirming an email after a verification code is redeemed
//! - lookup by email for duplicate checks and recovery flows
//!
//! Provider errors are translated into the small `ProviderError` taxonomy
//! rather than passed through raw.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

/// Errors surfaced by the identity provider, reduced to the cases the
/// orchestration handlers branch on.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("an account with this email already exists")]
    EmailExists,

    #[error("the email address was rejected by the identity provider")]
    InvalidEmail,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// A user record as the provider reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderUser {
    pub id: Uuid,
    pub email: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub email_confirmed_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
struct UserListResponse {
    #[serde(default)]
    users: Vec<ProviderUser>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    #[serde(default, alias = "msg", alias = "message")]
    error: String,
}

/// HTTP client for the provider's admin API.
#[derive(Clone)]
pub struct IdentityProvider {
    base_url: String,
    service_key: String,
    client: Client,
}

impl IdentityProvider {
    pub fn new(base_url: &str, service_key: &str, client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            client,
        }
    }

    fn admin_url(&self, path: &str) -> String {
        format!("{}/admin/{}", self.base_url, path)
    }

    /// Create a user with the email pre-confirmed at the provider level.
    ///
    /// Confirmation is gated by this application's own verification-code
    /// flow instead; auto-confirming here suppresses the provider's
    /// outbound confirmation email.
    pub async fn create_user(
        &self,
        email: &str,
        metadata: serde_json::Value,
    ) -> Result<ProviderUser, ProviderError> {
        let response = self
            .client
            .post(self.admin_url("users"))
            .bearer_auth(&self.service_key)
            .json(&json!({
                "email": email,
                "email_confirm": true,
                "user_metadata": metadata,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => response
                .json::<ProviderUser>()
                .await
                .map_err(|e| ProviderError::Unavailable(e.to_string())),
            StatusCode::CONFLICT => Err(ProviderError::EmailExists),
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
                let body = response
                    .json::<ProviderErrorBody>()
                    .await
                    .unwrap_or_else(|_| ProviderErrorBody {
                        error: String::new(),
                    });
                // Some provider versions report duplicates as 422 with a
                // message instead of 409.
                if body.error.to_lowercase().contains("already") {
                    Err(ProviderError::EmailExists)
                } else {
                    Err(ProviderError::InvalidEmail)
                }
            }
            status => Err(ProviderError::Unavailable(format!(
                "admin create returned {status}"
            ))),
        }
    }

    /// Look up a user by (already normalized) email.
    pub async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ProviderUser>, ProviderError> {
        let response = self
            .client
            .get(self.admin_url("users"))
            .bearer_auth(&self.service_key)
            .query(&[("email", email)])
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Unavailable(format!(
                "admin lookup returned {}",
                response.status()
            )));
        }

        let list: UserListResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok(list.users.into_iter().find(|u| u.email == email))
    }

    /// Mark the user's email confirmed after a verification code redeems.
    pub async fn confirm_email(&self, user_id: Uuid) -> Result<(), ProviderError> {
        let response = self
            .client
            .put(self.admin_url(&format!("users/{user_id}")))
            .bearer_auth(&self.service_key)
            .json(&json!({ "email_confirm": true }))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ProviderError::InvalidToken),
            status => Err(ProviderError::Unavailable(format!(
                "admin confirm returned {status}"
            ))),
        }
    }

    /// Liveness probe for the health endpoint.
    pub async fn health(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .bearer_auth(&self.service_key)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(server: &mockito::ServerGuard) -> IdentityProvider {
        IdentityProvider::new(&server.url(), "service-key", Client::new())
    }

    #[tokio::test]
    async fn create_user_parses_provider_response() {
        let mut server = mockito::Server::new_async().await;
        let user_id = Uuid::new_v4();
        let _mock = server
            .mock("POST", "/admin/users")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"id":"{user_id}","email":"new@example.com","email_confirmed_at":"2026-01-01T00:00:00Z"}}"#
            ))
            .create_async()
            .await;

        let user = provider(&server)
            .create_user("new@example.com", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(user.email, "new@example.com");
        assert!(user.email_confirmed_at.is_some());
    }

    #[tokio::test]
    async fn create_user_conflict_maps_to_email_exists() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/admin/users")
            .with_status(409)
            .with_body(r#"{"error":"duplicate"}"#)
            .create_async()
            .await;

        let err = provider(&server)
            .create_user("dup@example.com", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmailExists));
    }

    #[tokio::test]
    async fn create_user_422_already_registered_maps_to_email_exists() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/admin/users")
            .with_status(422)
            .with_body(r#"{"msg":"A user with this email address has already been registered"}"#)
            .create_async()
            .await;

        let err = provider(&server)
            .create_user("dup@example.com", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmailExists));
    }

    #[tokio::test]
    async fn create_user_rejected_email_maps_to_invalid_email() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/admin/users")
            .with_status(400)
            .with_body(r#"{"msg":"Unable to validate email address"}"#)
            .create_async()
            .await;

        let err = provider(&server)
            .create_user("bad@example.com", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidEmail));
    }

    #[tokio::test]
    async fn find_user_by_email_returns_none_for_unknown() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/admin/users")
            .match_query(mockito::Matcher::UrlEncoded(
                "email".into(),
                "ghost@example.com".into(),
            ))
            .with_status(200)
            .with_body(r#"{"users":[]}"#)
            .create_async()
            .await;

        let found = provider(&server)
            .find_user_by_email("ghost@example.com")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn confirm_email_unknown_user_maps_to_invalid_token() {
        let mut server = mockito::Server::new_async().await;
        let user_id = Uuid::new_v4();
        let _mock = server
            .mock("PUT", format!("/admin/users/{user_id}").as_str())
            .with_status(404)
            .create_async()
            .await;

        let err = provider(&server).confirm_email(user_id).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidToken));
    }

    #[tokio::test]
    async fn health_reflects_provider_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;
        assert!(provider(&server).health().await);
    }
}
