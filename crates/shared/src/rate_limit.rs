//! Request rate limiting keyed by (endpoint, client IP)
//!
//! The limiter is an explicit component injected into application state,
//! never a module-level singleton. Two backends share one public type:
//! an in-memory keyed map for single-process deployments and tests, and
//! a Postgres-backed store (`auth_rate_limits`) that survives restarts.
//!
//! Availability policy: the limiter fails OPEN. If the attempt store is
//! unreachable, requests are allowed and the store error is logged at
//! warn level.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Outcome of a pre-handler limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed,
    Limited { retry_after: Duration },
}

impl RateLimitResult {
    pub fn is_limited(&self) -> bool {
        matches!(self, RateLimitResult::Limited { .. })
    }
}

/// Per-endpoint limiting policy.
///
/// `clear_on_success` implements login-style forgiveness: a successful
/// attempt wipes the window for that key. Enumeration-safe endpoints
/// (forgot-password and friends) record every attempt as a success but
/// keep counting, so the limit still applies while responses stay
/// indistinguishable.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub clear_on_success: bool,
}

impl RateLimitPolicy {
    /// Policy table for the auth endpoints.
    pub fn for_endpoint(endpoint: &str) -> Self {
        match endpoint {
            "signup" => Self {
                max_attempts: 5,
                window: Duration::from_secs(15 * 60),
                clear_on_success: true,
            },
            "login" | "verify_email" => Self {
                max_attempts: 5,
                window: Duration::from_secs(15 * 60),
                clear_on_success: true,
            },
            // Enumeration-safe paths: every attempt counts, nothing forgiven.
            "login_code" => Self {
                max_attempts: 5,
                window: Duration::from_secs(15 * 60),
                clear_on_success: false,
            },
            "forgot_password" | "recover_backup_email" => Self {
                max_attempts: 3,
                window: Duration::from_secs(60 * 60),
                clear_on_success: false,
            },
            "recover" => Self {
                max_attempts: 5,
                window: Duration::from_secs(60 * 60),
                clear_on_success: false,
            },
            "resend_verification" => Self {
                max_attempts: 3,
                window: Duration::from_secs(15 * 60),
                clear_on_success: false,
            },
            _ => Self {
                max_attempts: 10,
                window: Duration::from_secs(15 * 60),
                clear_on_success: true,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit store error: {0}")]
    Store(#[from] sqlx::Error),
}

type AttemptMap = Arc<RwLock<HashMap<String, Vec<OffsetDateTime>>>>;

#[derive(Clone)]
enum Backend {
    Memory(AttemptMap),
    Postgres(PgPool),
}

/// Attempt tracker for auth endpoints.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Backend,
}

impl RateLimiter {
    /// In-memory limiter for single-process deployments and tests.
    pub fn new_in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(RwLock::new(HashMap::new()))),
        }
    }

    /// Postgres-backed limiter persisting to `auth_rate_limits`.
    pub fn new_postgres(pool: PgPool) -> Self {
        Self {
            backend: Backend::Postgres(pool),
        }
    }

    fn key(endpoint: &str, ip: &str) -> String {
        format!("{endpoint}:{ip}")
    }

    /// Check whether a request may proceed. Invoked before handling.
    ///
    /// Fails open: store errors log at warn and allow the request.
    pub async fn check(&self, endpoint: &str, ip: &str) -> RateLimitResult {
        let policy = RateLimitPolicy::for_endpoint(endpoint);
        match self.count_in_window(endpoint, ip, policy.window).await {
            Ok((count, oldest)) => {
                if count >= policy.max_attempts as i64 {
                    let retry_after = oldest
                        .map(|first| {
                            let elapsed = OffsetDateTime::now_utc() - first;
                            policy
                                .window
                                .saturating_sub(elapsed.try_into().unwrap_or(Duration::ZERO))
                        })
                        .unwrap_or(policy.window);
                    RateLimitResult::Limited { retry_after }
                } else {
                    RateLimitResult::Allowed
                }
            }
            Err(e) => {
                tracing::warn!(endpoint, error = %e, "rate limit store unavailable, failing open");
                RateLimitResult::Allowed
            }
        }
    }

    /// Record the outcome of a handled request.
    ///
    /// Successful attempts clear the window when the endpoint policy says
    /// so. Store errors log at warn; recording is never fatal to the
    /// request that triggered it.
    pub async fn record_attempt(
        &self,
        endpoint: &str,
        ip: &str,
        user_agent: Option<&str>,
        success: bool,
        identifier: Option<&str>,
    ) {
        let policy = RateLimitPolicy::for_endpoint(endpoint);
        let result = if success && policy.clear_on_success {
            self.clear(endpoint, ip).await
        } else {
            self.append(endpoint, ip, user_agent, success, identifier)
                .await
        };
        if let Err(e) = result {
            tracing::warn!(endpoint, error = %e, "failed to record rate limit attempt");
        }
    }

    async fn count_in_window(
        &self,
        endpoint: &str,
        ip: &str,
        window: Duration,
    ) -> Result<(i64, Option<OffsetDateTime>), RateLimitError> {
        let cutoff = OffsetDateTime::now_utc() - window;
        match &self.backend {
            Backend::Memory(map) => {
                let map = map.read().await;
                let attempts = map
                    .get(&Self::key(endpoint, ip))
                    .map(|v| {
                        v.iter()
                            .filter(|t| **t > cutoff)
                            .copied()
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                Ok((attempts.len() as i64, attempts.iter().min().copied()))
            }
            Backend::Postgres(pool) => {
                let row: (i64, Option<OffsetDateTime>) = sqlx::query_as(
                    r#"
                    SELECT COUNT(*), MIN(created_at)
                    FROM auth_rate_limits
                    WHERE endpoint = $1
                      AND ip_address = $2
                      AND created_at > $3
                    "#,
                )
                .bind(endpoint)
                .bind(ip)
                .bind(cutoff)
                .fetch_one(pool)
                .await?;
                Ok(row)
            }
        }
    }

    async fn append(
        &self,
        endpoint: &str,
        ip: &str,
        _user_agent: Option<&str>,
        success: bool,
        identifier: Option<&str>,
    ) -> Result<(), RateLimitError> {
        match &self.backend {
            Backend::Memory(map) => {
                let policy = RateLimitPolicy::for_endpoint(endpoint);
                let cutoff = OffsetDateTime::now_utc() - policy.window;
                let mut map = map.write().await;
                let attempts = map.entry(Self::key(endpoint, ip)).or_default();
                attempts.retain(|t| *t > cutoff);
                attempts.push(OffsetDateTime::now_utc());
                Ok(())
            }
            Backend::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO auth_rate_limits (endpoint, ip_address, identifier, success)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(endpoint)
                .bind(ip)
                .bind(identifier)
                .bind(success)
                .execute(pool)
                .await?;
                Ok(())
            }
        }
    }

    async fn clear(&self, endpoint: &str, ip: &str) -> Result<(), RateLimitError> {
        match &self.backend {
            Backend::Memory(map) => {
                map.write().await.remove(&Self::key(endpoint, ip));
                Ok(())
            }
            Backend::Postgres(pool) => {
                sqlx::query(
                    r#"
                    DELETE FROM auth_rate_limits
                    WHERE endpoint = $1 AND ip_address = $2
                    "#,
                )
                .bind(endpoint)
                .bind(ip)
                .execute(pool)
                .await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_under_threshold() {
        let limiter = RateLimiter::new_in_memory();
        for _ in 0..4 {
            limiter
                .record_attempt("login", "10.0.0.1", None, false, None)
                .await;
        }
        assert_eq!(
            limiter.check("login", "10.0.0.1").await,
            RateLimitResult::Allowed
        );
    }

    #[tokio::test]
    async fn limits_at_threshold() {
        let limiter = RateLimiter::new_in_memory();
        for _ in 0..5 {
            limiter
                .record_attempt("login", "10.0.0.2", None, false, None)
                .await;
        }
        let result = limiter.check("login", "10.0.0.2").await;
        assert!(result.is_limited(), "5th failure should trip the limiter");
        if let RateLimitResult::Limited { retry_after } = result {
            assert!(retry_after <= Duration::from_secs(15 * 60));
        }
    }

    #[tokio::test]
    async fn success_clears_window_for_login() {
        let limiter = RateLimiter::new_in_memory();
        for _ in 0..5 {
            limiter
                .record_attempt("login", "10.0.0.3", None, false, None)
                .await;
        }
        assert!(limiter.check("login", "10.0.0.3").await.is_limited());

        limiter
            .record_attempt("login", "10.0.0.3", None, true, None)
            .await;
        assert_eq!(
            limiter.check("login", "10.0.0.3").await,
            RateLimitResult::Allowed
        );
    }

    #[tokio::test]
    async fn forgot_password_counts_successes() {
        // Enumeration-safe endpoints record success for every request but
        // still count toward the limit.
        let limiter = RateLimiter::new_in_memory();
        for _ in 0..3 {
            limiter
                .record_attempt("forgot_password", "10.0.0.4", None, true, None)
                .await;
        }
        assert!(limiter.check("forgot_password", "10.0.0.4").await.is_limited());
    }

    #[tokio::test]
    async fn keys_are_scoped_by_ip() {
        let limiter = RateLimiter::new_in_memory();
        for _ in 0..5 {
            limiter
                .record_attempt("login", "10.0.0.5", None, false, None)
                .await;
        }
        assert!(limiter.check("login", "10.0.0.5").await.is_limited());
        assert_eq!(
            limiter.check("login", "10.0.0.6").await,
            RateLimitResult::Allowed
        );
    }

    #[tokio::test]
    async fn keys_are_scoped_by_endpoint() {
        let limiter = RateLimiter::new_in_memory();
        for _ in 0..5 {
            limiter
                .record_attempt("login", "10.0.0.7", None, false, None)
                .await;
        }
        assert!(limiter.check("login", "10.0.0.7").await.is_limited());
        assert_eq!(
            limiter.check("signup", "10.0.0.7").await,
            RateLimitResult::Allowed
        );
    }
}
