//! Application state

use std::time::Duration;

use reqwest::Client;
use sqlx::PgPool;

use crate::audit::AuditLogger;
use crate::auth::{AuthState, JwtManager};
use crate::config::Config;
use crate::email::Mailer;
use crate::identity::IdentityProvider;

use hearthside_shared::RateLimiter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    /// Adapter for the managed identity provider's admin API
    pub identity: IdentityProvider,
    pub mailer: Mailer,
    pub audit: AuditLogger,
    /// Rate limiter injected into every auth handler (from the shared crate)
    pub rate_limiter: RateLimiter,
    pub http_client: Client,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);

        // One client for all outbound HTTP; a request must complete or
        // fail within a request lifetime.
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        let identity = IdentityProvider::new(
            &config.identity_url,
            &config.identity_service_key,
            http_client.clone(),
        );
        tracing::info!(url = %config.identity_url, "identity provider adapter initialized");

        let mailer = Mailer::from_env(http_client.clone(), &config.app_base_url);
        if mailer.is_enabled() {
            tracing::info!("transactional email enabled");
        } else {
            tracing::warn!("transactional email not configured (missing RESEND_API_KEY)");
        }

        let audit = AuditLogger::new(pool.clone());

        let rate_limiter = if config.rate_limit_persistent {
            tracing::info!("rate limiter using persistent attempt store");
            RateLimiter::new_postgres(pool.clone())
        } else {
            tracing::info!("rate limiter using in-memory attempt store");
            RateLimiter::new_in_memory()
        };

        Self {
            pool,
            config,
            jwt_manager,
            identity,
            mailer,
            audit,
            rate_limiter,
            http_client,
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
            pool: self.pool.clone(),
        }
    }
}
