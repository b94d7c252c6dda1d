//! Application configuration loaded from the environment

/// Runtime configuration for the API server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to, e.g. `0.0.0.0:8080`
    pub bind_address: String,
    /// Postgres connection string (pooler URL)
    pub database_url: String,
    /// Secret for signing session JWTs
    pub jwt_secret: String,
    /// Access token lifetime in hours
    pub jwt_expiry_hours: i64,
    /// Base URL of the identity provider's admin API
    pub identity_url: String,
    /// Service-role key for the identity provider's admin API
    pub identity_service_key: String,
    /// Public base URL of the web app, used in emailed links
    pub app_base_url: String,
    /// Comma-separated CORS origin allow-list
    pub allowed_origins: Vec<String>,
    /// Persist rate-limit attempts in Postgres instead of process memory
    pub rate_limit_persistent: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required: DATABASE_URL, JWT_SECRET, IDENTITY_URL,
    /// IDENTITY_SERVICE_KEY. Everything else has a development default.
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let database_url = require_env("DATABASE_URL")?;
        let jwt_secret = require_env("JWT_SECRET")?;
        let jwt_expiry_hours = std::env::var("JWT_EXPIRY_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        let identity_url = require_env("IDENTITY_URL")?;
        let identity_service_key = require_env("IDENTITY_SERVICE_KEY")?;
        let app_base_url =
            std::env::var("APP_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let rate_limit_persistent = std::env::var("RATE_LIMIT_PERSISTENT")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            bind_address,
            database_url,
            jwt_secret,
            jwt_expiry_hours,
            identity_url,
            identity_service_key,
            app_base_url,
            allowed_origins,
            rate_limit_persistent,
        })
    }
}

fn require_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("{name} must be set"))
}
