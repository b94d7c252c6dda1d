// Worker clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Hearthside Background Worker
//!
//! Handles scheduled maintenance jobs:
//! - Marking expired auth tokens (hourly)
//! - Revoking expired sessions (hourly)
//! - Pruning stale rate-limit attempt rows (every 15 minutes)
//! - Heartbeat (every 5 minutes)
//!
//! Verification and audit rows are deliberately never deleted; both are
//! retained for audit.

use std::time::Duration;

use hearthside_shared::create_pool;
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Flip active tokens past their expiry to 'expired' so list views and
/// redemption attempts see a terminal status.
async fn expire_auth_tokens(pool: &PgPool) -> anyhow::Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE auth_tokens
        SET status = 'expired'
        WHERE status = 'active'
          AND expires_at <= NOW()
        "#,
    )
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Mark sessions past their expiry as revoked so the session list the
/// client sees stays truthful.
async fn revoke_expired_sessions(pool: &PgPool) -> anyhow::Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE user_sessions
        SET revoked_at = NOW(),
            revocation_reason = 'expired'
        WHERE revoked_at IS NULL
          AND expires_at <= NOW()
        "#,
    )
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Rate-limit attempts are only read within their window; anything older
/// than a day is dead weight.
async fn prune_rate_limit_attempts(pool: &PgPool) -> anyhow::Result<u64> {
    let rows = sqlx::query(
        r#"
        DELETE FROM auth_rate_limits
        WHERE created_at < NOW() - INTERVAL '24 hours'
        "#,
    )
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Hearthside Worker");

    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;
    info!("Database pool created");

    let scheduler = JobScheduler::new().await?;

    // Job 1: Expire stale auth tokens (hourly at :05)
    let token_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 5 * * * *", move |_uuid, _l| {
            let pool = token_pool.clone();
            Box::pin(async move {
                match expire_auth_tokens(&pool).await {
                    Ok(count) => info!(count, "expired stale auth tokens"),
                    Err(e) => error!(error = %e, "failed to expire auth tokens"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: auth token expiry sweep (hourly)");

    // Job 2: Revoke expired sessions (hourly at :10)
    let session_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 10 * * * *", move |_uuid, _l| {
            let pool = session_pool.clone();
            Box::pin(async move {
                match revoke_expired_sessions(&pool).await {
                    Ok(count) => info!(count, "revoked expired sessions"),
                    Err(e) => error!(error = %e, "failed to revoke expired sessions"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: expired session sweep (hourly)");

    // Job 3: Prune old rate-limit attempts (every 15 minutes)
    let rate_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
            let pool = rate_pool.clone();
            Box::pin(async move {
                match prune_rate_limit_attempts(&pool).await {
                    Ok(count) => info!(count, "pruned rate-limit attempts"),
                    Err(e) => error!(error = %e, "failed to prune rate-limit attempts"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: rate-limit attempt pruning (every 15 minutes)");

    // Job 4: Heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker scheduler started");

    // Keep the process alive; jobs run on the scheduler's tasks.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
