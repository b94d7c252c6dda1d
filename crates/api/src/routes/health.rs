//! Health endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use time::OffsetDateTime;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub services: ServiceStatuses,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatuses {
    pub database: &'static str,
    pub authentication: &'static str,
    pub api: &'static str,
}

/// Report service health: 200 when everything is reachable, 503 when the
/// database or the identity provider is down.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();
    let authentication_ok = state.identity.health().await;

    let healthy = database_ok && authentication_ok;
    let body = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        timestamp: OffsetDateTime::now_utc(),
        services: ServiceStatuses {
            database: if database_ok { "ok" } else { "unavailable" },
            authentication: if authentication_ok { "ok" } else { "unavailable" },
            api: "ok",
        },
        version: env!("CARGO_PKG_VERSION"),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
