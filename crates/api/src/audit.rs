//! Security audit logging
//!
//! Append-only writes to `audit_logs`. Rows are never mutated or deleted
//! by the application. A failed write is logged loudly but does not fail
//! the request that produced the event.

use sqlx::PgPool;
use uuid::Uuid;

/// Context captured from the inbound request for audit rows.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// One security/audit event, built by the orchestration handlers.
#[derive(Debug)]
pub struct AuditEvent<'a> {
    pub event_type: &'a str,
    pub category: &'a str,
    pub severity: &'a str,
    pub actor_id: Option<Uuid>,
    pub target_id: Option<Uuid>,
    pub data: serde_json::Value,
    pub success: bool,
}

impl<'a> AuditEvent<'a> {
    pub fn new(event_type: &'a str, category: &'a str) -> Self {
        Self {
            event_type,
            category,
            severity: crate::audit_constants::severity::INFO,
            actor_id: None,
            target_id: None,
            data: serde_json::json!({}),
            success: true,
        }
    }

    pub fn severity(mut self, severity: &'a str) -> Self {
        self.severity = severity;
        self
    }

    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn target(mut self, target_id: Uuid) -> Self {
        self.target_id = Some(target_id);
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = sanitize(data);
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

/// Writer handle shared through application state.
#[derive(Clone)]
pub struct AuditLogger {
    pool: PgPool,
}

impl AuditLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one event. Never fails the caller.
    pub async fn log(&self, event: AuditEvent<'_>, ctx: &AuditContext) {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (
                event_type, event_category, severity, actor_id, target_id,
                event_data, success, ip_address, user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.event_type)
        .bind(event.category)
        .bind(event.severity)
        .bind(event.actor_id)
        .bind(event.target_id)
        .bind(&event.data)
        .bind(event.success)
        .bind(&ctx.ip_address)
        .bind(&ctx.user_agent)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(
                error = %e,
                event_type = event.event_type,
                "failed to write audit log"
            );
        }
    }
}

/// Redact credential material before it can land in an audit row.
fn sanitize(mut data: serde_json::Value) -> serde_json::Value {
    if let Some(obj) = data.as_object_mut() {
        let sensitive_keys = [
            "code",
            "token",
            "recovery_code",
            "token_hash",
            "secret",
            "access_token",
            "refresh_token",
        ];
        for key in &sensitive_keys {
            if obj.contains_key(*key) {
                obj.insert(key.to_string(), serde_json::json!("[REDACTED]"));
            }
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_redacts_credential_fields() {
        let data = sanitize(json!({
            "email": "user@example.com",
            "code": "123456",
            "recovery_code": "ABCDE-FGHIJ",
        }));
        assert_eq!(data["email"], "user@example.com");
        assert_eq!(data["code"], "[REDACTED]");
        assert_eq!(data["recovery_code"], "[REDACTED]");
    }

    #[test]
    fn event_builder_defaults_to_success_info() {
        let event = AuditEvent::new("auth.signup", "authentication");
        assert!(event.success);
        assert_eq!(event.severity, "info");
        assert!(event.actor_id.is_none());
    }
}
