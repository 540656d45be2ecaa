//! Audit event source
//!
//! The originating event store is external; this service only reads it.
//! [`AuditEventSource`] is the extraction seam used by the export worker,
//! with a Postgres-table implementation for deployments that replicate the
//! event stream into the service database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

/// The slice of the event schema this service reads.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: String,
    pub severity: Option<String>,
    #[serde(default)]
    pub risk_score: i32,
    pub category: Option<String>,
    pub actor: Option<String>,
    pub resource: Option<String>,
    #[serde(default = "empty_array")]
    pub threat_indicators: serde_json::Value,
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

fn empty_array() -> serde_json::Value {
    serde_json::json!([])
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

impl AuditEvent {
    pub fn indicators(&self) -> Vec<String> {
        serde_json::from_value(self.threat_indicators.clone()).unwrap_or_default()
    }

    pub fn has_indicator(&self, name: &str) -> bool {
        self.indicators().iter().any(|i| i == name)
    }

    pub fn is_anomalous(&self) -> bool {
        self.has_indicator("anomaly")
            || self.data.get("anomaly").and_then(|v| v.as_bool()).unwrap_or(false)
    }
}

/// Filtered extraction scope for one export job.
#[derive(Debug, Clone)]
pub struct ExportScope {
    pub tenant_id: Uuid,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    /// Optional keys: event_type, category, actor, min_risk_score
    pub filters: serde_json::Value,
}

impl ExportScope {
    fn filter_str(&self, key: &str) -> Option<String> {
        self.filters
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    fn min_risk_score(&self) -> i32 {
        self.filters
            .get("min_risk_score")
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as i32
    }
}

#[async_trait]
pub trait AuditEventSource: Send + Sync {
    async fn count(&self, scope: &ExportScope) -> anyhow::Result<i64>;

    async fn fetch(
        &self,
        scope: &ExportScope,
        offset: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<AuditEvent>>;
}

pub struct PgEventSource {
    pool: PgPool,
}

impl PgEventSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditEventSource for PgEventSource {
    async fn count(&self, scope: &ExportScope) -> anyhow::Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM audit_events
            WHERE tenant_id = $1
              AND occurred_at BETWEEN $2 AND $3
              AND ($4::text IS NULL OR event_type = $4)
              AND ($5::text IS NULL OR category = $5)
              AND ($6::text IS NULL OR actor = $6)
              AND risk_score >= $7
            "#,
        )
        .bind(scope.tenant_id)
        .bind(scope.range_start)
        .bind(scope.range_end)
        .bind(scope.filter_str("event_type"))
        .bind(scope.filter_str("category"))
        .bind(scope.filter_str("actor"))
        .bind(scope.min_risk_score())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("count"))
    }

    async fn fetch(
        &self,
        scope: &ExportScope,
        offset: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<AuditEvent>> {
        let events = sqlx::query_as::<_, AuditEvent>(
            r#"
            SELECT * FROM audit_events
            WHERE tenant_id = $1
              AND occurred_at BETWEEN $2 AND $3
              AND ($4::text IS NULL OR event_type = $4)
              AND ($5::text IS NULL OR category = $5)
              AND ($6::text IS NULL OR actor = $6)
              AND risk_score >= $7
            ORDER BY occurred_at ASC, id ASC
            LIMIT $8 OFFSET $9
            "#,
        )
        .bind(scope.tenant_id)
        .bind(scope.range_start)
        .bind(scope.range_end)
        .bind(scope.filter_str("event_type"))
        .bind(scope.filter_str("category"))
        .bind(scope.filter_str("actor"))
        .bind(scope.min_risk_score())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(indicators: serde_json::Value, data: serde_json::Value) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            event_type: "login".to_string(),
            severity: None,
            risk_score: 10,
            category: None,
            actor: None,
            resource: None,
            threat_indicators: indicators,
            data,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn anomaly_detected_from_indicator_or_payload() {
        assert!(event(serde_json::json!(["anomaly"]), serde_json::json!({})).is_anomalous());
        assert!(event(serde_json::json!([]), serde_json::json!({"anomaly": true})).is_anomalous());
        assert!(!event(serde_json::json!(["port_scan"]), serde_json::json!({})).is_anomalous());
    }
}
