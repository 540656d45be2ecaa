//! Alert model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

/// Alert severity vocabulary, shared with the compliance gap engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }

    /// Base response priority for this severity (1 = most urgent).
    pub fn base_priority(&self) -> i32 {
        match self {
            Severity::Critical => 1,
            Severity::High => 2,
            Severity::Medium => 3,
            Severity::Low => 4,
            Severity::Info => 5,
        }
    }
}

/// Alert response status.
///
/// Open statuses may still transition; terminal statuses never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    New,
    Acknowledged,
    Investigating,
    Mitigating,
    Resolved,
    FalsePositive,
    Ignored,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::New => "new",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Investigating => "investigating",
            AlertStatus::Mitigating => "mitigating",
            AlertStatus::Resolved => "resolved",
            AlertStatus::FalsePositive => "false_positive",
            AlertStatus::Ignored => "ignored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(AlertStatus::New),
            "acknowledged" => Some(AlertStatus::Acknowledged),
            "investigating" => Some(AlertStatus::Investigating),
            "mitigating" => Some(AlertStatus::Mitigating),
            "resolved" => Some(AlertStatus::Resolved),
            "false_positive" => Some(AlertStatus::FalsePositive),
            "ignored" => Some(AlertStatus::Ignored),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AlertStatus::Resolved | AlertStatus::FalsePositive | AlertStatus::Ignored
        )
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

/// Statuses considered open for SQL filters.
pub const OPEN_STATUSES: [&str; 4] = ["new", "acknowledged", "investigating", "mitigating"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub tenant_id: Uuid,

    pub alert_type: String,
    pub category: String,
    pub severity: String,
    pub priority: i32,

    pub event_ids: serde_json::Value,
    pub detected_by: Option<String>,
    pub rule_ref: Option<String>,

    pub detection_method: Option<String>,
    pub confidence: i32,
    pub false_positive_score: i32,

    pub scope: Option<String>,
    pub affected_resources: serde_json::Value,
    pub affected_principals: serde_json::Value,
    pub data_exposure: bool,

    pub status: String,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub assignee: Option<String>,
    pub team: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution: Option<String>,
    pub escalation_level: i32,
    pub escalation_requested: bool,

    pub notifications: serde_json::Value,

    pub findings: serde_json::Value,
    pub evidence: serde_json::Value,

    pub frameworks: serde_json::Value,
    pub breach_deadline: Option<DateTime<Utc>>,

    pub correlation_id: Option<Uuid>,
    pub parent_alert_id: Option<Uuid>,

    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Response-time metrics derived from an alert's timestamps. Never stored.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AlertMetrics {
    pub time_to_acknowledge_ms: Option<i64>,
    pub time_to_resolve_ms: Option<i64>,
    pub total_response_ms: Option<i64>,
}

impl Alert {
    pub fn severity_enum(&self) -> Severity {
        Severity::parse(&self.severity).unwrap_or(Severity::Info)
    }

    pub fn status_enum(&self) -> AlertStatus {
        AlertStatus::parse(&self.status).unwrap_or(AlertStatus::New)
    }

    pub fn metrics(&self) -> AlertMetrics {
        let ack = self
            .acknowledged_at
            .map(|t| (t - self.created_at).num_milliseconds());
        let resolve = match (self.acknowledged_at, self.resolved_at) {
            (Some(a), Some(r)) => Some((r - a).num_milliseconds()),
            _ => None,
        };
        let total = self
            .resolved_at
            .map(|t| (t - self.created_at).num_milliseconds());
        AlertMetrics {
            time_to_acknowledge_ms: ack,
            time_to_resolve_ms: resolve,
            total_response_ms: total,
        }
    }
}

/// Fields fixed at creation time. Source and detection are immutable after
/// insert; everything else moves through the named transitions.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub tenant_id: Uuid,
    pub alert_type: String,
    pub category: String,
    pub severity: Severity,
    pub priority: i32,
    pub event_ids: Vec<String>,
    pub detected_by: Option<String>,
    pub rule_ref: Option<String>,
    pub detection_method: Option<String>,
    pub confidence: i32,
    pub scope: Option<String>,
    pub affected_resources: Vec<String>,
    pub affected_principals: Vec<String>,
    pub data_exposure: bool,
    pub frameworks: Vec<String>,
    pub breach_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AlertFilter {
    pub severity: Option<String>,
    pub assignee: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AlertAction {
    pub id: i64,
    pub alert_id: Uuid,
    pub action: String,
    pub actor: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AlertStats {
    pub total: i64,
    pub open: i64,
    pub critical_open: i64,
    pub high_open: i64,
    pub escalated: i64,
    pub false_positives: i64,
    pub avg_acknowledge_secs: Option<f64>,
    pub avg_resolve_secs: Option<f64>,
}

impl Alert {
    pub async fn insert(pool: &PgPool, data: NewAlert) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Alert>(
            r#"
            INSERT INTO alerts (
                tenant_id, alert_type, category, severity, priority,
                event_ids, detected_by, rule_ref,
                detection_method, confidence,
                scope, affected_resources, affected_principals, data_exposure,
                frameworks, breach_deadline
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(data.tenant_id)
        .bind(&data.alert_type)
        .bind(&data.category)
        .bind(data.severity.as_str())
        .bind(data.priority)
        .bind(serde_json::json!(data.event_ids))
        .bind(&data.detected_by)
        .bind(&data.rule_ref)
        .bind(&data.detection_method)
        .bind(data.confidence)
        .bind(&data.scope)
        .bind(serde_json::json!(data.affected_resources))
        .bind(serde_json::json!(data.affected_principals))
        .bind(data.data_exposure)
        .bind(serde_json::json!(data.frameworks))
        .bind(data.breach_deadline)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Alert>("SELECT * FROM alerts WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_open(
        pool: &PgPool,
        tenant_id: Uuid,
        filter: AlertFilter,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let limit = filter.limit.unwrap_or(50);
        let offset = filter.offset.unwrap_or(0);

        sqlx::query_as::<_, Alert>(
            r#"
            SELECT * FROM alerts
            WHERE tenant_id = $1
              AND status = ANY($2)
              AND ($3::text IS NULL OR severity = $3)
              AND ($4::text IS NULL OR assignee = $4)
            ORDER BY priority ASC, created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(tenant_id)
        .bind(&OPEN_STATUSES[..])
        .bind(&filter.severity)
        .bind(&filter.assignee)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    /// All open alerts for the SLA sweep, across tenants.
    pub async fn list_all_open(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Alert>(
            "SELECT * FROM alerts WHERE status = ANY($1) ORDER BY created_at ASC",
        )
        .bind(&OPEN_STATUSES[..])
        .fetch_all(pool)
        .await
    }

    /// Conditional transition to acknowledged. Returns None when the alert
    /// was already acknowledged (or is terminal).
    pub async fn acknowledge(
        pool: &PgPool,
        id: Uuid,
        actor: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Alert>(
            r#"
            UPDATE alerts
            SET status = 'acknowledged', acknowledged_at = NOW(), acknowledged_by = $2,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND acknowledged_at IS NULL AND status = 'new'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(actor)
        .fetch_optional(pool)
        .await
    }

    pub async fn assign(
        pool: &PgPool,
        id: Uuid,
        assignee: &str,
        team: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        // An assignment on a fresh alert also moves it into investigation
        sqlx::query_as::<_, Alert>(
            r#"
            UPDATE alerts
            SET assignee = $2,
                team = COALESCE($3, team),
                status = CASE WHEN status = 'new' THEN 'investigating' ELSE status END,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND status = ANY($4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(assignee)
        .bind(team)
        .bind(&OPEN_STATUSES[..])
        .fetch_optional(pool)
        .await
    }

    pub async fn append_finding(
        pool: &PgPool,
        id: Uuid,
        finding: serde_json::Value,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Alert>(
            r#"
            UPDATE alerts
            SET findings = findings || $2::jsonb,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(serde_json::json!([finding]))
        .bind(&OPEN_STATUSES[..])
        .fetch_optional(pool)
        .await
    }

    pub async fn append_evidence(
        pool: &PgPool,
        id: Uuid,
        evidence: serde_json::Value,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Alert>(
            r#"
            UPDATE alerts
            SET evidence = evidence || $2::jsonb,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(serde_json::json!([evidence]))
        .bind(&OPEN_STATUSES[..])
        .fetch_optional(pool)
        .await
    }

    pub async fn resolve(
        pool: &PgPool,
        id: Uuid,
        actor: &str,
        resolution: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Alert>(
            r#"
            UPDATE alerts
            SET status = 'resolved', resolved_at = NOW(), resolved_by = $2, resolution = $3,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND status = ANY($4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(actor)
        .bind(resolution)
        .bind(&OPEN_STATUSES[..])
        .fetch_optional(pool)
        .await
    }

    /// Terminal false-positive transition. Only reachable before mitigation
    /// starts; bumps the detector feedback score, capped at 100.
    pub async fn mark_false_positive(
        pool: &PgPool,
        id: Uuid,
        actor: &str,
        reason: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Alert>(
            r#"
            UPDATE alerts
            SET status = 'false_positive', resolved_at = NOW(), resolved_by = $2,
                resolution = $3,
                false_positive_score = LEAST(false_positive_score + 25, 100),
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND status IN ('new', 'acknowledged', 'investigating')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(actor)
        .bind(reason)
        .fetch_optional(pool)
        .await
    }

    /// Raise the escalation level. The level is monotonically non-decreasing;
    /// a lower target level leaves the row untouched and returns None.
    pub async fn escalate(
        pool: &PgPool,
        id: Uuid,
        level: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Alert>(
            r#"
            UPDATE alerts
            SET escalation_level = $2, escalation_requested = false,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3) AND escalation_level < $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(level)
        .bind(&OPEN_STATUSES[..])
        .fetch_optional(pool)
        .await
    }

    pub async fn set_status(
        pool: &PgPool,
        id: Uuid,
        status: AlertStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Alert>(
            r#"
            UPDATE alerts
            SET status = $2, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&OPEN_STATUSES[..])
        .fetch_optional(pool)
        .await
    }

    /// Append per-channel delivery records to the notification log.
    pub async fn record_notifications(
        pool: &PgPool,
        id: Uuid,
        records: serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE alerts
            SET notifications = notifications || $2::jsonb, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(records)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Alerts in the correlation window sharing a triggering event, an
    /// affected principal, or an affected resource with the seed.
    pub async fn correlation_candidates(
        pool: &PgPool,
        seed: &Alert,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        event_ids: &[String],
        principals: &[String],
        resources: &[String],
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Alert>(
            r#"
            SELECT * FROM alerts
            WHERE tenant_id = $1
              AND id <> $2
              AND created_at BETWEEN $3 AND $4
              AND (event_ids ?| $5 OR affected_principals ?| $6 OR affected_resources ?| $7)
            ORDER BY created_at DESC
            "#,
        )
        .bind(seed.tenant_id)
        .bind(seed.id)
        .bind(window_start)
        .bind(window_end)
        .bind(event_ids)
        .bind(principals)
        .bind(resources)
        .fetch_all(pool)
        .await
    }

    /// Batched correlation-id assignment across a whole group.
    pub async fn assign_correlation(
        pool: &PgPool,
        ids: &[Uuid],
        correlation_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET correlation_id = $2, version = version + 1, updated_at = NOW()
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(correlation_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn record_action(
        pool: &PgPool,
        alert_id: Uuid,
        action: &str,
        actor: &str,
        detail: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO alert_actions (alert_id, action, actor, detail) VALUES ($1, $2, $3, $4)",
        )
        .bind(alert_id)
        .bind(action)
        .bind(actor)
        .bind(detail)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn actions(pool: &PgPool, alert_id: Uuid) -> Result<Vec<AlertAction>, sqlx::Error> {
        sqlx::query_as::<_, AlertAction>(
            "SELECT * FROM alert_actions WHERE alert_id = $1 ORDER BY id ASC",
        )
        .bind(alert_id)
        .fetch_all(pool)
        .await
    }

    pub async fn statistics(
        pool: &PgPool,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<AlertStats, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                COUNT(*) FILTER (WHERE status = ANY($3)) as open,
                COUNT(*) FILTER (WHERE status = ANY($3) AND severity = 'critical') as critical_open,
                COUNT(*) FILTER (WHERE status = ANY($3) AND severity = 'high') as high_open,
                COUNT(*) FILTER (WHERE escalation_level > 0) as escalated,
                COUNT(*) FILTER (WHERE status = 'false_positive') as false_positives,
                AVG(EXTRACT(EPOCH FROM (acknowledged_at - created_at)))::double precision as avg_ack,
                AVG(EXTRACT(EPOCH FROM (resolved_at - acknowledged_at)))::double precision as avg_resolve
            FROM alerts
            WHERE tenant_id = $1 AND created_at >= $2
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .bind(&OPEN_STATUSES[..])
        .fetch_one(pool)
        .await?;

        Ok(AlertStats {
            total: row.get("total"),
            open: row.get("open"),
            critical_open: row.get("critical_open"),
            high_open: row.get("high_open"),
            escalated: row.get("escalated"),
            false_positives: row.get("false_positives"),
            avg_acknowledge_secs: row.get("avg_ack"),
            avg_resolve_secs: row.get("avg_resolve"),
        })
    }

    /// Count of escalated, still-open critical alerts touching a framework.
    /// Feeds the compliance gap report.
    pub async fn escalated_critical_for_framework(
        pool: &PgPool,
        tenant_id: Uuid,
        framework: &str,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM alerts
            WHERE tenant_id = $1
              AND status = ANY($2)
              AND severity = 'critical'
              AND escalation_level > 0
              AND frameworks ? $3
            "#,
        )
        .bind(tenant_id)
        .bind(&OPEN_STATUSES[..])
        .bind(framework)
        .fetch_one(pool)
        .await?;
        Ok(row.get("count"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_round_trips() {
        for s in ["critical", "high", "medium", "low", "info"] {
            assert_eq!(Severity::parse(s).unwrap().as_str(), s);
        }
        assert!(Severity::parse("bogus").is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(AlertStatus::Resolved.is_terminal());
        assert!(AlertStatus::FalsePositive.is_terminal());
        assert!(AlertStatus::Ignored.is_terminal());
        assert!(AlertStatus::New.is_open());
        assert!(AlertStatus::Mitigating.is_open());
    }

    #[test]
    fn base_priority_ordering() {
        assert_eq!(Severity::Critical.base_priority(), 1);
        assert_eq!(Severity::Info.base_priority(), 5);
    }
}
