//! Shared test fixtures

use crate::models::{Alert, ExportJob};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub fn sample_alert(severity: &str, status: &str, created_at: DateTime<Utc>) -> Alert {
    Alert {
        id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        alert_type: "security_event".to_string(),
        category: "general".to_string(),
        severity: severity.to_string(),
        priority: 3,
        event_ids: serde_json::json!(["evt-1"]),
        detected_by: Some("detector".to_string()),
        rule_ref: None,
        detection_method: Some("rule".to_string()),
        confidence: 80,
        false_positive_score: 0,
        scope: None,
        affected_resources: serde_json::json!([]),
        affected_principals: serde_json::json!([]),
        data_exposure: false,
        status: status.to_string(),
        acknowledged_at: None,
        acknowledged_by: None,
        assignee: None,
        team: None,
        resolved_at: None,
        resolved_by: None,
        resolution: None,
        escalation_level: 0,
        escalation_requested: false,
        notifications: serde_json::json!([]),
        findings: serde_json::json!([]),
        evidence: serde_json::json!([]),
        frameworks: serde_json::json!([]),
        breach_deadline: None,
        correlation_id: None,
        parent_alert_id: None,
        version: 1,
        created_at,
        updated_at: created_at,
    }
}

pub fn sample_job(purpose: &str, created_at: DateTime<Utc>) -> ExportJob {
    ExportJob {
        id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        export_type: "audit_trail".to_string(),
        format: "jsonl".to_string(),
        compress: false,
        encrypt: false,
        range_start: created_at - chrono::Duration::days(30),
        range_end: created_at,
        filters: serde_json::json!({}),
        state: "completed".to_string(),
        priority: 3,
        progress_current: 100,
        progress_total: 100,
        progress_phase: Some("done".to_string()),
        last_error: None,
        retry_count: 0,
        max_retries: 3,
        cancel_requested: false,
        claimed_by: Some("worker-1".to_string()),
        next_run: None,
        record_count: 1000,
        files: serde_json::json!([{
            "filename": "export.jsonl",
            "size": 4096,
            "checksum": "abc123",
            "location": "deadbeef/export.jsonl"
        }]),
        total_size: 4096,
        processing_time_ms: Some(2000),
        export_rate: Some(500.0),
        requested_by: "auditor@example.com".to_string(),
        approval_state: "approved".to_string(),
        purpose: purpose.to_string(),
        frameworks: serde_json::json!(["SOC2"]),
        legal_hold: false,
        legal_hold_reason: None,
        retention_expires_at: None,
        auto_delete: true,
        extensions: serde_json::json!([]),
        integrity_digest: None,
        verified: None,
        last_verified_at: None,
        version: 1,
        started_at: Some(created_at),
        completed_at: Some(created_at + chrono::Duration::seconds(2)),
        created_at,
        updated_at: created_at,
    }
}
