//! Alert lifecycle engine
//!
//! Owns the alert state machine: creation from audit events, response
//! transitions, escalation, and the notification dispatch that follows
//! each transition. Persistence happens first; side effects are dispatched
//! explicitly afterwards and never roll a transition back.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::alerts::{correlator, sla};
use crate::error::{AppError, AppResult};
use crate::events::AuditEvent;
use crate::models::{Alert, AlertStatus, NewAlert, Severity};
use crate::notify::{dispatch_all, Channel, Notify};

/// Risk score above which an event is classified as high-risk activity.
const HIGH_RISK_THRESHOLD: i32 = 80;
/// Risk score above which the derived priority is bumped one level.
const PRIORITY_BUMP_THRESHOLD: i32 = 90;

/// Frameworks with a fixed breach-notification clock, in hours.
const BREACH_WINDOWS: &[(&str, i64)] = &[("GDPR", 72), ("HIPAA", 1440)];

/// Escalation contacts per level. Stands in for the tenant-config
/// collaborator; real deployments resolve these per tenant.
const ESCALATION_CONTACTS: &[&str] = &[
    "security-oncall",
    "security-lead",
    "security-manager",
    "ciso",
];

pub fn escalation_contact(level: i32) -> &'static str {
    let idx = (level.max(1) as usize - 1).min(ESCALATION_CONTACTS.len() - 1);
    ESCALATION_CONTACTS[idx]
}

/// Derive alert type and category from the event.
pub fn classify(event: &AuditEvent) -> (&'static str, String) {
    if event.is_anomalous() {
        return ("anomaly_detection", "behavioral".to_string());
    }
    if event.event_type.contains("auth") && event.event_type.contains("fail") {
        return ("authentication_failure", "access_control".to_string());
    }
    if event.risk_score > HIGH_RISK_THRESHOLD {
        return ("high_risk_activity", "risk".to_string());
    }
    (
        "security_event",
        event.category.clone().unwrap_or_else(|| "general".to_string()),
    )
}

/// Event severity wins when present; otherwise derived from risk score.
pub fn derive_severity(event: &AuditEvent) -> Severity {
    if let Some(s) = event.severity.as_deref().and_then(Severity::parse) {
        return s;
    }
    match event.risk_score {
        s if s >= 90 => Severity::Critical,
        s if s >= 70 => Severity::High,
        s if s >= 40 => Severity::Medium,
        s if s > 0 => Severity::Low,
        _ => Severity::Info,
    }
}

/// Severity-derived base priority, bumped one level for very high risk.
/// Priority 1 is the floor.
pub fn derive_priority(severity: Severity, risk_score: i32) -> i32 {
    let base = severity.base_priority();
    if risk_score > PRIORITY_BUMP_THRESHOLD {
        (base - 1).max(1)
    } else {
        base
    }
}

/// Default notification channels per severity. Every severity gets the
/// in-app channel; high adds email; critical additionally pages.
pub fn default_channels(severity: Severity) -> Vec<Channel> {
    let mut channels = vec![Channel::InApp];
    if matches!(severity, Severity::High | Severity::Critical) {
        channels.push(Channel::Email);
    }
    if severity == Severity::Critical {
        channels.push(Channel::Pager);
    }
    channels
}

/// Breach-notification deadline when a framework with a fixed clock
/// applies and data exposure was detected.
pub fn breach_deadline(
    frameworks: &[String],
    data_exposure: bool,
    created_at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !data_exposure {
        return None;
    }
    BREACH_WINDOWS
        .iter()
        .filter(|(fw, _)| frameworks.iter().any(|f| f == fw))
        .map(|(_, hours)| created_at + Duration::hours(*hours))
        .min()
}

fn detects_data_exposure(event: &AuditEvent) -> bool {
    event.has_indicator("data_exposure") || event.has_indicator("exfiltration")
}

pub struct AlertLifecycle {
    pool: PgPool,
    notifier: Arc<dyn Notify>,
}

impl AlertLifecycle {
    pub fn new(pool: PgPool, notifier: Arc<dyn Notify>) -> Self {
        Self { pool, notifier }
    }

    /// Create an alert from a detected audit event. Source and detection
    /// fields are immutable from here on. Critical and high alerts notify
    /// synchronously; individual channel failures are recorded on the
    /// alert and never fail creation.
    pub async fn create_from_event(
        &self,
        event: &AuditEvent,
        frameworks: Vec<String>,
    ) -> AppResult<Alert> {
        let (alert_type, category) = classify(event);
        let severity = derive_severity(event);
        let priority = derive_priority(severity, event.risk_score);
        let data_exposure = detects_data_exposure(event);
        let now = Utc::now();

        let alert = Alert::insert(
            &self.pool,
            NewAlert {
                tenant_id: event.tenant_id,
                alert_type: alert_type.to_string(),
                category,
                severity,
                priority,
                event_ids: vec![event.id.to_string()],
                detected_by: Some(event.event_type.clone()),
                rule_ref: event
                    .data
                    .get("rule_ref")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                detection_method: Some(if event.is_anomalous() {
                    "anomaly".to_string()
                } else {
                    "rule".to_string()
                }),
                confidence: event.risk_score.clamp(0, 100),
                scope: event.category.clone(),
                affected_resources: event.resource.iter().cloned().collect(),
                affected_principals: event.actor.iter().cloned().collect(),
                data_exposure,
                frameworks: frameworks.clone(),
                breach_deadline: breach_deadline(&frameworks, data_exposure, now),
            },
        )
        .await?;

        Alert::record_action(&self.pool, alert.id, "created", "system", None).await?;

        tracing::info!(
            alert_id = %alert.id,
            tenant_id = %alert.tenant_id,
            severity = %alert.severity,
            alert_type = %alert.alert_type,
            "alert created"
        );

        // Best-effort correlation pass; a failure here never fails creation
        if let Err(err) = correlator::correlate(&self.pool, alert.tenant_id, alert.id, None).await {
            tracing::warn!(alert_id = %alert.id, error = %err, "correlation pass failed");
        }

        if matches!(severity, Severity::Critical | Severity::High) {
            self.notify_alert(&alert, "alert_created").await;
        }

        Alert::find_by_id(&self.pool, alert.tenant_id, alert.id)
            .await?
            .ok_or_else(|| AppError::Internal("alert vanished after insert".to_string()))
    }

    pub async fn acknowledge(&self, tenant_id: Uuid, id: Uuid, actor: &str) -> AppResult<Alert> {
        let existing = self.require(tenant_id, id).await?;
        let updated = Alert::acknowledge(&self.pool, id, actor).await?;
        match updated {
            Some(alert) => {
                Alert::record_action(&self.pool, id, "acknowledged", actor, None).await?;
                Ok(alert)
            }
            None if existing.acknowledged_at.is_some() => Err(AppError::InvalidStateTransition(
                "alert is already acknowledged".to_string(),
            )),
            None => Err(AppError::InvalidStateTransition(format!(
                "alert cannot be acknowledged from status '{}'",
                existing.status
            ))),
        }
    }

    pub async fn assign(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        actor: &str,
        assignee: &str,
        team: Option<&str>,
    ) -> AppResult<Alert> {
        let existing = self.require(tenant_id, id).await?;
        let updated = Alert::assign(&self.pool, id, assignee, team)
            .await?
            .ok_or_else(|| {
                AppError::InvalidStateTransition(format!(
                    "alert cannot be assigned from status '{}'",
                    existing.status
                ))
            })?;

        Alert::record_action(&self.pool, id, "assigned", actor, Some(assignee)).await?;

        let records = dispatch_all(
            &self.notifier,
            &[Channel::InApp, Channel::Email],
            &[assignee.to_string()],
            "alert_assigned",
            &serde_json::json!({
                "alert_id": id,
                "severity": updated.severity,
                "assigned_by": actor,
            }),
        )
        .await;
        self.record_deliveries(id, records).await;

        Ok(updated)
    }

    pub async fn add_finding(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        actor: &str,
        finding: String,
    ) -> AppResult<Alert> {
        let existing = self.require(tenant_id, id).await?;
        let entry = serde_json::json!({
            "finding": finding,
            "actor": actor,
            "recorded_at": Utc::now(),
        });
        Alert::append_finding(&self.pool, id, entry).await?.ok_or_else(|| {
            AppError::InvalidStateTransition(format!(
                "findings cannot be added in terminal status '{}'",
                existing.status
            ))
        })
    }

    pub async fn add_evidence(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        actor: &str,
        evidence: serde_json::Value,
    ) -> AppResult<Alert> {
        let existing = self.require(tenant_id, id).await?;
        let entry = serde_json::json!({
            "evidence": evidence,
            "actor": actor,
            "recorded_at": Utc::now(),
        });
        Alert::append_evidence(&self.pool, id, entry).await?.ok_or_else(|| {
            AppError::InvalidStateTransition(format!(
                "evidence cannot be added in terminal status '{}'",
                existing.status
            ))
        })
    }

    pub async fn resolve(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        actor: &str,
        resolution: &str,
    ) -> AppResult<Alert> {
        let existing = self.require(tenant_id, id).await?;
        let updated = Alert::resolve(&self.pool, id, actor, resolution).await?;
        match updated {
            Some(alert) => {
                Alert::record_action(&self.pool, id, "resolved", actor, Some(resolution)).await?;
                tracing::info!(alert_id = %id, actor, "alert resolved");
                Ok(alert)
            }
            None => Err(AppError::InvalidStateTransition(format!(
                "alert is already terminal in status '{}'",
                existing.status
            ))),
        }
    }

    /// Terminal false-positive transition. The bumped false-positive score
    /// is the feedback signal read back by the upstream detector.
    pub async fn mark_false_positive(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        actor: &str,
        reason: &str,
    ) -> AppResult<Alert> {
        let existing = self.require(tenant_id, id).await?;
        let updated = Alert::mark_false_positive(&self.pool, id, actor, reason).await?;
        match updated {
            Some(alert) => {
                Alert::record_action(&self.pool, id, "false_positive", actor, Some(reason)).await?;
                Ok(alert)
            }
            None => Err(AppError::InvalidStateTransition(format!(
                "alert cannot be marked false positive from status '{}'",
                existing.status
            ))),
        }
    }

    /// Move an open alert into mitigation.
    pub async fn start_mitigation(&self, tenant_id: Uuid, id: Uuid, actor: &str) -> AppResult<Alert> {
        let existing = self.require(tenant_id, id).await?;
        let updated = Alert::set_status(&self.pool, id, AlertStatus::Mitigating)
            .await?
            .ok_or_else(|| {
                AppError::InvalidStateTransition(format!(
                    "alert cannot enter mitigation from status '{}'",
                    existing.status
                ))
            })?;
        Alert::record_action(&self.pool, id, "mitigating", actor, None).await?;
        Ok(updated)
    }

    /// Raise the escalation level (default: one above current) and notify
    /// the contact configured for that level. The level never decreases.
    pub async fn escalate(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        level: Option<i32>,
        reason: &str,
        escalated_to: Option<&str>,
    ) -> AppResult<Alert> {
        let existing = self.require(tenant_id, id).await?;
        if existing.status_enum().is_terminal() {
            return Err(AppError::InvalidStateTransition(format!(
                "terminal alert in status '{}' cannot be escalated",
                existing.status
            )));
        }

        let target = level.unwrap_or(existing.escalation_level + 1);
        if target <= existing.escalation_level {
            return Err(AppError::InvalidStateTransition(format!(
                "escalation level may not decrease ({} -> {})",
                existing.escalation_level, target
            )));
        }

        let updated = Alert::escalate(&self.pool, id, target).await?.ok_or_else(|| {
            AppError::InvalidStateTransition("alert escalation raced a terminal transition".to_string())
        })?;

        let contact = escalated_to
            .map(|s| s.to_string())
            .unwrap_or_else(|| escalation_contact(target).to_string());

        Alert::record_action(&self.pool, id, "escalated", contact.as_str(), Some(reason)).await?;

        tracing::warn!(
            alert_id = %id,
            level = target,
            contact = %contact,
            reason,
            "alert escalated"
        );

        let records = dispatch_all(
            &self.notifier,
            &default_channels(updated.severity_enum()),
            &[contact],
            "alert_escalated",
            &serde_json::json!({
                "alert_id": id,
                "level": target,
                "reason": reason,
                "severity": updated.severity,
            }),
        )
        .await;
        self.record_deliveries(id, records).await;

        Ok(updated)
    }

    /// One pass of the SLA sweep: escalate every open alert that requires
    /// it. Returns how many alerts were escalated.
    pub async fn sweep_overdue(&self) -> AppResult<usize> {
        let now = Utc::now();
        let open = Alert::list_all_open(&self.pool).await?;
        let mut escalated = 0;

        for alert in open {
            if !sla::requires_escalation(&alert, now) {
                continue;
            }
            let reason = if sla::is_overdue(&alert, now) {
                "sla_overdue"
            } else if alert.escalation_requested {
                "escalation_requested"
            } else {
                "critical_unacknowledged"
            };
            match self
                .escalate(alert.tenant_id, alert.id, None, reason, None)
                .await
            {
                Ok(_) => escalated += 1,
                // Races with operators resolving alerts mid-sweep are fine
                Err(AppError::InvalidStateTransition(_)) => {}
                Err(err) => {
                    tracing::error!(alert_id = %alert.id, error = %err, "sweep escalation failed")
                }
            }
        }

        if escalated > 0 {
            tracing::info!(escalated, "SLA sweep escalated alerts");
        }
        Ok(escalated)
    }

    async fn notify_alert(&self, alert: &Alert, template: &str) {
        let channels = default_channels(alert.severity_enum());
        let records = dispatch_all(
            &self.notifier,
            &channels,
            &[escalation_contact(1).to_string()],
            template,
            &serde_json::json!({
                "alert_id": alert.id,
                "tenant_id": alert.tenant_id,
                "severity": alert.severity,
                "alert_type": alert.alert_type,
                "priority": alert.priority,
            }),
        )
        .await;
        self.record_deliveries(alert.id, records).await;
    }

    async fn record_deliveries(&self, id: Uuid, records: Vec<crate::notify::DeliveryRecord>) {
        if records.is_empty() {
            return;
        }
        let json = serde_json::json!(records);
        if let Err(err) = Alert::record_notifications(&self.pool, id, json).await {
            tracing::error!(alert_id = %id, error = %err, "failed to record deliveries");
        }
    }

    async fn require(&self, tenant_id: Uuid, id: Uuid) -> AppResult<Alert> {
        Alert::find_by_id(&self.pool, tenant_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Alert not found".to_string()))
    }
}

/// Periodic SLA sweep task. Spawned at startup next to the HTTP server.
pub async fn run_sla_sweep(lifecycle: Arc<AlertLifecycle>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        if let Err(err) = lifecycle.sweep_overdue().await {
            tracing::error!(error = %err, "SLA sweep pass failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, risk: i32, indicators: serde_json::Value) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            severity: None,
            risk_score: risk,
            category: None,
            actor: Some("alice".to_string()),
            resource: Some("db-prod".to_string()),
            threat_indicators: indicators,
            data: serde_json::json!({}),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn classification_precedence() {
        let anomalous = event("login", 10, serde_json::json!(["anomaly"]));
        assert_eq!(classify(&anomalous).0, "anomaly_detection");

        let auth = event("auth_failure", 10, serde_json::json!([]));
        assert_eq!(classify(&auth).0, "authentication_failure");

        let risky = event("config_change", 85, serde_json::json!([]));
        assert_eq!(classify(&risky).0, "high_risk_activity");

        let plain = event("config_change", 20, serde_json::json!([]));
        assert_eq!(classify(&plain).0, "security_event");
    }

    #[test]
    fn severity_from_event_or_risk_score() {
        let mut e = event("x", 95, serde_json::json!([]));
        assert_eq!(derive_severity(&e), Severity::Critical);
        e.severity = Some("low".to_string());
        assert_eq!(derive_severity(&e), Severity::Low);
        e.severity = None;
        e.risk_score = 0;
        assert_eq!(derive_severity(&e), Severity::Info);
    }

    #[test]
    fn priority_bump_floors_at_one() {
        assert_eq!(derive_priority(Severity::Critical, 95), 1);
        assert_eq!(derive_priority(Severity::Critical, 50), 1);
        assert_eq!(derive_priority(Severity::High, 95), 1);
        assert_eq!(derive_priority(Severity::High, 50), 2);
        assert_eq!(derive_priority(Severity::Medium, 91), 2);
        assert_eq!(derive_priority(Severity::Info, 0), 5);
    }

    #[test]
    fn channels_by_severity() {
        assert_eq!(default_channels(Severity::Low), vec![Channel::InApp]);
        assert_eq!(
            default_channels(Severity::High),
            vec![Channel::InApp, Channel::Email]
        );
        assert_eq!(
            default_channels(Severity::Critical),
            vec![Channel::InApp, Channel::Email, Channel::Pager]
        );
    }

    #[test]
    fn breach_deadline_needs_framework_and_exposure() {
        let created = Utc::now();
        let gdpr = vec!["GDPR".to_string()];

        let deadline = breach_deadline(&gdpr, true, created).unwrap();
        assert_eq!(deadline, created + Duration::hours(72));

        assert!(breach_deadline(&gdpr, false, created).is_none());
        assert!(breach_deadline(&["SOC2".to_string()], true, created).is_none());

        // Tightest clock wins when several frameworks apply
        let both = vec!["GDPR".to_string(), "HIPAA".to_string()];
        assert_eq!(
            breach_deadline(&both, true, created).unwrap(),
            created + Duration::hours(72)
        );
    }

    #[test]
    fn escalation_contacts_saturate_at_top_level() {
        assert_eq!(escalation_contact(1), "security-oncall");
        assert_eq!(escalation_contact(4), "ciso");
        assert_eq!(escalation_contact(99), "ciso");
    }
}
