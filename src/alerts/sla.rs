//! SLA policy
//!
//! Pure functions over an alert's age and status. The background sweep in
//! the lifecycle module applies these over open alerts.

use crate::models::{Alert, AlertStatus, Severity};
use chrono::{DateTime, Duration, Utc};

/// Maximum acceptable open time per severity.
pub fn response_window(severity: Severity) -> Duration {
    match severity {
        Severity::Critical => Duration::hours(1),
        Severity::High => Duration::hours(4),
        Severity::Medium => Duration::hours(24),
        Severity::Low => Duration::hours(72),
        Severity::Info => Duration::hours(168),
    }
}

/// An alert is overdue when still open past its severity's window.
/// Monotonic in elapsed time: once overdue, it stays overdue while open.
pub fn is_overdue(alert: &Alert, now: DateTime<Utc>) -> bool {
    if !alert.status_enum().is_open() {
        return false;
    }
    now - alert.created_at > response_window(alert.severity_enum())
}

/// Escalation is required when the alert is overdue, when a critical alert
/// still sits untouched in `new`, or when escalation was explicitly
/// requested.
pub fn requires_escalation(alert: &Alert, now: DateTime<Utc>) -> bool {
    if alert.escalation_requested {
        return true;
    }
    if alert.severity_enum() == Severity::Critical && alert.status_enum() == AlertStatus::New {
        return true;
    }
    is_overdue(alert, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::sample_alert;

    #[test]
    fn overdue_thresholds_per_severity() {
        let created = Utc::now();
        for (severity, hours) in [
            ("critical", 1),
            ("high", 4),
            ("medium", 24),
            ("low", 72),
            ("info", 168),
        ] {
            let alert = sample_alert(severity, "acknowledged", created);
            let just_inside = created + Duration::hours(hours) - Duration::seconds(1);
            let just_past = created + Duration::hours(hours) + Duration::seconds(1);
            assert!(!is_overdue(&alert, just_inside), "{severity} fired early");
            assert!(is_overdue(&alert, just_past), "{severity} did not fire");
        }
    }

    #[test]
    fn overdue_is_monotonic_in_elapsed_time() {
        let created = Utc::now();
        let alert = sample_alert("high", "investigating", created);
        let mut previously_overdue = false;
        for minutes in (0..600).step_by(10) {
            let overdue = is_overdue(&alert, created + Duration::minutes(minutes));
            assert!(overdue >= previously_overdue, "overdue flipped back off");
            previously_overdue = overdue;
        }
        assert!(previously_overdue);
    }

    #[test]
    fn terminal_alerts_are_never_overdue() {
        let created = Utc::now() - Duration::days(30);
        let alert = sample_alert("critical", "resolved", created);
        assert!(!is_overdue(&alert, Utc::now()));
    }

    #[test]
    fn critical_new_requires_escalation_immediately() {
        let created = Utc::now();
        let alert = sample_alert("critical", "new", created);
        assert!(requires_escalation(&alert, created + Duration::seconds(1)));

        // Acknowledged critical inside its window does not
        let acked = sample_alert("critical", "acknowledged", created);
        assert!(!requires_escalation(&acked, created + Duration::minutes(30)));
    }

    #[test]
    fn explicit_request_forces_escalation() {
        let mut alert = sample_alert("low", "acknowledged", Utc::now());
        alert.escalation_requested = true;
        assert!(requires_escalation(&alert, Utc::now()));
    }
}
