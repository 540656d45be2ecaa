//! Compliance gap engine
//!
//! Scores control-implementation completeness into gap/maturity reports.
//! No state machine of its own; it shares the alert severity/priority
//! vocabulary and folds in the lifecycle's escalation signal so frameworks
//! under active incident pressure surface first.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    Implemented,
    Partial,
    Missing,
}

/// One assessed control, as submitted by the caller.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ControlAssessment {
    #[validate(length(min = 1))]
    pub control_id: String,
    pub name: String,
    pub status: ControlStatus,
    /// Implementation maturity, 0 (absent) to 5 (optimizing).
    #[validate(range(min = 0, max = 5))]
    pub maturity: u8,
    /// How bad a miss on this control is.
    pub criticality: Severity,
}

/// A control that is not fully implemented.
#[derive(Debug, Clone, Serialize)]
pub struct ControlGap {
    pub control_id: String,
    pub name: String,
    pub status: ControlStatus,
    pub severity: Severity,
    pub priority: i32,
    pub recommendation: String,
}

#[derive(Debug, Serialize)]
pub struct GapReport {
    pub framework: String,
    pub total_controls: usize,
    pub implemented: usize,
    pub partial: usize,
    pub missing: usize,
    /// Implemented counts fully, partial counts half.
    pub coverage_pct: f64,
    pub avg_maturity: f64,
    pub maturity_level: &'static str,
    /// Escalated, still-open critical alerts touching this framework.
    pub escalated_critical_alerts: i64,
    pub under_incident_pressure: bool,
    pub gaps: Vec<ControlGap>,
}

pub fn maturity_level(avg: f64) -> &'static str {
    match avg {
        a if a < 1.0 => "initial",
        a if a < 2.0 => "repeatable",
        a if a < 3.0 => "defined",
        a if a < 4.0 => "managed",
        _ => "optimizing",
    }
}

/// Build the gap report for one framework. `escalated_critical` is the
/// escalation signal from the alert lifecycle; when non-zero, missing
/// controls are bumped one priority level (floor 1).
pub fn assess(
    framework: &str,
    controls: &[ControlAssessment],
    escalated_critical: i64,
) -> GapReport {
    let total = controls.len();
    let implemented = controls
        .iter()
        .filter(|c| c.status == ControlStatus::Implemented)
        .count();
    let partial = controls
        .iter()
        .filter(|c| c.status == ControlStatus::Partial)
        .count();
    let missing = total - implemented - partial;

    let coverage_pct = if total == 0 {
        100.0
    } else {
        (implemented as f64 + partial as f64 * 0.5) / total as f64 * 100.0
    };

    let avg_maturity = if total == 0 {
        0.0
    } else {
        controls.iter().map(|c| c.maturity as f64).sum::<f64>() / total as f64
    };

    let under_pressure = escalated_critical > 0;

    let mut gaps: Vec<ControlGap> = controls
        .iter()
        .filter(|c| c.status != ControlStatus::Implemented)
        .map(|c| {
            let mut priority = c.criticality.base_priority();
            if under_pressure && c.status == ControlStatus::Missing {
                priority = (priority - 1).max(1);
            }
            ControlGap {
                control_id: c.control_id.clone(),
                name: c.name.clone(),
                status: c.status,
                severity: c.criticality,
                priority,
                recommendation: match c.status {
                    ControlStatus::Missing => {
                        format!("Implement control {} ({})", c.control_id, c.name)
                    }
                    _ => format!("Complete the partial implementation of {}", c.control_id),
                },
            }
        })
        .collect();
    gaps.sort_by_key(|g| g.priority);

    GapReport {
        framework: framework.to_string(),
        total_controls: total,
        implemented,
        partial,
        missing,
        coverage_pct,
        avg_maturity,
        maturity_level: maturity_level(avg_maturity),
        escalated_critical_alerts: escalated_critical,
        under_incident_pressure: under_pressure,
        gaps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(id: &str, status: ControlStatus, maturity: u8, criticality: Severity) -> ControlAssessment {
        ControlAssessment {
            control_id: id.to_string(),
            name: format!("Control {id}"),
            status,
            maturity,
            criticality,
        }
    }

    #[test]
    fn coverage_counts_partial_as_half() {
        let controls = vec![
            control("A.1", ControlStatus::Implemented, 4, Severity::High),
            control("A.2", ControlStatus::Partial, 2, Severity::Medium),
            control("A.3", ControlStatus::Missing, 0, Severity::Critical),
            control("A.4", ControlStatus::Implemented, 3, Severity::Low),
        ];
        let report = assess("ISO27001", &controls, 0);
        assert_eq!(report.total_controls, 4);
        assert_eq!(report.implemented, 2);
        assert_eq!(report.partial, 1);
        assert_eq!(report.missing, 1);
        assert!((report.coverage_pct - 62.5).abs() < f64::EPSILON);
        assert_eq!(report.gaps.len(), 2);
    }

    #[test]
    fn escalation_signal_bumps_missing_control_priority() {
        let controls = vec![control("A.1", ControlStatus::Missing, 0, Severity::Medium)];

        let calm = assess("SOC2", &controls, 0);
        assert_eq!(calm.gaps[0].priority, 3);
        assert!(!calm.under_incident_pressure);

        let pressured = assess("SOC2", &controls, 2);
        assert_eq!(pressured.gaps[0].priority, 2);
        assert!(pressured.under_incident_pressure);
    }

    #[test]
    fn gaps_sorted_most_urgent_first() {
        let controls = vec![
            control("L", ControlStatus::Missing, 0, Severity::Low),
            control("C", ControlStatus::Missing, 0, Severity::Critical),
        ];
        let report = assess("SOC2", &controls, 0);
        assert_eq!(report.gaps[0].control_id, "C");
    }

    #[test]
    fn maturity_labels() {
        assert_eq!(maturity_level(0.5), "initial");
        assert_eq!(maturity_level(1.5), "repeatable");
        assert_eq!(maturity_level(2.5), "defined");
        assert_eq!(maturity_level(3.5), "managed");
        assert_eq!(maturity_level(4.2), "optimizing");
    }

    #[test]
    fn empty_assessment_is_fully_covered() {
        let report = assess("SOC2", &[], 0);
        assert_eq!(report.coverage_pct, 100.0);
        assert_eq!(report.maturity_level, "initial");
        assert!(report.gaps.is_empty());
    }
}
