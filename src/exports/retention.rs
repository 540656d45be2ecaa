//! Retention policy
//!
//! Pure mapping from an export's declared purpose and legal-hold flag to
//! an expiry date and an auto-delete decision. The windows are fixed
//! constants; tenant-level overrides would live behind the same functions.

use crate::models::ExportJob;
use chrono::{DateTime, Duration, Utc};

/// Retention window in days per declared purpose.
pub fn retention_days(purpose: &str) -> i64 {
    match purpose {
        "regulatory_compliance" => 2555, // ~7 years
        "legal_discovery" => 3650,       // ~10 years
        "internal_audit" => 1095,        // ~3 years
        "investigation" => 730,          // ~2 years
        "backup" => 365,
        "data_subject_request" => 30,
        _ => 90,
    }
}

pub fn compute_expiry(purpose: &str, created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at + Duration::days(retention_days(purpose))
}

/// Auto-deletion is allowed only once expired, only when the job opted in,
/// and never under legal hold.
pub fn can_auto_delete(job: &ExportJob, now: DateTime<Utc>) -> bool {
    if job.legal_hold {
        return false;
    }
    if !job.auto_delete {
        return false;
    }
    match job.retention_expires_at {
        Some(expiry) => expiry <= now,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::sample_job;

    #[test]
    fn retention_table() {
        assert_eq!(retention_days("regulatory_compliance"), 2555);
        assert_eq!(retention_days("legal_discovery"), 3650);
        assert_eq!(retention_days("internal_audit"), 1095);
        assert_eq!(retention_days("investigation"), 730);
        assert_eq!(retention_days("backup"), 365);
        assert_eq!(retention_days("data_subject_request"), 30);
        assert_eq!(retention_days("unspecified"), 90);
        assert_eq!(retention_days("anything-else"), 90);
    }

    #[test]
    fn investigation_expiry_is_two_years_out() {
        let created = Utc::now();
        let expiry = compute_expiry("investigation", created);
        assert_eq!(expiry - created, Duration::days(730));
    }

    #[test]
    fn legal_hold_always_vetoes_auto_delete() {
        let now = Utc::now();
        let mut job = sample_job("backup", now - Duration::days(400));
        job.retention_expires_at = Some(now - Duration::days(35));
        assert!(can_auto_delete(&job, now));

        job.legal_hold = true;
        assert!(!can_auto_delete(&job, now));
    }

    #[test]
    fn unexpired_or_opted_out_jobs_are_kept() {
        let now = Utc::now();
        let mut job = sample_job("backup", now);
        job.retention_expires_at = Some(now + Duration::days(10));
        assert!(!can_auto_delete(&job, now));

        job.retention_expires_at = Some(now - Duration::days(1));
        job.auto_delete = false;
        assert!(!can_auto_delete(&job, now));

        job.auto_delete = true;
        job.retention_expires_at = None;
        assert!(!can_auto_delete(&job, now));
    }
}
