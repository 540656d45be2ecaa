//! Export pipeline
//!
//! Owns the export job state machine. Batched extraction runs in the
//! worker module; everything here is the operation surface: create, claim,
//! progress, completion, retry, deletion under retention policy, retention
//! extension, and integrity verification.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::exports::{integrity, retention};
use crate::models::{ExportFile, ExportJob, ExportState, NewExportJob, RetentionExtension};
use crate::notify::{dispatch_all, Channel, Notify};
use crate::storage::ArtifactStore;

/// Summary figures derived at completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionSummary {
    pub total_size: i64,
    pub processing_time_ms: i64,
    pub export_rate: f64,
}

/// Total artifact size, wall-clock processing time, and records/second.
/// Rate is zero for an instantaneous (or clock-skewed) run.
pub fn summarize(
    record_count: i64,
    files: &[ExportFile],
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
) -> CompletionSummary {
    let total_size = files.iter().map(|f| f.size as i64).sum();
    let processing_time_ms = (completed_at - started_at).num_milliseconds().max(0);
    let export_rate = if processing_time_ms > 0 {
        record_count as f64 / (processing_time_ms as f64 / 1000.0)
    } else {
        0.0
    };
    CompletionSummary {
        total_size,
        processing_time_ms,
        export_rate,
    }
}

/// Exponential backoff for retried jobs, capped at an hour.
pub fn retry_backoff(retry_count: i32) -> Duration {
    let secs = 30i64.saturating_mul(1 << retry_count.clamp(0, 7));
    Duration::seconds(secs.min(3600))
}

/// A failed job reschedules only while retries remain; the failure that
/// exhausts the budget is terminal.
pub fn should_retry(retry_count: i32, max_retries: i32) -> bool {
    retry_count < max_retries
}

/// Build the extension record: the expiry moves exactly `days` further
/// from its current value.
pub fn plan_extension(
    current_expiry: DateTime<Utc>,
    days: i64,
    reason: &str,
    actor: &str,
    now: DateTime<Utc>,
) -> RetentionExtension {
    RetentionExtension {
        days,
        reason: reason.to_string(),
        actor: actor.to_string(),
        extended_at: now,
        new_expiry: current_expiry + Duration::days(days),
    }
}

pub struct ExportPipeline {
    pool: PgPool,
    store: Arc<dyn ArtifactStore>,
    notifier: Arc<dyn Notify>,
}

impl ExportPipeline {
    pub fn new(pool: PgPool, store: Arc<dyn ArtifactStore>, notifier: Arc<dyn Notify>) -> Self {
        Self {
            pool,
            store,
            notifier,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Create a pending job. A caller-supplied retention expiry wins;
    /// otherwise the retention policy stamps one from the declared purpose.
    pub async fn create(&self, mut data: NewExportJob) -> AppResult<ExportJob> {
        if data.range_end <= data.range_start {
            return Err(AppError::Validation(
                "export range end must be after range start".to_string(),
            ));
        }
        if data.retention_expires_at.is_none() {
            data.retention_expires_at = Some(retention::compute_expiry(&data.purpose, Utc::now()));
        }

        let requested_by = data.requested_by.clone();
        let job = ExportJob::insert(&self.pool, data).await?;
        integrity::append_custody(&self.pool, job.id, "created", &requested_by, None, None).await?;

        tracing::info!(
            export_id = %job.id,
            tenant_id = %job.tenant_id,
            purpose = %job.purpose,
            "export job created"
        );
        Ok(job)
    }

    /// Claim the next due pending job for a worker. None means nothing is
    /// eligible, which is not an error.
    pub async fn claim_next(&self, worker_id: &str) -> AppResult<Option<ExportJob>> {
        let claimed = ExportJob::claim_next(&self.pool, worker_id).await?;
        if let Some(job) = &claimed {
            integrity::append_custody(&self.pool, job.id, "claimed", worker_id, None, None).await?;
            tracing::info!(export_id = %job.id, worker_id, "export job claimed");
        }
        Ok(claimed)
    }

    pub async fn update_progress(
        &self,
        job_id: Uuid,
        current: i64,
        total: i64,
        phase: &str,
    ) -> AppResult<()> {
        ExportJob::update_progress(&self.pool, job_id, current, total, phase).await?;
        Ok(())
    }

    /// Terminal completion: summary figures, integrity seal, retention
    /// stamp, then fire-and-forget notifications.
    pub async fn complete(
        &self,
        job_id: Uuid,
        record_count: i64,
        files: Vec<ExportFile>,
    ) -> AppResult<ExportJob> {
        if files.is_empty() {
            return Err(AppError::Validation(
                "a completed export must have at least one artifact".to_string(),
            ));
        }

        let job = self.require_any(job_id).await?;
        if job.state_enum() != ExportState::Processing {
            return Err(AppError::InvalidStateTransition(format!(
                "export in state '{}' cannot be completed",
                job.state
            )));
        }

        let now = Utc::now();
        let summary = summarize(
            record_count,
            &files,
            job.started_at.unwrap_or(job.created_at),
            now,
        );
        let fallback_expiry = retention::compute_expiry(&job.purpose, job.created_at);

        // Sealed in the same statement as the state flip: a completed row
        // is never observable without its digest
        let digest = integrity::completion_digest(&job, record_count, &files);

        let completed = ExportJob::complete(
            &self.pool,
            job_id,
            record_count,
            serde_json::json!(files),
            summary.total_size,
            summary.processing_time_ms,
            summary.export_rate,
            &digest,
            Some(fallback_expiry),
        )
        .await?
        .ok_or_else(|| {
            AppError::InvalidStateTransition("export completion raced another transition".to_string())
        })?;

        let actor = completed.worker_actor().to_string();
        integrity::append_custody(&self.pool, job_id, "sealed", &actor, Some(&digest), None)
            .await?;

        tracing::info!(
            export_id = %job_id,
            records = record_count,
            bytes = summary.total_size,
            "export job completed"
        );

        let records = dispatch_all(
            &self.notifier,
            &[Channel::InApp, Channel::Email, Channel::Webhook],
            &[completed.requested_by.clone()],
            "export_completed",
            &serde_json::json!({
                "export_id": job_id,
                "record_count": record_count,
                "total_size": summary.total_size,
            }),
        )
        .await;
        let failures = records.iter().filter(|r| !r.ok).count();
        if failures > 0 {
            tracing::warn!(export_id = %job_id, failures, "completion notifications degraded");
        }

        Ok(completed)
    }

    /// Record a processing failure. With retry budget left the job returns
    /// to pending behind an exponential backoff; otherwise it fails
    /// terminally and failure notifications fire.
    pub async fn fail(&self, job_id: Uuid, error: &str) -> AppResult<ExportJob> {
        let job = self.require_any(job_id).await?;
        if job.state_enum() != ExportState::Processing {
            return Err(AppError::InvalidStateTransition(format!(
                "export in state '{}' cannot be failed",
                job.state
            )));
        }

        if should_retry(job.retry_count, job.max_retries) {
            let next_run = Utc::now() + retry_backoff(job.retry_count);
            if let Some(retried) =
                ExportJob::fail_retry(&self.pool, job_id, error, next_run).await?
            {
                tracing::warn!(
                    export_id = %job_id,
                    retry = retried.retry_count,
                    max = retried.max_retries,
                    error,
                    "export failed, scheduled for retry"
                );
                return Ok(retried);
            }
        }

        let failed = ExportJob::fail_terminal(&self.pool, job_id, error)
            .await?
            .ok_or_else(|| {
                AppError::InvalidStateTransition("export failure raced another transition".to_string())
            })?;

        tracing::error!(export_id = %job_id, error, "export failed terminally");

        let records = dispatch_all(
            &self.notifier,
            &[Channel::InApp, Channel::Email, Channel::Webhook],
            &[failed.requested_by.clone()],
            "export_failed",
            &serde_json::json!({
                "export_id": job_id,
                "error": error,
                "retries": failed.retry_count,
            }),
        )
        .await;
        if records.iter().any(|r| !r.ok) {
            tracing::warn!(export_id = %job_id, "failure notifications degraded");
        }

        Ok(failed)
    }

    /// Terminal failure bypassing the retry budget. Used when the operator
    /// cancelled the job; a cancelled export must never resurrect itself.
    pub async fn fail_without_retry(&self, job_id: Uuid, error: &str) -> AppResult<ExportJob> {
        let failed = ExportJob::fail_terminal(&self.pool, job_id, error)
            .await?
            .ok_or_else(|| {
                AppError::InvalidStateTransition(
                    "export cancellation raced another transition".to_string(),
                )
            })?;
        let actor = failed.worker_actor().to_string();
        integrity::append_custody(&self.pool, job_id, "cancelled", &actor, None, Some(error))
            .await?;
        tracing::warn!(export_id = %job_id, error, "export failed without retry");
        Ok(failed)
    }

    /// Request cooperative cancellation of a processing job. The worker
    /// observes the flag between batches, cleans up partial artifacts, and
    /// fails the job terminally.
    pub async fn cancel(&self, tenant_id: Uuid, job_id: Uuid, actor: &str) -> AppResult<ExportJob> {
        let job = self.require(tenant_id, job_id).await?;
        let updated = ExportJob::request_cancel(&self.pool, job_id)
            .await?
            .ok_or_else(|| {
                AppError::InvalidStateTransition(format!(
                    "only processing exports can be cancelled (state '{}')",
                    job.state
                ))
            })?;
        integrity::append_custody(&self.pool, job_id, "cancel_requested", actor, None, None).await?;
        Ok(updated)
    }

    /// Delete an export and its artifacts. Refused outright under legal
    /// hold; per-file deletion errors are logged and skipped so one bad
    /// blob never wedges the record.
    pub async fn mark_for_deletion(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        actor: &str,
    ) -> AppResult<ExportJob> {
        let job = self.require(tenant_id, job_id).await?;
        if job.legal_hold {
            return Err(AppError::LegalHoldActive);
        }
        if job.state_enum() == ExportState::Processing {
            return Err(AppError::InvalidStateTransition(
                "a processing export cannot be deleted".to_string(),
            ));
        }

        for file in job.files_list() {
            if let Err(err) = self.store.delete(&file.location).await {
                tracing::warn!(
                    export_id = %job_id,
                    location = %file.location,
                    error = %err,
                    "artifact deletion failed, continuing"
                );
            }
        }

        let deleted = ExportJob::mark_deleted(&self.pool, job_id)
            .await?
            .ok_or(AppError::LegalHoldActive)?;

        integrity::append_custody(
            &self.pool,
            job_id,
            "deleted",
            actor,
            job.integrity_digest.as_deref(),
            None,
        )
        .await?;
        tracing::info!(export_id = %job_id, actor, "export deleted");
        Ok(deleted)
    }

    pub async fn extend_retention(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        days: i64,
        reason: &str,
        actor: &str,
    ) -> AppResult<ExportJob> {
        if days <= 0 {
            return Err(AppError::Validation(
                "retention extension must be a positive number of days".to_string(),
            ));
        }
        let job = self.require(tenant_id, job_id).await?;
        let current_expiry = job.retention_expires_at.ok_or_else(|| {
            AppError::InvalidStateTransition("export has no retention expiry to extend".to_string())
        })?;

        let extension = plan_extension(current_expiry, days, reason, actor, Utc::now());

        let updated = ExportJob::extend_retention(&self.pool, job_id, days, &extension)
            .await?
            .ok_or_else(|| {
                AppError::InvalidStateTransition("export retention cannot be extended".to_string())
            })?;

        integrity::append_custody(
            &self.pool,
            job_id,
            "retention_extended",
            actor,
            None,
            Some(reason),
        )
        .await?;
        Ok(updated)
    }

    /// Recompute the digest and compare against the sealed value. A
    /// mismatch is a security-relevant event: logged, recorded in the
    /// custody chain, and returned as a failed verification.
    pub async fn verify(&self, tenant_id: Uuid, job_id: Uuid, actor: &str) -> AppResult<bool> {
        let job = self.require(tenant_id, job_id).await?;
        let stored = job.integrity_digest.clone().ok_or_else(|| {
            AppError::InvalidStateTransition("export has not been sealed yet".to_string())
        })?;

        let recomputed = integrity::digest(&job);
        let verified = recomputed == stored;

        ExportJob::record_verification(&self.pool, job_id, verified).await?;
        if verified {
            integrity::append_custody(
                &self.pool,
                job_id,
                "verified",
                actor,
                Some(&recomputed),
                None,
            )
            .await?;
        } else {
            tracing::warn!(
                export_id = %job_id,
                tenant_id = %tenant_id,
                stored,
                recomputed,
                "SECURITY: export integrity digest mismatch"
            );
            integrity::append_custody(
                &self.pool,
                job_id,
                "verification_failed",
                actor,
                Some(&recomputed),
                Some("digest mismatch against sealed value"),
            )
            .await?;
        }
        Ok(verified)
    }

    /// Signed download URLs for a completed export's artifacts.
    pub async fn signed_urls(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        actor: &str,
        ttl_seconds: u64,
    ) -> AppResult<Vec<(String, String)>> {
        let job = self.require(tenant_id, job_id).await?;
        if job.state_enum() != ExportState::Completed {
            return Err(AppError::InvalidStateTransition(format!(
                "download URLs are only issued for completed exports (state '{}')",
                job.state
            )));
        }

        let urls: Vec<(String, String)> = job
            .files_list()
            .into_iter()
            .map(|f| {
                let url = self.store.signed_url(&f.location, ttl_seconds);
                (f.filename, url)
            })
            .collect();

        integrity::append_custody(&self.pool, job_id, "url_issued", actor, None, None).await?;
        Ok(urls)
    }

    /// One pass of the retention sweep: delete expired exports that opted
    /// into auto-deletion. Legal holds are re-checked per job so a hold
    /// placed mid-sweep still wins.
    pub async fn sweep_expired(&self) -> AppResult<usize> {
        let now = Utc::now();
        let candidates = ExportJob::list_auto_delete_candidates(&self.pool, now, 100).await?;
        let mut deleted = 0;

        for job in candidates {
            if !retention::can_auto_delete(&job, now) {
                continue;
            }
            match self
                .mark_for_deletion(job.tenant_id, job.id, "retention-sweep")
                .await
            {
                Ok(_) => deleted += 1,
                // A hold placed after the candidate query wins
                Err(AppError::LegalHoldActive) => {}
                Err(err) => {
                    tracing::error!(export_id = %job.id, error = %err, "retention sweep delete failed")
                }
            }
        }

        if deleted > 0 {
            tracing::info!(deleted, "retention sweep deleted expired exports");
        }
        Ok(deleted)
    }

    async fn require(&self, tenant_id: Uuid, id: Uuid) -> AppResult<ExportJob> {
        ExportJob::find_by_id(&self.pool, tenant_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Export job not found".to_string()))
    }

    async fn require_any(&self, id: Uuid) -> AppResult<ExportJob> {
        ExportJob::find_any_tenant(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Export job not found".to_string()))
    }
}

/// Background retention sweep loop.
pub async fn run_retention_sweep(pipeline: Arc<ExportPipeline>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        if let Err(err) = pipeline.sweep_expired().await {
            tracing::error!(error = %err, "retention sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(size: u64) -> ExportFile {
        ExportFile {
            filename: "part.jsonl".to_string(),
            size,
            checksum: "c".to_string(),
            location: "loc/part.jsonl".to_string(),
        }
    }

    #[test]
    fn summary_totals_and_rate() {
        let started = Utc::now();
        let completed = started + Duration::seconds(4);
        let summary = summarize(2000, &[file(1024), file(2048)], started, completed);
        assert_eq!(summary.total_size, 3072);
        assert_eq!(summary.processing_time_ms, 4000);
        assert!((summary.export_rate - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_duration_yields_zero_rate() {
        let t = Utc::now();
        let summary = summarize(100, &[file(10)], t, t);
        assert_eq!(summary.processing_time_ms, 0);
        assert_eq!(summary.export_rate, 0.0);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(retry_backoff(0), Duration::seconds(30));
        assert_eq!(retry_backoff(1), Duration::seconds(60));
        assert_eq!(retry_backoff(2), Duration::seconds(120));
        assert_eq!(retry_backoff(10), Duration::seconds(3600));
    }

    #[test]
    fn retry_budget_exhausts_to_terminal() {
        let max = 3;
        // Four failures observe retry counts 0..=3; the first three
        // reschedule, the fourth lands terminal and never re-pends
        assert!(should_retry(0, max));
        assert!(should_retry(1, max));
        assert!(should_retry(2, max));
        assert!(!should_retry(3, max));
        assert!(!should_retry(4, max));
    }

    #[test]
    fn zero_retry_budget_is_terminal_on_first_failure() {
        assert!(!should_retry(0, 0));
    }

    #[test]
    fn extension_moves_expiry_exactly_days_forward() {
        let now = Utc::now();
        let expiry = now + Duration::days(10);
        let ext = plan_extension(expiry, 30, "ongoing litigation", "auditor@example.com", now);
        assert_eq!(ext.new_expiry, expiry + Duration::days(30));
        assert_eq!(ext.days, 30);
        assert_eq!(ext.extended_at, now);
        assert_eq!(ext.reason, "ongoing litigation");
        assert_eq!(ext.actor, "auditor@example.com");
    }
}
