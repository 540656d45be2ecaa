//! Export job model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

/// Export job state machine vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    Pending,
    Processing,
    Completed,
    Failed,
    Deleted,
}

impl ExportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportState::Pending => "pending",
            ExportState::Processing => "processing",
            ExportState::Completed => "completed",
            ExportState::Failed => "failed",
            ExportState::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExportState::Pending),
            "processing" => Some(ExportState::Processing),
            "completed" => Some(ExportState::Completed),
            "failed" => Some(ExportState::Failed),
            "deleted" => Some(ExportState::Deleted),
            _ => None,
        }
    }
}

/// One produced artifact. Stored in the job's `files` JSONB list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportFile {
    pub filename: String,
    pub size: u64,
    pub checksum: String,
    pub location: String,
}

/// One retention extension. Stored in the job's `extensions` JSONB list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionExtension {
    pub days: i64,
    pub reason: String,
    pub actor: String,
    pub extended_at: DateTime<Utc>,
    pub new_expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExportJob {
    pub id: Uuid,
    pub tenant_id: Uuid,

    pub export_type: String,
    pub format: String,
    pub compress: bool,
    pub encrypt: bool,

    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub filters: serde_json::Value,

    pub state: String,
    pub priority: i32,
    pub progress_current: i64,
    pub progress_total: i64,
    pub progress_phase: Option<String>,
    pub last_error: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub cancel_requested: bool,
    pub claimed_by: Option<String>,
    pub next_run: Option<DateTime<Utc>>,

    pub record_count: i64,
    pub files: serde_json::Value,
    pub total_size: i64,
    pub processing_time_ms: Option<i64>,
    pub export_rate: Option<f64>,

    pub requested_by: String,
    pub approval_state: String,

    pub purpose: String,
    pub frameworks: serde_json::Value,
    pub legal_hold: bool,
    pub legal_hold_reason: Option<String>,
    pub retention_expires_at: Option<DateTime<Utc>>,
    pub auto_delete: bool,
    pub extensions: serde_json::Value,

    pub integrity_digest: Option<String>,
    pub verified: Option<bool>,
    pub last_verified_at: Option<DateTime<Utc>>,

    pub version: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExportJob {
    pub fn state_enum(&self) -> ExportState {
        ExportState::parse(&self.state).unwrap_or(ExportState::Pending)
    }

    pub fn files_list(&self) -> Vec<ExportFile> {
        serde_json::from_value(self.files.clone()).unwrap_or_default()
    }

    /// Completion percentage from the last persisted progress counters.
    pub fn progress_pct(&self) -> u8 {
        progress_pct(self.progress_current, self.progress_total)
    }

    /// Actor recorded on worker-driven custody entries.
    pub fn worker_actor(&self) -> &str {
        self.claimed_by.as_deref().unwrap_or("worker")
    }
}

/// Rounded completion percentage, saturating at 100.
pub fn progress_pct(current: i64, total: i64) -> u8 {
    if total <= 0 {
        return 0;
    }
    let pct = (current as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone)]
pub struct NewExportJob {
    pub tenant_id: Uuid,
    pub export_type: String,
    pub format: String,
    pub compress: bool,
    pub encrypt: bool,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub filters: serde_json::Value,
    pub priority: i32,
    pub max_retries: i32,
    pub requested_by: String,
    pub purpose: String,
    pub frameworks: Vec<String>,
    pub legal_hold: bool,
    pub legal_hold_reason: Option<String>,
    /// Caller-supplied expiry wins; otherwise the retention policy stamps one.
    pub retention_expires_at: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CustodyEntry {
    pub id: i64,
    pub export_id: Uuid,
    pub action: String,
    pub actor: String,
    pub digest: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ExportStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub deleted: i64,
    pub under_legal_hold: i64,
    pub total_bytes_exported: i64,
    pub avg_processing_secs: Option<f64>,
}

impl ExportJob {
    pub async fn insert(pool: &PgPool, data: NewExportJob) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, ExportJob>(
            r#"
            INSERT INTO export_jobs (
                tenant_id, export_type, format, compress, encrypt,
                range_start, range_end, filters,
                priority, max_retries, requested_by,
                purpose, frameworks, legal_hold, legal_hold_reason,
                retention_expires_at, next_run
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *
            "#,
        )
        .bind(data.tenant_id)
        .bind(&data.export_type)
        .bind(&data.format)
        .bind(data.compress)
        .bind(data.encrypt)
        .bind(data.range_start)
        .bind(data.range_end)
        .bind(&data.filters)
        .bind(data.priority)
        .bind(data.max_retries)
        .bind(&data.requested_by)
        .bind(&data.purpose)
        .bind(serde_json::json!(data.frameworks))
        .bind(data.legal_hold)
        .bind(&data.legal_hold_reason)
        .bind(data.retention_expires_at)
        .bind(data.next_run)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExportJob>("SELECT * FROM export_jobs WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_any_tenant(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExportJob>("SELECT * FROM export_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Exclusive claim of the next due pending job. The inner SELECT with
    /// FOR UPDATE SKIP LOCKED keeps concurrent workers off the same row, so
    /// a job is never handed to two callers.
    pub async fn claim_next(
        pool: &PgPool,
        worker_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExportJob>(
            r#"
            UPDATE export_jobs
            SET state = 'processing', started_at = NOW(), claimed_by = $1,
                progress_phase = 'starting', last_error = NULL,
                version = version + 1, updated_at = NOW()
            WHERE id = (
                SELECT id FROM export_jobs
                WHERE state = 'pending'
                  AND (next_run IS NULL OR next_run <= NOW())
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn update_progress(
        pool: &PgPool,
        id: Uuid,
        current: i64,
        total: i64,
        phase: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE export_jobs
            SET progress_current = $2, progress_total = $3, progress_phase = $4,
                updated_at = NOW()
            WHERE id = $1 AND state = 'processing'
            "#,
        )
        .bind(id)
        .bind(current)
        .bind(total)
        .bind(phase)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Terminal completion. Only valid from processing. The integrity
    /// digest lands in the same statement as the state flip, so a
    /// completed row is never observable unsealed.
    #[allow(clippy::too_many_arguments)]
    pub async fn complete(
        pool: &PgPool,
        id: Uuid,
        record_count: i64,
        files: serde_json::Value,
        total_size: i64,
        processing_time_ms: i64,
        export_rate: f64,
        integrity_digest: &str,
        retention_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExportJob>(
            r#"
            UPDATE export_jobs
            SET state = 'completed', completed_at = NOW(),
                record_count = $2, files = $3, total_size = $4,
                processing_time_ms = $5, export_rate = $6,
                integrity_digest = $7,
                retention_expires_at = COALESCE(retention_expires_at, $8),
                progress_current = progress_total, progress_phase = 'done',
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND state = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(record_count)
        .bind(&files)
        .bind(total_size)
        .bind(processing_time_ms)
        .bind(export_rate)
        .bind(integrity_digest)
        .bind(retention_expires_at)
        .fetch_optional(pool)
        .await
    }

    /// Failure with budget left: back to pending with a deferred next run.
    pub async fn fail_retry(
        pool: &PgPool,
        id: Uuid,
        error: &str,
        next_run: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExportJob>(
            r#"
            UPDATE export_jobs
            SET state = 'pending', last_error = $2, retry_count = retry_count + 1,
                next_run = $3, claimed_by = NULL,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND state = 'processing' AND retry_count < max_retries
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_run)
        .fetch_optional(pool)
        .await
    }

    /// Terminal failure once the retry budget is exhausted (or retries are
    /// not allowed, e.g. operator cancellation).
    pub async fn fail_terminal(
        pool: &PgPool,
        id: Uuid,
        error: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExportJob>(
            r#"
            UPDATE export_jobs
            SET state = 'failed', last_error = $2, cancel_requested = false,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND state = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(pool)
        .await
    }

    /// Terminal deletion. Refused while processing; the legal-hold guard is
    /// enforced at the pipeline layer before artifacts are touched, and
    /// re-checked here.
    pub async fn mark_deleted(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExportJob>(
            r#"
            UPDATE export_jobs
            SET state = 'deleted', version = version + 1, updated_at = NOW()
            WHERE id = $1 AND state <> 'processing' AND legal_hold = false
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn request_cancel(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExportJob>(
            r#"
            UPDATE export_jobs
            SET cancel_requested = true, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND state = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Re-read just the cancellation flag. Polled by the worker between
    /// batches for cooperative cancellation.
    pub async fn cancel_pending(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT cancel_requested FROM export_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|r| r.get::<bool, _>("cancel_requested")).unwrap_or(false))
    }

    pub async fn extend_retention(
        pool: &PgPool,
        id: Uuid,
        days: i64,
        extension: &RetentionExtension,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExportJob>(
            r#"
            UPDATE export_jobs
            SET retention_expires_at = retention_expires_at + make_interval(days => $2::int),
                extensions = extensions || $3::jsonb,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND retention_expires_at IS NOT NULL AND state <> 'deleted'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(days)
        .bind(serde_json::json!([extension]))
        .fetch_optional(pool)
        .await
    }

    /// Return abandoned processing jobs to the queue. A processing row
    /// untouched since before the cutoff belonged to a worker that died
    /// mid-run: jobs with retry budget left go back to pending, the rest
    /// fail terminally.
    pub async fn reclaim_stale(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let failed = sqlx::query(
            r#"
            UPDATE export_jobs
            SET state = 'failed', last_error = 'claim lease expired', claimed_by = NULL,
                version = version + 1, updated_at = NOW()
            WHERE state = 'processing' AND updated_at < $1 AND retry_count >= max_retries
            "#,
        )
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();

        let repended = sqlx::query(
            r#"
            UPDATE export_jobs
            SET state = 'pending', last_error = 'claim lease expired', claimed_by = NULL,
                retry_count = retry_count + 1, next_run = NOW(),
                version = version + 1, updated_at = NOW()
            WHERE state = 'processing' AND updated_at < $1 AND retry_count < max_retries
            "#,
        )
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();

        Ok(failed + repended)
    }

    pub async fn record_verification(
        pool: &PgPool,
        id: Uuid,
        verified: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE export_jobs
            SET verified = $2, last_verified_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(verified)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_pending(
        pool: &PgPool,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExportJob>(
            r#"
            SELECT * FROM export_jobs
            WHERE tenant_id = $1 AND state = 'pending'
            ORDER BY priority DESC, created_at ASC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Completed exports past their retention expiry. Legal holds are kept
    /// out of the sweep entirely.
    pub async fn list_expired(
        pool: &PgPool,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExportJob>(
            r#"
            SELECT * FROM export_jobs
            WHERE tenant_id = $1
              AND state = 'completed'
              AND legal_hold = false
              AND retention_expires_at IS NOT NULL
              AND retention_expires_at <= $2
            ORDER BY retention_expires_at ASC
            "#,
        )
        .bind(tenant_id)
        .bind(now)
        .fetch_all(pool)
        .await
    }

    /// Cross-tenant candidates for the auto-delete retention sweep.
    pub async fn list_auto_delete_candidates(
        pool: &PgPool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExportJob>(
            r#"
            SELECT * FROM export_jobs
            WHERE state = 'completed'
              AND auto_delete = true
              AND legal_hold = false
              AND retention_expires_at IS NOT NULL
              AND retention_expires_at <= $1
            ORDER BY retention_expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn append_custody(
        pool: &PgPool,
        export_id: Uuid,
        action: &str,
        actor: &str,
        digest: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO custody_log (export_id, action, actor, digest, notes)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(export_id)
        .bind(action)
        .bind(actor)
        .bind(digest)
        .bind(notes)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn custody_entries(
        pool: &PgPool,
        export_id: Uuid,
    ) -> Result<Vec<CustodyEntry>, sqlx::Error> {
        sqlx::query_as::<_, CustodyEntry>(
            "SELECT * FROM custody_log WHERE export_id = $1 ORDER BY id ASC",
        )
        .bind(export_id)
        .fetch_all(pool)
        .await
    }

    pub async fn statistics(
        pool: &PgPool,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<ExportStats, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                COUNT(*) FILTER (WHERE state = 'pending') as pending,
                COUNT(*) FILTER (WHERE state = 'processing') as processing,
                COUNT(*) FILTER (WHERE state = 'completed') as completed,
                COUNT(*) FILTER (WHERE state = 'failed') as failed,
                COUNT(*) FILTER (WHERE state = 'deleted') as deleted,
                COUNT(*) FILTER (WHERE legal_hold) as under_legal_hold,
                COALESCE(SUM(total_size) FILTER (WHERE state = 'completed'), 0)::bigint as total_bytes,
                (AVG(processing_time_ms) FILTER (WHERE state = 'completed') / 1000.0)::double precision as avg_secs
            FROM export_jobs
            WHERE tenant_id = $1 AND created_at >= $2
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_one(pool)
        .await?;

        Ok(ExportStats {
            total: row.get("total"),
            pending: row.get("pending"),
            processing: row.get("processing"),
            completed: row.get("completed"),
            failed: row.get("failed"),
            deleted: row.get("deleted"),
            under_legal_hold: row.get("under_legal_hold"),
            total_bytes_exported: row.get("total_bytes"),
            avg_processing_secs: row.get("avg_secs"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_pct_rounds_and_saturates() {
        assert_eq!(progress_pct(0, 0), 0);
        assert_eq!(progress_pct(5, 0), 0);
        assert_eq!(progress_pct(1, 3), 33);
        assert_eq!(progress_pct(2, 3), 67);
        assert_eq!(progress_pct(3, 3), 100);
        assert_eq!(progress_pct(10, 3), 100);
    }

    #[test]
    fn worker_actor_prefers_claimed_by() {
        let mut job = crate::test_util::sample_job("backup", chrono::Utc::now());
        assert_eq!(job.worker_actor(), "worker-1");
        job.claimed_by = None;
        assert_eq!(job.worker_actor(), "worker");
    }

    #[test]
    fn state_round_trips() {
        for s in ["pending", "processing", "completed", "failed", "deleted"] {
            assert_eq!(ExportState::parse(s).unwrap().as_str(), s);
        }
        assert!(ExportState::parse("bogus").is_none());
    }
}
