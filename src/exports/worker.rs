//! Export worker
//!
//! Claims due jobs and runs the batched extraction against the audit-event
//! source: fetch in batches, render per the job's format, flush part
//! artifacts to storage, and finish through the pipeline's complete/fail
//! operations. Cancellation is cooperative; the worker checks the job's
//! cancel flag between batches and cleans up partial artifacts before
//! failing the job, so nothing is left orphaned.

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::AppResult;
use crate::events::{AuditEvent, AuditEventSource, ExportScope};
use crate::exports::integrity;
use crate::exports::pipeline::ExportPipeline;
use crate::models::{ExportFile, ExportJob};

const BATCH_SIZE: i64 = 500;
const RECORDS_PER_PART: usize = 5_000;
/// Progress rows are written at most this often; in-between updates are
/// coalesced. Terminal complete/fail are never skipped.
const PROGRESS_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// A processing row untouched for this long belonged to a worker that died
/// mid-run and is reclaimed. Progress writes are the liveness signal, so
/// this must exceed the flush interval by a wide margin.
const CLAIM_LEASE_SECS: i64 = 600;

/// Cutoff before which a processing row's last touch marks its claim as
/// expired.
pub fn lease_cutoff(now: DateTime<Utc>, lease_secs: i64) -> DateTime<Utc> {
    now - chrono::Duration::seconds(lease_secs)
}

pub struct ExportWorker {
    pipeline: Arc<ExportPipeline>,
    source: Arc<dyn AuditEventSource>,
    worker_id: String,
    poll_interval: Duration,
}

impl ExportWorker {
    pub fn new(
        pipeline: Arc<ExportPipeline>,
        source: Arc<dyn AuditEventSource>,
        worker_id: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pipeline,
            source,
            worker_id,
            poll_interval,
        }
    }

    /// Poll loop: claim one job at a time, process it to a terminal call.
    /// Each iteration first reclaims stale claims left by dead workers.
    pub async fn run(self) {
        tracing::info!(worker_id = %self.worker_id, "export worker started");
        loop {
            let cutoff = lease_cutoff(Utc::now(), CLAIM_LEASE_SECS);
            match ExportJob::reclaim_stale(self.pipeline.pool(), cutoff).await {
                Ok(0) => {}
                Ok(reclaimed) => {
                    tracing::warn!(reclaimed, "reclaimed expired export claims")
                }
                Err(err) => tracing::error!(error = %err, "stale claim reclaim failed"),
            }

            match self.pipeline.claim_next(&self.worker_id).await {
                Ok(Some(job)) => {
                    let job_id = job.id;
                    if let Err(err) = self.process(job).await {
                        // process() already routed the job through fail();
                        // this only trips on infrastructure errors around it
                        tracing::error!(export_id = %job_id, error = %err, "export processing error");
                    }
                }
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(err) => {
                    tracing::error!(error = %err, "export claim failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn process(&self, job: ExportJob) -> AppResult<()> {
        let scope = ExportScope {
            tenant_id: job.tenant_id,
            range_start: job.range_start,
            range_end: job.range_end,
            filters: job.filters.clone(),
        };

        let total = match self.source.count(&scope).await {
            Ok(t) => t,
            Err(err) => {
                self.pipeline.fail(job.id, &format!("count failed: {err}")).await?;
                return Ok(());
            }
        };

        let mut stored: Vec<ExportFile> = Vec::new();
        let mut part_events: Vec<AuditEvent> = Vec::new();
        let mut offset: i64 = 0;
        let mut exported: i64 = 0;
        let mut last_flush = Instant::now();

        loop {
            // Cancel polling is advisory; a failed poll never aborts the run
            match ExportJob::cancel_pending(self.pipeline.pool(), job.id).await {
                Ok(true) => {
                    tracing::warn!(export_id = %job.id, "cancellation observed, cleaning up");
                    self.cleanup(&stored).await;
                    self.pipeline
                        .fail_without_retry(job.id, "cancelled by operator")
                        .await?;
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(export_id = %job.id, error = %err, "cancel poll failed, continuing")
                }
            }

            let batch = match self.source.fetch(&scope, offset, BATCH_SIZE).await {
                Ok(b) => b,
                Err(err) => {
                    self.cleanup(&stored).await;
                    self.pipeline.fail(job.id, &format!("extraction failed: {err}")).await?;
                    return Ok(());
                }
            };
            let done = (batch.len() as i64) < BATCH_SIZE;

            offset += batch.len() as i64;
            exported += batch.len() as i64;
            part_events.extend(batch);

            if part_events.len() >= RECORDS_PER_PART || (done && !part_events.is_empty()) {
                let part_index = stored.len() + 1;
                match self.flush_part(&job, &part_events, part_index).await {
                    Ok(file) => stored.push(file),
                    Err(err) => {
                        self.cleanup(&stored).await;
                        self.pipeline.fail(job.id, &format!("artifact write failed: {err}")).await?;
                        return Ok(());
                    }
                }
                part_events.clear();
            }

            if last_flush.elapsed() >= PROGRESS_FLUSH_INTERVAL {
                // Progress is lossy; a dropped write is logged, not fatal
                if let Err(err) = self
                    .pipeline
                    .update_progress(job.id, exported, total.max(exported), "extracting")
                    .await
                {
                    tracing::warn!(export_id = %job.id, error = %err, "progress write dropped");
                }
                last_flush = Instant::now();
            }

            if done {
                break;
            }
        }

        if stored.is_empty() {
            // A valid scope can match nothing; emit an empty artifact so
            // the completed job still carries a sealed file list
            let file = self.flush_part(&job, &[], 1).await.map_err(|err| {
                crate::error::AppError::Storage(format!("empty artifact write failed: {err}"))
            })?;
            stored.push(file);
        }

        // The job must reach a terminal state: a completion error routes
        // through fail() so the row never sticks in processing
        if let Err(err) = self.pipeline.complete(job.id, exported, stored.clone()).await {
            tracing::error!(export_id = %job.id, error = %err, "completion failed, failing job");
            self.cleanup(&stored).await;
            self.pipeline
                .fail(job.id, &format!("completion failed: {err}"))
                .await?;
        }
        Ok(())
    }

    async fn flush_part(
        &self,
        job: &ExportJob,
        events: &[AuditEvent],
        part_index: usize,
    ) -> anyhow::Result<ExportFile> {
        let (mut bytes, extension) = render(&job.format, events)?;
        let mut filename = format!("{}-part{:04}.{}", job.export_type, part_index, extension);

        if job.compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&bytes)?;
            bytes = encoder.finish()?;
            filename.push_str(".gz");
        }

        let checksum = integrity::checksum(&bytes);
        let location = self.pipeline.store().store(&filename, &bytes).await?;

        Ok(ExportFile {
            filename,
            size: bytes.len() as u64,
            checksum,
            location,
        })
    }

    /// Best-effort removal of partial artifacts after cancellation or a
    /// mid-run failure.
    async fn cleanup(&self, stored: &[ExportFile]) {
        for file in stored {
            if let Err(err) = self.pipeline.store().delete(&file.location).await {
                tracing::warn!(
                    location = %file.location,
                    error = %err,
                    "partial artifact cleanup failed"
                );
            }
        }
    }
}

/// Render a batch of events in the job's declared format.
pub fn render(format: &str, events: &[AuditEvent]) -> anyhow::Result<(Vec<u8>, &'static str)> {
    match format {
        "json" => Ok((serde_json::to_vec_pretty(events)?, "json")),
        "jsonl" => {
            let mut out = Vec::new();
            for event in events {
                serde_json::to_writer(&mut out, event)?;
                out.push(b'\n');
            }
            Ok((out, "jsonl"))
        }
        "csv" => Ok((render_csv(events), "csv")),
        other => anyhow::bail!("unsupported export format: {other}"),
    }
}

fn render_csv(events: &[AuditEvent]) -> Vec<u8> {
    let mut out = String::from(
        "id,tenant_id,event_type,severity,risk_score,category,actor,resource,occurred_at\n",
    );
    for e in events {
        let row = [
            e.id.to_string(),
            e.tenant_id.to_string(),
            e.event_type.clone(),
            e.severity.clone().unwrap_or_default(),
            e.risk_score.to_string(),
            e.category.clone().unwrap_or_default(),
            e.actor.clone().unwrap_or_default(),
            e.resource.clone().unwrap_or_default(),
            e.occurred_at.to_rfc3339(),
        ];
        let escaped: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out.into_bytes()
}

fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(event_type: &str, actor: &str) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            severity: Some("low".to_string()),
            risk_score: 5,
            category: None,
            actor: Some(actor.to_string()),
            resource: None,
            threat_indicators: serde_json::json!([]),
            data: serde_json::json!({}),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn claim_lease_outlives_progress_flushes() {
        // A live worker refreshes updated_at through progress writes; the
        // lease must not expire between flushes
        assert!(CLAIM_LEASE_SECS as u64 >= PROGRESS_FLUSH_INTERVAL.as_secs() * 10);
        let now = Utc::now();
        assert_eq!(
            lease_cutoff(now, CLAIM_LEASE_SECS),
            now - chrono::Duration::seconds(CLAIM_LEASE_SECS)
        );
    }

    #[test]
    fn jsonl_renders_one_line_per_event() {
        let events = vec![event("login", "alice"), event("logout", "bob")];
        let (bytes, ext) = render("jsonl", &events).unwrap();
        assert_eq!(ext, "jsonl");
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|l| serde_json::from_str::<serde_json::Value>(l).is_ok()));
    }

    #[test]
    fn csv_escapes_embedded_delimiters() {
        let events = vec![event("login", "smith, \"agent\" j")];
        let (bytes, _) = render("csv", &events).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"smith, \"\"agent\"\" j\""));
        // header plus one row
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn unknown_format_is_refused() {
        assert!(render("xml", &[]).is_err());
    }

    #[test]
    fn json_format_is_a_single_array() {
        let (bytes, ext) = render("json", &[event("login", "alice")]).unwrap();
        assert_eq!(ext, "json");
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
    }
}
