//! Export handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::middleware::tenant::TenantContext;
use crate::models::{CustodyEntry, ExportFile, ExportJob, ExportStats, NewExportJob};
use crate::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateExportRequest {
    #[validate(length(min = 1, max = 50))]
    pub export_type: String,
    /// json, jsonl, or csv
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub encrypt: bool,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    #[serde(default)]
    pub filters: serde_json::Value,
    #[validate(range(min = 1, max = 5))]
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[validate(range(min = 0, max = 10))]
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_purpose")]
    pub purpose: String,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub legal_hold: bool,
    pub legal_hold_reason: Option<String>,
    pub retention_expires_at: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

fn default_format() -> String {
    "jsonl".to_string()
}

fn default_priority() -> i32 {
    3
}

fn default_max_retries() -> i32 {
    3
}

fn default_purpose() -> String {
    "unspecified".to_string()
}

/// Create an export job
pub async fn create(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(req): Json<CreateExportRequest>,
) -> AppResult<Json<ExportJob>> {
    req.validate()?;
    if !matches!(req.format.as_str(), "json" | "jsonl" | "csv") {
        return Err(AppError::Validation(format!(
            "unsupported export format '{}'",
            req.format
        )));
    }

    let job = state
        .pipeline
        .create(NewExportJob {
            tenant_id: tenant.tenant_id,
            export_type: req.export_type,
            format: req.format,
            compress: req.compress,
            encrypt: req.encrypt,
            range_start: req.range_start,
            range_end: req.range_end,
            filters: if req.filters.is_null() {
                serde_json::json!({})
            } else {
                req.filters
            },
            priority: req.priority,
            max_retries: req.max_retries,
            requested_by: tenant.actor,
            purpose: req.purpose,
            frameworks: req.frameworks,
            legal_hold: req.legal_hold,
            legal_hold_reason: req.legal_hold_reason,
            retention_expires_at: req.retention_expires_at,
            next_run: req.next_run,
        })
        .await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize, Default)]
pub struct ClaimRequest {
    pub worker_id: Option<String>,
}

/// Claim the next due pending job (worker API). Returns null when nothing
/// is eligible.
pub async fn claim_next(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> AppResult<Json<Option<ExportJob>>> {
    let worker_id = req
        .worker_id
        .unwrap_or_else(|| state.config.worker_id.clone());
    let job = state.pipeline.claim_next(&worker_id).await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub current: i64,
    pub total: i64,
    pub phase: String,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub percentage: u8,
}

/// Persist progress for a processing job (worker API). The worker applies
/// its own write throttle; this endpoint always persists.
pub async fn update_progress(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProgressRequest>,
) -> AppResult<Json<ProgressResponse>> {
    state
        .pipeline
        .update_progress(id, req.current, req.total, &req.phase)
        .await?;
    Ok(Json(ProgressResponse {
        percentage: crate::models::progress_pct(req.current, req.total),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub record_count: i64,
    pub files: Vec<ExportFile>,
}

/// Complete a processing job (worker API)
pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteRequest>,
) -> AppResult<Json<ExportJob>> {
    let job = state.pipeline.complete(id, req.record_count, req.files).await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub error: String,
}

/// Record a processing failure (worker API)
pub async fn fail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FailRequest>,
) -> AppResult<Json<ExportJob>> {
    let job = state.pipeline.fail(id, &req.error).await?;
    Ok(Json(job))
}

pub async fn cancel(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ExportJob>> {
    let job = state
        .pipeline
        .cancel(tenant.tenant_id, id, &tenant.actor)
        .await?;
    Ok(Json(job))
}

/// Delete an export and its artifacts. Refused under legal hold.
pub async fn mark_for_deletion(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ExportJob>> {
    let job = state
        .pipeline
        .mark_for_deletion(tenant.tenant_id, id, &tenant.actor)
        .await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExtendRetentionRequest {
    #[validate(range(min = 1, max = 3650))]
    pub days: i64,
    #[validate(length(min = 1))]
    pub reason: String,
}

pub async fn extend_retention(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ExtendRetentionRequest>,
) -> AppResult<Json<ExportJob>> {
    req.validate()?;
    let job = state
        .pipeline
        .extend_retention(tenant.tenant_id, id, req.days, &req.reason, &tenant.actor)
        .await?;
    Ok(Json(job))
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub export_id: Uuid,
    pub verified: bool,
}

pub async fn verify(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<VerifyResponse>> {
    let verified = state
        .pipeline
        .verify(tenant.tenant_id, id, &tenant.actor)
        .await?;
    Ok(Json(VerifyResponse {
        export_id: id,
        verified,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SignedUrlQuery {
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SignedUrl {
    pub filename: String,
    pub url: String,
}

pub async fn signed_urls(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Query(query): Query<SignedUrlQuery>,
) -> AppResult<Json<Vec<SignedUrl>>> {
    let ttl = query.ttl_seconds.unwrap_or(3600).min(86_400);
    let urls = state
        .pipeline
        .signed_urls(tenant.tenant_id, id, &tenant.actor, ttl)
        .await?;
    Ok(Json(
        urls.into_iter()
            .map(|(filename, url)| SignedUrl { filename, url })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct ExportDetail {
    #[serde(flatten)]
    pub job: ExportJob,
    pub progress_percentage: u8,
    pub custody: Vec<CustodyEntry>,
}

pub async fn get(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ExportDetail>> {
    let job = ExportJob::find_by_id(&state.pool, tenant.tenant_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Export job not found".to_string()))?;
    let custody = ExportJob::custody_entries(&state.pool, id).await?;
    let progress_percentage = job.progress_pct();
    Ok(Json(ExportDetail {
        job,
        progress_percentage,
        custody,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

pub async fn list_pending(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<ExportJob>>> {
    let jobs = ExportJob::list_pending(
        &state.pool,
        tenant.tenant_id,
        query.limit.unwrap_or(50),
    )
    .await?;
    Ok(Json(jobs))
}

/// Completed exports past retention expiry, eligible for the deletion
/// sweep. Legal holds never appear here.
pub async fn list_expired(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> AppResult<Json<Vec<ExportJob>>> {
    let jobs = ExportJob::list_expired(&state.pool, tenant.tenant_id, Utc::now()).await?;
    Ok(Json(jobs))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<i64>,
}

pub async fn statistics(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<StatsQuery>,
) -> AppResult<Json<ExportStats>> {
    let since = Utc::now() - Duration::days(query.days.unwrap_or(30));
    let stats = ExportJob::statistics(&state.pool, tenant.tenant_id, since).await?;
    Ok(Json(stats))
}
