//! Alert handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alerts::correlator;
use crate::events::AuditEvent;
use crate::middleware::tenant::TenantContext;
use crate::models::{Alert, AlertAction, AlertFilter, AlertMetrics, AlertStats};
use crate::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateFromEventRequest {
    pub event: AuditEvent,
    /// Applicable frameworks from tenant configuration (external lookup).
    #[serde(default)]
    pub frameworks: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AlertDetail {
    #[serde(flatten)]
    pub alert: Alert,
    pub metrics: AlertMetrics,
    pub actions: Vec<AlertAction>,
}

/// Create an alert from a detected audit event
pub async fn create_from_event(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(mut req): Json<CreateFromEventRequest>,
) -> AppResult<Json<Alert>> {
    req.event.tenant_id = tenant.tenant_id;
    let alert = state
        .lifecycle
        .create_from_event(&req.event, req.frameworks)
        .await?;
    Ok(Json(alert))
}

/// List open alerts
pub async fn list(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(filter): Query<AlertFilter>,
) -> AppResult<Json<Vec<Alert>>> {
    let alerts = Alert::list_open(&state.pool, tenant.tenant_id, filter).await?;
    Ok(Json(alerts))
}

/// Get a single alert with derived metrics and its action log
pub async fn get(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AlertDetail>> {
    let alert = Alert::find_by_id(&state.pool, tenant.tenant_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Alert not found".to_string()))?;
    let actions = Alert::actions(&state.pool, id).await?;
    let metrics = alert.metrics();
    Ok(Json(AlertDetail {
        alert,
        metrics,
        actions,
    }))
}

pub async fn acknowledge(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Alert>> {
    let alert = state
        .lifecycle
        .acknowledge(tenant.tenant_id, id, &tenant.actor)
        .await?;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub assignee: String,
    pub team: Option<String>,
}

pub async fn assign(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignRequest>,
) -> AppResult<Json<Alert>> {
    let alert = state
        .lifecycle
        .assign(
            tenant.tenant_id,
            id,
            &tenant.actor,
            &req.assignee,
            req.team.as_deref(),
        )
        .await?;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
pub struct FindingRequest {
    pub finding: String,
}

pub async fn add_finding(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(req): Json<FindingRequest>,
) -> AppResult<Json<Alert>> {
    let alert = state
        .lifecycle
        .add_finding(tenant.tenant_id, id, &tenant.actor, req.finding)
        .await?;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
pub struct EvidenceRequest {
    pub evidence: serde_json::Value,
}

pub async fn add_evidence(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(req): Json<EvidenceRequest>,
) -> AppResult<Json<Alert>> {
    let alert = state
        .lifecycle
        .add_evidence(tenant.tenant_id, id, &tenant.actor, req.evidence)
        .await?;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolution: String,
}

pub async fn resolve(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> AppResult<Json<Alert>> {
    let alert = state
        .lifecycle
        .resolve(tenant.tenant_id, id, &tenant.actor, &req.resolution)
        .await?;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
pub struct FalsePositiveRequest {
    pub reason: String,
}

pub async fn mark_false_positive(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(req): Json<FalsePositiveRequest>,
) -> AppResult<Json<Alert>> {
    let alert = state
        .lifecycle
        .mark_false_positive(tenant.tenant_id, id, &tenant.actor, &req.reason)
        .await?;
    Ok(Json(alert))
}

pub async fn start_mitigation(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Alert>> {
    let alert = state
        .lifecycle
        .start_mitigation(tenant.tenant_id, id, &tenant.actor)
        .await?;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
pub struct EscalateRequest {
    pub level: Option<i32>,
    pub reason: String,
    pub escalated_to: Option<String>,
}

pub async fn escalate(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(req): Json<EscalateRequest>,
) -> AppResult<Json<Alert>> {
    let alert = state
        .lifecycle
        .escalate(
            tenant.tenant_id,
            id,
            req.level,
            &req.reason,
            req.escalated_to.as_deref(),
        )
        .await?;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize, Default)]
pub struct CorrelateRequest {
    pub window_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CorrelateResponse {
    pub correlation_id: Option<Uuid>,
    pub matched: Vec<Alert>,
}

pub async fn correlate(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(req): Json<CorrelateRequest>,
) -> AppResult<Json<CorrelateResponse>> {
    let window = req.window_minutes.map(Duration::minutes);
    let matched = correlator::correlate(&state.pool, tenant.tenant_id, id, window).await?;

    let correlation_id = Alert::find_by_id(&state.pool, tenant.tenant_id, id)
        .await?
        .and_then(|a| a.correlation_id);

    Ok(Json(CorrelateResponse {
        correlation_id,
        matched,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<i64>,
}

pub async fn statistics(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<StatsQuery>,
) -> AppResult<Json<AlertStats>> {
    let since = Utc::now() - Duration::days(query.days.unwrap_or(30));
    let stats = Alert::statistics(&state.pool, tenant.tenant_id, since).await?;
    Ok(Json(stats))
}
