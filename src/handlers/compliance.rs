//! Compliance handlers

use axum::{extract::State, Json};
use serde::Deserialize;
use validator::Validate;

use crate::compliance::{assess, ControlAssessment, GapReport};
use crate::middleware::tenant::TenantContext;
use crate::models::Alert;
use crate::{AppResult, AppState};

#[derive(Debug, Deserialize, Validate)]
pub struct GapReportRequest {
    #[validate(length(min = 1, max = 100))]
    pub framework: String,
    #[validate(nested)]
    pub controls: Vec<ControlAssessment>,
}

/// Generate a control gap/maturity report for one framework, folding in
/// the alert lifecycle's escalation signal.
pub async fn gap_report(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(req): Json<GapReportRequest>,
) -> AppResult<Json<GapReport>> {
    req.validate()?;

    let escalated = Alert::escalated_critical_for_framework(
        &state.pool,
        tenant.tenant_id,
        &req.framework,
    )
    .await?;

    Ok(Json(assess(&req.framework, &req.controls, escalated)))
}
