//! Tenant scoping
//!
//! Every management route is tenant-scoped through the `x-tenant-id`
//! header. Authentication and identity lookup are external collaborators;
//! this extractor is the seam where a verified principal would be injected.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::AppError;

/// Tenant context extracted from request headers
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    /// Acting principal recorded on action logs and custody entries.
    pub actor: String,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = parts
            .headers
            .get("x-tenant-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| {
                AppError::Validation("missing or invalid x-tenant-id header".to_string())
            })?;

        let actor = parts
            .headers
            .get("x-actor")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("system")
            .to_string();

        Ok(TenantContext { tenant_id, actor })
    }
}
