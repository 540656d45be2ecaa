//! Alert correlation
//!
//! Groups alerts raised close together that share a triggering event, an
//! affected principal, or an affected resource. Best-effort: concurrent
//! runs over overlapping sets may mint different correlation ids; a later
//! run converges the group onto one id.

use chrono::Duration;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Alert;

/// Default correlation window around the seed alert's creation time.
pub fn default_window() -> Duration {
    Duration::hours(1)
}

fn string_list(value: &serde_json::Value) -> Vec<String> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

/// Pick the correlation id for a group: reuse the first existing id in
/// most-recent-first order (seed included), mint a fresh one only when the
/// whole group is uncorrelated.
pub fn select_correlation_id(seed: &Alert, matches: &[Alert]) -> Uuid {
    let mut by_recency: Vec<&Alert> = matches.iter().chain(std::iter::once(seed)).collect();
    by_recency.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    by_recency
        .iter()
        .find_map(|a| a.correlation_id)
        .unwrap_or_else(Uuid::new_v4)
}

/// Correlate the given alert against its neighbours. Returns the matched
/// alerts (excluding the seed); when there are matches, the whole group
/// plus the seed is stamped with a shared correlation id in one batched
/// update.
pub async fn correlate(
    pool: &PgPool,
    tenant_id: Uuid,
    alert_id: Uuid,
    window: Option<Duration>,
) -> AppResult<Vec<Alert>> {
    let seed = Alert::find_by_id(pool, tenant_id, alert_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Alert not found".to_string()))?;

    let window = window.unwrap_or_else(default_window);
    let event_ids = string_list(&seed.event_ids);
    let principals = string_list(&seed.affected_principals);
    let resources = string_list(&seed.affected_resources);

    if event_ids.is_empty() && principals.is_empty() && resources.is_empty() {
        return Ok(Vec::new());
    }

    let matches = Alert::correlation_candidates(
        pool,
        &seed,
        seed.created_at - window,
        seed.created_at + window,
        &event_ids,
        &principals,
        &resources,
    )
    .await?;

    if matches.is_empty() {
        return Ok(matches);
    }

    let correlation_id = select_correlation_id(&seed, &matches);
    let mut ids: Vec<Uuid> = matches.iter().map(|a| a.id).collect();
    ids.push(seed.id);

    let updated = Alert::assign_correlation(pool, &ids, correlation_id).await?;
    tracing::info!(
        alert_id = %alert_id,
        correlation_id = %correlation_id,
        group_size = updated,
        "alerts correlated"
    );

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::sample_alert;
    use chrono::Utc;

    #[test]
    fn fresh_id_when_group_is_uncorrelated() {
        let now = Utc::now();
        let seed = sample_alert("high", "new", now);
        let other = sample_alert("high", "new", now - Duration::minutes(10));
        let id = select_correlation_id(&seed, &[other.clone()]);
        assert_ne!(Some(id), seed.correlation_id);
        assert_ne!(Some(id), other.correlation_id);
    }

    #[test]
    fn reuses_most_recent_existing_id() {
        let now = Utc::now();
        let seed = sample_alert("high", "new", now);

        let mut older = sample_alert("high", "new", now - Duration::minutes(30));
        older.correlation_id = Some(Uuid::new_v4());

        let mut newer = sample_alert("high", "new", now - Duration::minutes(5));
        newer.correlation_id = Some(Uuid::new_v4());

        let picked = select_correlation_id(&seed, &[older.clone(), newer.clone()]);
        assert_eq!(Some(picked), newer.correlation_id);
    }

    #[test]
    fn seed_id_wins_when_seed_is_newest_correlated() {
        let now = Utc::now();
        let mut seed = sample_alert("high", "new", now);
        seed.correlation_id = Some(Uuid::new_v4());

        let other = sample_alert("high", "new", now - Duration::minutes(10));
        let picked = select_correlation_id(&seed, &[other]);
        assert_eq!(Some(picked), seed.correlation_id);
    }
}
