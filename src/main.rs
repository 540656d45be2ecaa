//! AuditGuard - Security Audit Alerting and Compliance Export Service
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        AUDITGUARD                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌──────────────┐  ┌───────────────────────┐ │
//! │  │  API      │  │  Alert       │  │  Export Pipeline      │ │
//! │  │  Gateway  │  │  Lifecycle   │  │  (Worker + SLA Sweep  │ │
//! │  │  (Axum)   │  │  + Correlator│  │   Background Tasks)   │ │
//! │  └─────┬─────┘  └──────┬───────┘  └───────────┬───────────┘ │
//! │        └───────────────┼──────────────────────┘             │
//! │                        ▼                                    │
//! │                 ┌─────────────┐                             │
//! │                 │ PostgreSQL  │                             │
//! │                 └─────────────┘                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Audit events flow in from the external event store and become alerts;
//! export jobs extract, package, and seal slices of audit history under
//! retention policy and chain of custody.

mod alerts;
mod compliance;
mod config;
mod db;
mod error;
mod events;
mod exports;
mod handlers;
mod middleware;
mod models;
mod notify;
mod storage;
#[cfg(test)]
mod test_util;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alerts::AlertLifecycle;
use events::PgEventSource;
use exports::{ExportPipeline, ExportWorker};
use notify::SinkNotifier;
use storage::FsArtifactStore;

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auditguard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    tracing::info!("AuditGuard starting...");
    tracing::info!(
        "Database: {}",
        config.database_url.split('@').last().unwrap_or("***")
    );

    // Initialize database pool
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    // Collaborators
    let notifier: Arc<dyn notify::Notify> =
        Arc::new(SinkNotifier::new(config.webhook_sink_url.clone()));
    let store: Arc<dyn storage::ArtifactStore> = Arc::new(FsArtifactStore::new(
        config.artifact_dir.clone(),
        config.signing_secret.clone(),
        config.public_base_url.clone(),
    ));
    let source: Arc<dyn events::AuditEventSource> = Arc::new(PgEventSource::new(pool.clone()));

    // Engines
    let lifecycle = Arc::new(AlertLifecycle::new(pool.clone(), notifier.clone()));
    let pipeline = Arc::new(ExportPipeline::new(
        pool.clone(),
        store.clone(),
        notifier.clone(),
    ));

    // Background tasks: export worker and SLA escalation sweep
    let worker = ExportWorker::new(
        pipeline.clone(),
        source,
        config.worker_id.clone(),
        std::time::Duration::from_secs(config.export_poll_secs),
    );
    tokio::spawn(worker.run());
    tokio::spawn(alerts::lifecycle::run_sla_sweep(
        lifecycle.clone(),
        config.sla_sweep_secs,
    ));
    tokio::spawn(exports::pipeline::run_retention_sweep(
        pipeline.clone(),
        config.retention_sweep_secs,
    ));

    // Build application state
    let state = AppState {
        pool,
        config: config.clone(),
        lifecycle,
        pipeline,
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: config::Config,
    pub lifecycle: Arc<AlertLifecycle>,
    pub pipeline: Arc<ExportPipeline>,
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    // Public routes
    let public_routes = Router::new().route("/health", get(handlers::health::check));

    // Worker routes (internal job control; no tenant scoping)
    let worker_routes = Router::new()
        .route("/api/v1/exports/claim", post(handlers::exports::claim_next))
        .route("/api/v1/exports/:id/progress", put(handlers::exports::update_progress))
        .route("/api/v1/exports/:id/complete", post(handlers::exports::complete))
        .route("/api/v1/exports/:id/fail", post(handlers::exports::fail));

    // Management routes (tenant-scoped via x-tenant-id header)
    let management_routes = Router::new()
        // Alerts
        .route("/api/v1/alerts/from-event", post(handlers::alerts::create_from_event))
        .route("/api/v1/alerts", get(handlers::alerts::list))
        .route("/api/v1/alerts/stats", get(handlers::alerts::statistics))
        .route("/api/v1/alerts/:id", get(handlers::alerts::get))
        .route("/api/v1/alerts/:id/acknowledge", post(handlers::alerts::acknowledge))
        .route("/api/v1/alerts/:id/assign", post(handlers::alerts::assign))
        .route("/api/v1/alerts/:id/findings", post(handlers::alerts::add_finding))
        .route("/api/v1/alerts/:id/evidence", post(handlers::alerts::add_evidence))
        .route("/api/v1/alerts/:id/resolve", post(handlers::alerts::resolve))
        .route("/api/v1/alerts/:id/false-positive", post(handlers::alerts::mark_false_positive))
        .route("/api/v1/alerts/:id/mitigate", post(handlers::alerts::start_mitigation))
        .route("/api/v1/alerts/:id/escalate", post(handlers::alerts::escalate))
        .route("/api/v1/alerts/:id/correlate", post(handlers::alerts::correlate))

        // Exports
        .route("/api/v1/exports", post(handlers::exports::create))
        .route("/api/v1/exports/pending", get(handlers::exports::list_pending))
        .route("/api/v1/exports/expired", get(handlers::exports::list_expired))
        .route("/api/v1/exports/stats", get(handlers::exports::statistics))
        .route("/api/v1/exports/:id", get(handlers::exports::get))
        .route("/api/v1/exports/:id", delete(handlers::exports::mark_for_deletion))
        .route("/api/v1/exports/:id/cancel", post(handlers::exports::cancel))
        .route("/api/v1/exports/:id/retention/extend", post(handlers::exports::extend_retention))
        .route("/api/v1/exports/:id/verify", post(handlers::exports::verify))
        .route("/api/v1/exports/:id/url", get(handlers::exports::signed_urls))

        // Compliance
        .route("/api/v1/compliance/gap-report", post(handlers::compliance::gap_report));

    // Combine all routes
    Router::new()
        .merge(public_routes)
        .merge(worker_routes)
        .merge(management_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
