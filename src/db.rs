//! Database module - PostgreSQL connection and migrations

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create tables if not exist
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- Security alerts (created from audit events, never physically deleted)
CREATE TABLE IF NOT EXISTS alerts (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    tenant_id UUID NOT NULL,

    -- classification
    alert_type VARCHAR(100) NOT NULL,
    category VARCHAR(50) NOT NULL,
    severity VARCHAR(20) NOT NULL,
    priority INT NOT NULL DEFAULT 3,

    -- source (immutable after creation)
    event_ids JSONB NOT NULL DEFAULT '[]',
    detected_by VARCHAR(100),
    rule_ref VARCHAR(255),

    -- detection (immutable after creation, except false_positive_score feedback)
    detection_method VARCHAR(50),
    confidence INT NOT NULL DEFAULT 50,
    false_positive_score INT NOT NULL DEFAULT 0,

    -- impact
    scope VARCHAR(50),
    affected_resources JSONB NOT NULL DEFAULT '[]',
    affected_principals JSONB NOT NULL DEFAULT '[]',
    data_exposure BOOLEAN NOT NULL DEFAULT false,

    -- response
    status VARCHAR(20) NOT NULL DEFAULT 'new',
    acknowledged_at TIMESTAMPTZ,
    acknowledged_by VARCHAR(255),
    assignee VARCHAR(255),
    team VARCHAR(100),
    resolved_at TIMESTAMPTZ,
    resolved_by VARCHAR(255),
    resolution TEXT,
    escalation_level INT NOT NULL DEFAULT 0,
    escalation_requested BOOLEAN NOT NULL DEFAULT false,

    -- notification delivery records, one object per channel attempt
    notifications JSONB NOT NULL DEFAULT '[]',

    -- investigation (append-only)
    findings JSONB NOT NULL DEFAULT '[]',
    evidence JSONB NOT NULL DEFAULT '[]',

    -- compliance
    frameworks JSONB NOT NULL DEFAULT '[]',
    breach_deadline TIMESTAMPTZ,

    -- relationships
    correlation_id UUID,
    parent_alert_id UUID REFERENCES alerts(id),

    version INT NOT NULL DEFAULT 1,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Append-only action log per alert (insert-only, never updated or reordered)
CREATE TABLE IF NOT EXISTS alert_actions (
    id BIGSERIAL PRIMARY KEY,
    alert_id UUID NOT NULL REFERENCES alerts(id),
    action VARCHAR(50) NOT NULL,
    actor VARCHAR(255) NOT NULL,
    detail TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Compliance export jobs
CREATE TABLE IF NOT EXISTS export_jobs (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    tenant_id UUID NOT NULL,

    -- definition
    export_type VARCHAR(50) NOT NULL,
    format VARCHAR(20) NOT NULL DEFAULT 'jsonl',
    compress BOOLEAN NOT NULL DEFAULT false,
    encrypt BOOLEAN NOT NULL DEFAULT false,

    -- scope
    range_start TIMESTAMPTZ NOT NULL,
    range_end TIMESTAMPTZ NOT NULL,
    filters JSONB NOT NULL DEFAULT '{}',

    -- status
    state VARCHAR(20) NOT NULL DEFAULT 'pending',
    priority INT NOT NULL DEFAULT 3,
    progress_current BIGINT NOT NULL DEFAULT 0,
    progress_total BIGINT NOT NULL DEFAULT 0,
    progress_phase VARCHAR(50),
    last_error TEXT,
    retry_count INT NOT NULL DEFAULT 0,
    max_retries INT NOT NULL DEFAULT 3,
    cancel_requested BOOLEAN NOT NULL DEFAULT false,
    claimed_by VARCHAR(255),
    next_run TIMESTAMPTZ,

    -- results
    record_count BIGINT NOT NULL DEFAULT 0,
    files JSONB NOT NULL DEFAULT '[]',
    total_size BIGINT NOT NULL DEFAULT 0,
    processing_time_ms BIGINT,
    export_rate DOUBLE PRECISION,

    -- access
    requested_by VARCHAR(255) NOT NULL,
    approval_state VARCHAR(20) NOT NULL DEFAULT 'approved',

    -- compliance / retention
    purpose VARCHAR(50) NOT NULL DEFAULT 'unspecified',
    frameworks JSONB NOT NULL DEFAULT '[]',
    legal_hold BOOLEAN NOT NULL DEFAULT false,
    legal_hold_reason TEXT,
    retention_expires_at TIMESTAMPTZ,
    auto_delete BOOLEAN NOT NULL DEFAULT true,
    extensions JSONB NOT NULL DEFAULT '[]',

    -- integrity
    integrity_digest VARCHAR(64),
    verified BOOLEAN,
    last_verified_at TIMESTAMPTZ,

    version INT NOT NULL DEFAULT 1,
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Chain of custody per export (insert-only, never updated or reordered)
CREATE TABLE IF NOT EXISTS custody_log (
    id BIGSERIAL PRIMARY KEY,
    export_id UUID NOT NULL REFERENCES export_jobs(id),
    action VARCHAR(50) NOT NULL,
    actor VARCHAR(255) NOT NULL,
    digest VARCHAR(64),
    notes TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Audit events (external event store; read-only from this service apart
-- from what the event-source collaborator ingests)
CREATE TABLE IF NOT EXISTS audit_events (
    id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL,
    event_type VARCHAR(100) NOT NULL,
    severity VARCHAR(20),
    risk_score INT NOT NULL DEFAULT 0,
    category VARCHAR(50),
    actor VARCHAR(255),
    resource VARCHAR(255),
    threat_indicators JSONB NOT NULL DEFAULT '[]',
    data JSONB NOT NULL DEFAULT '{}',
    occurred_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_alerts_tenant_status ON alerts(tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_alerts_tenant_severity ON alerts(tenant_id, severity);
CREATE INDEX IF NOT EXISTS idx_alerts_correlation ON alerts(correlation_id);
CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);
CREATE INDEX IF NOT EXISTS idx_alert_actions_alert ON alert_actions(alert_id, id);
CREATE INDEX IF NOT EXISTS idx_exports_tenant_state ON export_jobs(tenant_id, state);
CREATE INDEX IF NOT EXISTS idx_exports_claim ON export_jobs(state, priority, created_at);
CREATE INDEX IF NOT EXISTS idx_exports_retention ON export_jobs(purpose, retention_expires_at);
CREATE INDEX IF NOT EXISTS idx_custody_export ON custody_log(export_id, id);
CREATE INDEX IF NOT EXISTS idx_events_tenant_time ON audit_events(tenant_id, occurred_at);
"#;
