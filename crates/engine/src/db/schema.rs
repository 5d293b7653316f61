//! PostgreSQL schema for the workflow store.

use crate::db::DbPool;
use crate::error::AppResult;

/// Schema name holding every ReviewFlow table.
pub const SCHEMA: &str = "reviewflow";

/// Tables the store needs.
pub const REQUIRED_TABLES: [&str; 4] = [
    "workflow_item",
    "pool_task",
    "claimed_task",
    "workflow_history",
];

/// Idempotent DDL.
///
/// `workflow_history` has no foreign key to `workflow_item`: the audit trail
/// outlives the item record.
pub const SCHEMA_SQL: &str = r#"
CREATE SCHEMA IF NOT EXISTS reviewflow;

CREATE TABLE IF NOT EXISTS reviewflow.workflow_item (
    id               UUID PRIMARY KEY,
    workflow_id      TEXT NOT NULL,
    container_id     TEXT NOT NULL,
    content          JSONB NOT NULL,
    current_step     TEXT,
    state            TEXT NOT NULL,
    approvals        TEXT[] NOT NULL DEFAULT '{}',
    pending_curation TEXT,
    created_at       TIMESTAMPTZ NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS reviewflow.pool_task (
    workflow_item_id UUID NOT NULL REFERENCES reviewflow.workflow_item (id) ON DELETE CASCADE,
    step_id          TEXT NOT NULL,
    eligible         TEXT[] NOT NULL,
    open_slots       INTEGER NOT NULL CHECK (open_slots >= 0),
    created_at       TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (workflow_item_id, step_id)
);

CREATE INDEX IF NOT EXISTS pool_task_eligible_idx
    ON reviewflow.pool_task USING GIN (eligible);

CREATE TABLE IF NOT EXISTS reviewflow.claimed_task (
    workflow_item_id  UUID NOT NULL REFERENCES reviewflow.workflow_item (id) ON DELETE CASCADE,
    step_id           TEXT NOT NULL,
    claimant          TEXT NOT NULL,
    eligible          TEXT[] NOT NULL,
    performed_actions TEXT[] NOT NULL DEFAULT '{}',
    claimed_at        TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (workflow_item_id, step_id, claimant)
);

CREATE INDEX IF NOT EXISTS claimed_task_claimant_idx
    ON reviewflow.claimed_task (claimant, claimed_at);

CREATE TABLE IF NOT EXISTS reviewflow.workflow_history (
    workflow_item_id UUID NOT NULL,
    seq              BIGINT NOT NULL,
    step_id          TEXT,
    action_id        TEXT,
    actor            TEXT,
    outcome          TEXT NOT NULL,
    next_step        TEXT,
    detail           TEXT,
    recorded_at      TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (workflow_item_id, seq)
);
"#;

/// Apply the DDL.
pub async fn apply_schema(pool: &DbPool) -> AppResult<()> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    tracing::info!(schema = SCHEMA, "Database schema applied");
    Ok(())
}

/// Required tables not present in the database.
pub async fn missing_tables(pool: &DbPool) -> AppResult<Vec<String>> {
    let existing: Vec<String> = sqlx::query_scalar(
        "SELECT table_name::text FROM information_schema.tables WHERE table_schema = $1",
    )
    .bind(SCHEMA)
    .fetch_all(pool)
    .await?;

    Ok(REQUIRED_TABLES
        .iter()
        .filter(|t| !existing.iter().any(|e| e == *t))
        .map(|t| t.to_string())
        .collect())
}
