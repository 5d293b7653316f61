//! PostgreSQL store.
//!
//! Mutations run inside one database transaction. `lock_item` takes a row
//! lock (`SELECT ... FOR UPDATE`), which linearizes all work on an item;
//! claim races are decided by the conditional slot update.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use crate::db::pool::health_check;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::model::{
    ClaimedTask, ContentItem, HistoryEntry, HistoryRecord, Page, PoolTask, WorkflowItem,
};
use crate::store::{StoreTx, WorkflowStore};

const ITEM_COLUMNS: &str = "id, workflow_id, container_id, content, current_step, state, \
                            approvals, pending_curation, created_at, updated_at";

const POOL_COLUMNS: &str = "workflow_item_id, step_id, eligible, open_slots, created_at";

const CLAIM_COLUMNS: &str =
    "workflow_item_id, step_id, claimant, eligible, performed_actions, claimed_at";

const HISTORY_COLUMNS: &str = "workflow_item_id, seq, step_id, action_id, actor, outcome, \
                               next_step, detail, recorded_at";

#[derive(Debug, FromRow)]
struct ItemRow {
    id: Uuid,
    workflow_id: String,
    container_id: String,
    content: Json<ContentItem>,
    current_step: Option<String>,
    state: String,
    approvals: Vec<String>,
    pending_curation: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ItemRow> for WorkflowItem {
    type Error = AppError;

    fn try_from(row: ItemRow) -> AppResult<Self> {
        Ok(WorkflowItem {
            id: row.id,
            workflow_id: row.workflow_id,
            container_id: row.container_id,
            content: row.content.0,
            current_step: row.current_step,
            state: row.state.parse()?,
            approvals: row.approvals.into_iter().collect(),
            pending_curation: row.pending_curation.map(|p| p.parse()).transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PoolRow {
    workflow_item_id: Uuid,
    step_id: String,
    eligible: Vec<String>,
    open_slots: i32,
    created_at: DateTime<Utc>,
}

impl From<PoolRow> for PoolTask {
    fn from(row: PoolRow) -> Self {
        PoolTask {
            workflow_item_id: row.workflow_item_id,
            step_id: row.step_id,
            eligible: row.eligible.into_iter().collect(),
            open_slots: row.open_slots.max(0) as u32,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ClaimRow {
    workflow_item_id: Uuid,
    step_id: String,
    claimant: String,
    eligible: Vec<String>,
    performed_actions: Vec<String>,
    claimed_at: DateTime<Utc>,
}

impl From<ClaimRow> for ClaimedTask {
    fn from(row: ClaimRow) -> Self {
        ClaimedTask {
            workflow_item_id: row.workflow_item_id,
            step_id: row.step_id,
            claimant: row.claimant,
            eligible: row.eligible.into_iter().collect(),
            performed_actions: row.performed_actions,
            claimed_at: row.claimed_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    workflow_item_id: Uuid,
    seq: i64,
    step_id: Option<String>,
    action_id: Option<String>,
    actor: Option<String>,
    outcome: String,
    next_step: Option<String>,
    detail: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = AppError;

    fn try_from(row: HistoryRow) -> AppResult<Self> {
        Ok(HistoryEntry {
            workflow_item_id: row.workflow_item_id,
            seq: row.seq,
            step_id: row.step_id,
            action_id: row.action_id,
            actor: row.actor,
            outcome: row.outcome.parse()?,
            next_step: row.next_step,
            detail: row.detail,
            recorded_at: row.recorded_at,
        })
    }
}

fn to_vec(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn get_item(&self, id: Uuid) -> AppResult<Option<WorkflowItem>> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {} FROM reviewflow.workflow_item WHERE id = $1",
            ITEM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowItem::try_from).transpose()
    }

    async fn list_items(&self, page: Page) -> AppResult<Vec<WorkflowItem>> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {} FROM reviewflow.workflow_item ORDER BY created_at, id OFFSET $1 LIMIT $2",
            ITEM_COLUMNS
        ))
        .bind(page.offset as i64)
        .bind(page.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WorkflowItem::try_from).collect()
    }

    async fn pool_tasks_for(&self, principal: &str, page: Page) -> AppResult<Vec<PoolTask>> {
        let rows = sqlx::query_as::<_, PoolRow>(&format!(
            r#"
            SELECT {} FROM reviewflow.pool_task
            WHERE $1 = ANY(eligible)
            ORDER BY created_at, workflow_item_id
            OFFSET $2 LIMIT $3
            "#,
            POOL_COLUMNS
        ))
        .bind(principal)
        .bind(page.offset as i64)
        .bind(page.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PoolTask::from).collect())
    }

    async fn claimed_tasks_for(&self, principal: &str, page: Page) -> AppResult<Vec<ClaimedTask>> {
        let rows = sqlx::query_as::<_, ClaimRow>(&format!(
            r#"
            SELECT {} FROM reviewflow.claimed_task
            WHERE claimant = $1
            ORDER BY claimed_at, workflow_item_id
            OFFSET $2 LIMIT $3
            "#,
            CLAIM_COLUMNS
        ))
        .bind(principal)
        .bind(page.offset as i64)
        .bind(page.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ClaimedTask::from).collect())
    }

    async fn pool_tasks_for_item(&self, id: Uuid) -> AppResult<Vec<PoolTask>> {
        let rows = sqlx::query_as::<_, PoolRow>(&format!(
            "SELECT {} FROM reviewflow.pool_task WHERE workflow_item_id = $1 ORDER BY created_at",
            POOL_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PoolTask::from).collect())
    }

    async fn claimed_tasks_for_item(&self, id: Uuid) -> AppResult<Vec<ClaimedTask>> {
        let rows = sqlx::query_as::<_, ClaimRow>(&format!(
            "SELECT {} FROM reviewflow.claimed_task WHERE workflow_item_id = $1 ORDER BY claimed_at",
            CLAIM_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ClaimedTask::from).collect())
    }

    async fn history(&self, id: Uuid) -> AppResult<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {} FROM reviewflow.workflow_history WHERE workflow_item_id = $1 ORDER BY seq",
            HISTORY_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryEntry::try_from).collect()
    }

    async fn health_check(&self) -> bool {
        health_check(&self.pool).await
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_item(&mut self, id: Uuid) -> AppResult<Option<WorkflowItem>> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {} FROM reviewflow.workflow_item WHERE id = $1 FOR UPDATE",
            ITEM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(WorkflowItem::try_from).transpose()
    }

    async fn insert_item(&mut self, item: &WorkflowItem) -> AppResult<()> {
        sqlx::query(&format!(
            "INSERT INTO reviewflow.workflow_item ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            ITEM_COLUMNS
        ))
        .bind(item.id)
        .bind(&item.workflow_id)
        .bind(&item.container_id)
        .bind(Json(&item.content))
        .bind(&item.current_step)
        .bind(item.state.as_str())
        .bind(to_vec(&item.approvals))
        .bind(item.pending_curation.map(|p| p.as_str()))
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_item(&mut self, item: &WorkflowItem) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE reviewflow.workflow_item
            SET content = $2, current_step = $3, state = $4, approvals = $5,
                pending_curation = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(item.id)
        .bind(Json(&item.content))
        .bind(&item.current_step)
        .bind(item.state.as_str())
        .bind(to_vec(&item.approvals))
        .bind(item.pending_curation.map(|p| p.as_str()))
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Persistence(format!(
                "workflow item {} vanished",
                item.id
            )));
        }
        Ok(())
    }

    async fn delete_item(&mut self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM reviewflow.workflow_item WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn pool_task(&mut self, id: Uuid, step_id: &str) -> AppResult<Option<PoolTask>> {
        let row = sqlx::query_as::<_, PoolRow>(&format!(
            "SELECT {} FROM reviewflow.pool_task WHERE workflow_item_id = $1 AND step_id = $2",
            POOL_COLUMNS
        ))
        .bind(id)
        .bind(step_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(PoolTask::from))
    }

    async fn insert_pool_task(&mut self, task: &PoolTask) -> AppResult<()> {
        sqlx::query(&format!(
            "INSERT INTO reviewflow.pool_task ({}) VALUES ($1, $2, $3, $4, $5)",
            POOL_COLUMNS
        ))
        .bind(task.workflow_item_id)
        .bind(&task.step_id)
        .bind(to_vec(&task.eligible))
        .bind(task.open_slots as i32)
        .bind(task.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::DuplicateStepEntry(format!(
                    "pool task exists for item {} step {}",
                    task.workflow_item_id, task.step_id
                ))
            } else {
                AppError::from(e)
            }
        })?;

        Ok(())
    }

    async fn take_pool_slot(
        &mut self,
        id: Uuid,
        step_id: &str,
        principal: &str,
    ) -> AppResult<Option<PoolTask>> {
        let row = sqlx::query_as::<_, PoolRow>(&format!(
            r#"
            UPDATE reviewflow.pool_task
            SET open_slots = open_slots - 1, eligible = array_remove(eligible, $3)
            WHERE workflow_item_id = $1 AND step_id = $2
              AND open_slots > 0 AND $3 = ANY(eligible)
            RETURNING {}
            "#,
            POOL_COLUMNS
        ))
        .bind(id)
        .bind(step_id)
        .bind(principal)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        if row.open_slots == 0 {
            sqlx::query(
                "DELETE FROM reviewflow.pool_task WHERE workflow_item_id = $1 AND step_id = $2",
            )
            .bind(id)
            .bind(step_id)
            .execute(&mut *self.tx)
            .await?;
        }

        let mut before = PoolTask::from(row);
        before.open_slots += 1;
        before.eligible.insert(principal.to_string());
        Ok(Some(before))
    }

    async fn release_pool_slot(&mut self, task: &PoolTask) -> AppResult<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO reviewflow.pool_task ({}) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (workflow_item_id, step_id) DO UPDATE
            SET open_slots = reviewflow.pool_task.open_slots + 1,
                eligible = ARRAY(
                    SELECT DISTINCT unnest(reviewflow.pool_task.eligible || EXCLUDED.eligible)
                )
            "#,
            POOL_COLUMNS
        ))
        .bind(task.workflow_item_id)
        .bind(&task.step_id)
        .bind(to_vec(&task.eligible))
        .bind(task.open_slots as i32)
        .bind(task.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_claim(&mut self, claim: &ClaimedTask) -> AppResult<()> {
        sqlx::query(&format!(
            "INSERT INTO reviewflow.claimed_task ({}) VALUES ($1, $2, $3, $4, $5, $6)",
            CLAIM_COLUMNS
        ))
        .bind(claim.workflow_item_id)
        .bind(&claim.step_id)
        .bind(&claim.claimant)
        .bind(to_vec(&claim.eligible))
        .bind(&claim.performed_actions)
        .bind(claim.claimed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::AlreadyClaimed(format!(
                    "{} already holds item {} step {}",
                    claim.claimant, claim.workflow_item_id, claim.step_id
                ))
            } else {
                AppError::from(e)
            }
        })?;

        Ok(())
    }

    async fn claim(
        &mut self,
        id: Uuid,
        step_id: &str,
        principal: &str,
    ) -> AppResult<Option<ClaimedTask>> {
        let row = sqlx::query_as::<_, ClaimRow>(&format!(
            r#"
            SELECT {} FROM reviewflow.claimed_task
            WHERE workflow_item_id = $1 AND step_id = $2 AND claimant = $3
            "#,
            CLAIM_COLUMNS
        ))
        .bind(id)
        .bind(step_id)
        .bind(principal)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(ClaimedTask::from))
    }

    async fn claims_for_step(&mut self, id: Uuid, step_id: &str) -> AppResult<Vec<ClaimedTask>> {
        let rows = sqlx::query_as::<_, ClaimRow>(&format!(
            r#"
            SELECT {} FROM reviewflow.claimed_task
            WHERE workflow_item_id = $1 AND step_id = $2
            ORDER BY claimed_at
            "#,
            CLAIM_COLUMNS
        ))
        .bind(id)
        .bind(step_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(ClaimedTask::from).collect())
    }

    async fn update_claim(&mut self, claim: &ClaimedTask) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE reviewflow.claimed_task SET performed_actions = $4
            WHERE workflow_item_id = $1 AND step_id = $2 AND claimant = $3
            "#,
        )
        .bind(claim.workflow_item_id)
        .bind(&claim.step_id)
        .bind(&claim.claimant)
        .bind(&claim.performed_actions)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotOwner(format!(
                "{} holds no claim on item {} step {}",
                claim.claimant, claim.workflow_item_id, claim.step_id
            )));
        }
        Ok(())
    }

    async fn delete_claim(&mut self, id: Uuid, step_id: &str, principal: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM reviewflow.claimed_task
            WHERE workflow_item_id = $1 AND step_id = $2 AND claimant = $3
            "#,
        )
        .bind(id)
        .bind(step_id)
        .bind(principal)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_tasks(&mut self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM reviewflow.claimed_task WHERE workflow_item_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM reviewflow.pool_task WHERE workflow_item_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn append_history(&mut self, record: HistoryRecord) -> AppResult<HistoryEntry> {
        let (seq,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(MAX(seq), 0) + 1 FROM reviewflow.workflow_history
            WHERE workflow_item_id = $1
            "#,
        )
        .bind(record.workflow_item_id)
        .fetch_one(&mut *self.tx)
        .await?;

        let entry = record.into_entry(seq);

        sqlx::query(&format!(
            "INSERT INTO reviewflow.workflow_history ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            HISTORY_COLUMNS
        ))
        .bind(entry.workflow_item_id)
        .bind(entry.seq)
        .bind(&entry.step_id)
        .bind(&entry.action_id)
        .bind(&entry.actor)
        .bind(entry.outcome.as_str())
        .bind(&entry.next_step)
        .bind(&entry.detail)
        .bind(entry.recorded_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(entry)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
