//! Persistence for workflow items, tasks and history.
//!
//! Every mutation goes through a [`StoreTx`]: the engine locks the item,
//! changes state, appends history and commits in one unit. Dropping or
//! rolling back a transaction discards all of it.

pub mod memory;
pub mod postgres;

use std::collections::BTreeSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::result_ext::ResultExt;
use crate::model::{
    ClaimedTask, HistoryEntry, HistoryRecord, Page, PoolTask, PrincipalId, WorkflowItem,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Read side of the store plus the transaction factory.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>>;

    async fn get_item(&self, id: Uuid) -> AppResult<Option<WorkflowItem>>;

    /// Items ordered by creation time.
    async fn list_items(&self, page: Page) -> AppResult<Vec<WorkflowItem>>;

    /// Pool tasks the principal may claim, oldest first.
    async fn pool_tasks_for(&self, principal: &str, page: Page) -> AppResult<Vec<PoolTask>>;

    /// Claims held by the principal, oldest first.
    async fn claimed_tasks_for(&self, principal: &str, page: Page) -> AppResult<Vec<ClaimedTask>>;

    async fn pool_tasks_for_item(&self, id: Uuid) -> AppResult<Vec<PoolTask>>;

    async fn claimed_tasks_for_item(&self, id: Uuid) -> AppResult<Vec<ClaimedTask>>;

    /// History of an item, by sequence. Kept after the item is deleted.
    async fn history(&self, id: Uuid) -> AppResult<Vec<HistoryEntry>>;

    async fn health_check(&self) -> bool;

    /// Backend name for health reporting.
    fn backend(&self) -> &'static str;
}

/// One unit of work against the store.
#[async_trait]
pub trait StoreTx: Send {
    /// Load the item and hold it exclusively until commit or rollback.
    async fn lock_item(&mut self, id: Uuid) -> AppResult<Option<WorkflowItem>>;

    async fn insert_item(&mut self, item: &WorkflowItem) -> AppResult<()>;

    async fn update_item(&mut self, item: &WorkflowItem) -> AppResult<()>;

    async fn delete_item(&mut self, id: Uuid) -> AppResult<()>;

    async fn pool_task(&mut self, id: Uuid, step_id: &str) -> AppResult<Option<PoolTask>>;

    /// Insert a pool task; `DuplicateStepEntry` if one exists for the pair.
    async fn insert_pool_task(&mut self, task: &PoolTask) -> AppResult<()>;

    /// Take one slot for `principal` if eligible and a slot is open.
    ///
    /// The principal leaves the pool's eligible set; the entry disappears
    /// when its last slot is taken. Returns the pool task as it was before
    /// the slot was taken, or `None` when nothing could be taken.
    async fn take_pool_slot(
        &mut self,
        id: Uuid,
        step_id: &str,
        principal: &str,
    ) -> AppResult<Option<PoolTask>>;

    /// Give a slot back: add one slot and the given principals to an existing
    /// pool entry, or insert `task` if the entry is gone.
    async fn release_pool_slot(&mut self, task: &PoolTask) -> AppResult<()>;

    /// Insert a claim; `AlreadyClaimed` if the principal already holds one.
    async fn insert_claim(&mut self, claim: &ClaimedTask) -> AppResult<()>;

    async fn claim(
        &mut self,
        id: Uuid,
        step_id: &str,
        principal: &str,
    ) -> AppResult<Option<ClaimedTask>>;

    async fn claims_for_step(&mut self, id: Uuid, step_id: &str) -> AppResult<Vec<ClaimedTask>>;

    async fn update_claim(&mut self, claim: &ClaimedTask) -> AppResult<()>;

    /// Returns whether a claim was removed.
    async fn delete_claim(&mut self, id: Uuid, step_id: &str, principal: &str) -> AppResult<bool>;

    /// Remove every pool and claimed task of the item.
    async fn purge_tasks(&mut self, id: Uuid) -> AppResult<()>;

    /// Append a history entry with the next sequence number.
    async fn append_history(&mut self, record: HistoryRecord) -> AppResult<HistoryEntry>;

    async fn commit(self: Box<Self>) -> AppResult<()>;

    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

/// Commit on success, roll back on failure, and pass the result through.
pub async fn finish<T>(tx: Box<dyn StoreTx>, result: AppResult<T>) -> AppResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await.log("committing workflow transaction")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// Lock an item that must exist.
pub async fn require_item(tx: &mut dyn StoreTx, id: Uuid) -> AppResult<WorkflowItem> {
    tx.lock_item(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Workflow item {} not found", id)))
}

/// Eligible set to put back into the pool when a claim is released.
pub fn restorable(
    claim: &ClaimedTask,
    approvals: &BTreeSet<PrincipalId>,
    other_claimants: &BTreeSet<PrincipalId>,
) -> BTreeSet<PrincipalId> {
    claim
        .eligible
        .iter()
        .filter(|p| !approvals.contains(*p) && !other_claimants.contains(*p))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restorable_excludes_approvers_and_claimants() {
        let pool = PoolTask::new(
            Uuid::new_v4(),
            "review",
            ["a", "b", "c", "d"].into_iter().map(String::from).collect(),
            3,
        );
        let claim = ClaimedTask::from_pool(&pool, "a");
        let approvals = BTreeSet::from(["b".to_string()]);
        let others = BTreeSet::from(["c".to_string()]);

        let restored = restorable(&claim, &approvals, &others);
        assert_eq!(
            restored,
            BTreeSet::from(["a".to_string(), "d".to_string()])
        );
    }
}
