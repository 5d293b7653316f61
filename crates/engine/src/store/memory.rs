//! In-memory store.
//!
//! Transactions are serialized behind one async mutex. Each transaction
//! works on a copy of the state and swaps it in on commit, so a rollback (or
//! a dropped transaction) leaves nothing behind.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::model::{ClaimedTask, HistoryEntry, HistoryRecord, Page, PoolTask, WorkflowItem};
use crate::store::{StoreTx, WorkflowStore};

type PoolKey = (Uuid, String);
type ClaimKey = (Uuid, String, String);

#[derive(Debug, Default, Clone)]
struct MemoryState {
    items: HashMap<Uuid, WorkflowItem>,
    pool: BTreeMap<PoolKey, PoolTask>,
    claims: BTreeMap<ClaimKey, ClaimedTask>,
    history: HashMap<Uuid, Vec<HistoryEntry>>,
}

/// Store that keeps everything in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail and discard its changes.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            fail_next_commit: self.fail_next_commit.clone(),
        }))
    }

    async fn get_item(&self, id: Uuid) -> AppResult<Option<WorkflowItem>> {
        Ok(self.state.lock().await.items.get(&id).cloned())
    }

    async fn list_items(&self, page: Page) -> AppResult<Vec<WorkflowItem>> {
        let state = self.state.lock().await;
        let mut items: Vec<WorkflowItem> = state.items.values().cloned().collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        Ok(page.slice(items))
    }

    async fn pool_tasks_for(&self, principal: &str, page: Page) -> AppResult<Vec<PoolTask>> {
        let state = self.state.lock().await;
        let mut tasks: Vec<PoolTask> = state
            .pool
            .values()
            .filter(|t| t.is_eligible(principal))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.workflow_item_id));
        Ok(page.slice(tasks))
    }

    async fn claimed_tasks_for(&self, principal: &str, page: Page) -> AppResult<Vec<ClaimedTask>> {
        let state = self.state.lock().await;
        let mut tasks: Vec<ClaimedTask> = state
            .claims
            .values()
            .filter(|c| c.claimant == principal)
            .cloned()
            .collect();
        tasks.sort_by_key(|c| (c.claimed_at, c.workflow_item_id));
        Ok(page.slice(tasks))
    }

    async fn pool_tasks_for_item(&self, id: Uuid) -> AppResult<Vec<PoolTask>> {
        let state = self.state.lock().await;
        Ok(state
            .pool
            .values()
            .filter(|t| t.workflow_item_id == id)
            .cloned()
            .collect())
    }

    async fn claimed_tasks_for_item(&self, id: Uuid) -> AppResult<Vec<ClaimedTask>> {
        let state = self.state.lock().await;
        Ok(state
            .claims
            .values()
            .filter(|c| c.workflow_item_id == id)
            .cloned()
            .collect())
    }

    async fn history(&self, id: Uuid) -> AppResult<Vec<HistoryEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_next_commit: Arc<AtomicBool>,
}

fn pool_key(id: Uuid, step_id: &str) -> PoolKey {
    (id, step_id.to_string())
}

fn claim_key(id: Uuid, step_id: &str, principal: &str) -> ClaimKey {
    (id, step_id.to_string(), principal.to_string())
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_item(&mut self, id: Uuid) -> AppResult<Option<WorkflowItem>> {
        Ok(self.working.items.get(&id).cloned())
    }

    async fn insert_item(&mut self, item: &WorkflowItem) -> AppResult<()> {
        if self.working.items.contains_key(&item.id) {
            return Err(AppError::Persistence(format!(
                "workflow item {} already exists",
                item.id
            )));
        }
        self.working.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_item(&mut self, item: &WorkflowItem) -> AppResult<()> {
        match self.working.items.get_mut(&item.id) {
            Some(existing) => {
                *existing = item.clone();
                Ok(())
            }
            None => Err(AppError::Persistence(format!(
                "workflow item {} vanished",
                item.id
            ))),
        }
    }

    async fn delete_item(&mut self, id: Uuid) -> AppResult<()> {
        self.working.items.remove(&id);
        Ok(())
    }

    async fn pool_task(&mut self, id: Uuid, step_id: &str) -> AppResult<Option<PoolTask>> {
        Ok(self.working.pool.get(&pool_key(id, step_id)).cloned())
    }

    async fn insert_pool_task(&mut self, task: &PoolTask) -> AppResult<()> {
        let key = pool_key(task.workflow_item_id, &task.step_id);
        if self.working.pool.contains_key(&key) {
            return Err(AppError::DuplicateStepEntry(format!(
                "pool task exists for item {} step {}",
                task.workflow_item_id, task.step_id
            )));
        }
        self.working.pool.insert(key, task.clone());
        Ok(())
    }

    async fn take_pool_slot(
        &mut self,
        id: Uuid,
        step_id: &str,
        principal: &str,
    ) -> AppResult<Option<PoolTask>> {
        let key = pool_key(id, step_id);
        let Some(task) = self.working.pool.get_mut(&key) else {
            return Ok(None);
        };
        if task.open_slots == 0 || !task.is_eligible(principal) {
            return Ok(None);
        }

        let before = task.clone();
        task.open_slots -= 1;
        task.eligible.remove(principal);
        if task.open_slots == 0 {
            self.working.pool.remove(&key);
        }
        Ok(Some(before))
    }

    async fn release_pool_slot(&mut self, task: &PoolTask) -> AppResult<()> {
        let key = pool_key(task.workflow_item_id, &task.step_id);
        match self.working.pool.get_mut(&key) {
            Some(existing) => {
                existing.open_slots += 1;
                existing.eligible.extend(task.eligible.iter().cloned());
            }
            None => {
                self.working.pool.insert(key, task.clone());
            }
        }
        Ok(())
    }

    async fn insert_claim(&mut self, claim: &ClaimedTask) -> AppResult<()> {
        let key = claim_key(claim.workflow_item_id, &claim.step_id, &claim.claimant);
        if self.working.claims.contains_key(&key) {
            return Err(AppError::AlreadyClaimed(format!(
                "{} already holds item {} step {}",
                claim.claimant, claim.workflow_item_id, claim.step_id
            )));
        }
        self.working.claims.insert(key, claim.clone());
        Ok(())
    }

    async fn claim(
        &mut self,
        id: Uuid,
        step_id: &str,
        principal: &str,
    ) -> AppResult<Option<ClaimedTask>> {
        Ok(self
            .working
            .claims
            .get(&claim_key(id, step_id, principal))
            .cloned())
    }

    async fn claims_for_step(&mut self, id: Uuid, step_id: &str) -> AppResult<Vec<ClaimedTask>> {
        Ok(self
            .working
            .claims
            .values()
            .filter(|c| c.workflow_item_id == id && c.step_id == step_id)
            .cloned()
            .collect())
    }

    async fn update_claim(&mut self, claim: &ClaimedTask) -> AppResult<()> {
        let key = claim_key(claim.workflow_item_id, &claim.step_id, &claim.claimant);
        match self.working.claims.get_mut(&key) {
            Some(existing) => {
                *existing = claim.clone();
                Ok(())
            }
            None => Err(AppError::NotOwner(format!(
                "{} holds no claim on item {} step {}",
                claim.claimant, claim.workflow_item_id, claim.step_id
            ))),
        }
    }

    async fn delete_claim(&mut self, id: Uuid, step_id: &str, principal: &str) -> AppResult<bool> {
        Ok(self
            .working
            .claims
            .remove(&claim_key(id, step_id, principal))
            .is_some())
    }

    async fn purge_tasks(&mut self, id: Uuid) -> AppResult<()> {
        self.working.pool.retain(|(item, _), _| *item != id);
        self.working.claims.retain(|(item, _, _), _| *item != id);
        Ok(())
    }

    async fn append_history(&mut self, record: HistoryRecord) -> AppResult<HistoryEntry> {
        let entries = self
            .working
            .history
            .entry(record.workflow_item_id)
            .or_default();
        let seq = entries.last().map(|e| e.seq + 1).unwrap_or(1);
        let entry = record.into_entry(seq);
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx {
            mut guard,
            working,
            fail_next_commit,
        } = *self;

        if fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(AppError::Persistence(
                "commit failed (injected)".to_string(),
            ));
        }

        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}
