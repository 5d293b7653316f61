//! Task pool and claim manager.
//!
//! A step offers one pool task with `required_approvals` open slots. Claiming
//! takes a slot and removes the claimant from the pool's eligible set;
//! unclaiming gives both back.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::definition::Step;
use crate::engine::{announce, WorkflowEngine};
use crate::error::{AppError, AppResult};
use crate::model::{
    ClaimedTask, HistoryOutcome, HistoryRecord, Page, PoolTask, PrincipalId, WorkflowItem,
};
use crate::notify::Outbox;
use crate::store::{require_item, restorable, StoreTx};

/// Create the pool task for a step the item just entered.
pub(crate) async fn enter_step(
    tx: &mut dyn StoreTx,
    item_id: Uuid,
    step: &Step,
    eligible: BTreeSet<PrincipalId>,
) -> AppResult<PoolTask> {
    if (eligible.len() as u32) < step.required_approvals {
        return Err(AppError::Configuration(format!(
            "step '{}' needs {} approvals but only {} principals are eligible",
            step.id,
            step.required_approvals,
            eligible.len()
        )));
    }

    let task = PoolTask::new(item_id, &step.id, eligible, step.required_approvals);
    tx.insert_pool_task(&task).await?;
    Ok(task)
}

fn ensure_claimable(item: &WorkflowItem, step_id: &str) -> AppResult<()> {
    if item.state.is_terminal() {
        return Err(AppError::InvalidState(format!(
            "workflow item {} is {}",
            item.id, item.state
        )));
    }
    if !item.is_at(step_id) {
        return Err(AppError::InvalidState(format!(
            "workflow item {} is not at step '{}'",
            item.id, step_id
        )));
    }
    if let Some(point) = item.pending_curation {
        return Err(AppError::InvalidState(format!(
            "workflow item {} is waiting for {} curation",
            item.id, point
        )));
    }
    Ok(())
}

impl WorkflowEngine {
    pub(crate) async fn open_pool(
        &self,
        tx: &mut dyn StoreTx,
        item: &WorkflowItem,
        step: &Step,
        eligible: BTreeSet<PrincipalId>,
        outbox: &mut Outbox,
    ) -> AppResult<PoolTask> {
        let task = enter_step(tx, item.id, step, eligible).await?;
        announce(outbox, &task.eligible, item);

        tracing::info!(
            workflow_item_id = %item.id,
            step_id = %step.id,
            eligible = task.eligible.len(),
            slots = task.open_slots,
            "Pool task created"
        );

        Ok(task)
    }

    /// Claim a pool task. Exactly one of several racing claimants wins each slot.
    pub async fn claim(
        &self,
        item_id: Uuid,
        step_id: &str,
        principal: &str,
    ) -> AppResult<ClaimedTask> {
        let mut tx = self.store.begin().await?;
        let result = claim_in(&mut *tx, item_id, step_id, principal).await;
        self.settle(tx, result, Outbox::new()).await
    }

    /// Give a claim back to the pool. `NotOwner` if the principal holds none.
    pub async fn unclaim(&self, item_id: Uuid, step_id: &str, principal: &str) -> AppResult<()> {
        let mut outbox = Outbox::new();
        let mut tx = self.store.begin().await?;
        let result = unclaim_in(&mut *tx, item_id, step_id, principal, &mut outbox).await;
        self.settle(tx, result, outbox).await
    }

    pub async fn list_pool_tasks_for(
        &self,
        principal: &str,
        page: Page,
    ) -> AppResult<Vec<PoolTask>> {
        self.store.pool_tasks_for(principal, page).await
    }

    pub async fn list_claimed_tasks_for(
        &self,
        principal: &str,
        page: Page,
    ) -> AppResult<Vec<ClaimedTask>> {
        self.store.claimed_tasks_for(principal, page).await
    }

    pub async fn pool_tasks_for_item(&self, item_id: Uuid) -> AppResult<Vec<PoolTask>> {
        self.store.pool_tasks_for_item(item_id).await
    }

    pub async fn claimed_tasks_for_item(&self, item_id: Uuid) -> AppResult<Vec<ClaimedTask>> {
        self.store.claimed_tasks_for_item(item_id).await
    }
}

async fn claim_in(
    tx: &mut dyn StoreTx,
    item_id: Uuid,
    step_id: &str,
    principal: &str,
) -> AppResult<ClaimedTask> {
    let item = require_item(tx, item_id).await?;
    ensure_claimable(&item, step_id)?;

    if tx.claim(item_id, step_id, principal).await?.is_some() {
        return Err(AppError::AlreadyClaimed(format!(
            "{} already holds item {} step '{}'",
            principal, item_id, step_id
        )));
    }
    if item.approvals.contains(principal) {
        return Err(AppError::AlreadyClaimed(format!(
            "{} already approved item {} step '{}'",
            principal, item_id, step_id
        )));
    }

    let Some(pool) = tx.pool_task(item_id, step_id).await? else {
        return Err(AppError::AlreadyClaimed(format!(
            "no open slot on item {} step '{}'",
            item_id, step_id
        )));
    };
    if !pool.is_eligible(principal) {
        return Err(AppError::Forbidden(format!(
            "{} is not eligible for item {} step '{}'",
            principal, item_id, step_id
        )));
    }

    let before = tx
        .take_pool_slot(item_id, step_id, principal)
        .await?
        .ok_or_else(|| {
            AppError::AlreadyClaimed(format!(
                "no open slot on item {} step '{}'",
                item_id, step_id
            ))
        })?;

    let mut claim = ClaimedTask::from_pool(&before, principal);
    for other in tx.claims_for_step(item_id, step_id).await? {
        claim.eligible.extend(other.eligible);
    }
    tx.insert_claim(&claim).await?;

    tx.append_history(
        HistoryRecord::new(item_id, HistoryOutcome::Claimed)
            .step(Some(step_id))
            .actor(Some(principal)),
    )
    .await?;

    tracing::info!(
        workflow_item_id = %item_id,
        step_id = %step_id,
        principal = %principal,
        "Task claimed"
    );

    Ok(claim)
}

async fn unclaim_in(
    tx: &mut dyn StoreTx,
    item_id: Uuid,
    step_id: &str,
    principal: &str,
    outbox: &mut Outbox,
) -> AppResult<()> {
    let item = require_item(tx, item_id).await?;

    let Some(claim) = tx.claim(item_id, step_id, principal).await? else {
        return Err(AppError::NotOwner(format!(
            "{} holds no claim on item {} step '{}'",
            principal, item_id, step_id
        )));
    };

    tx.delete_claim(item_id, step_id, principal).await?;

    let others: BTreeSet<PrincipalId> = tx
        .claims_for_step(item_id, step_id)
        .await?
        .into_iter()
        .map(|c| c.claimant)
        .collect();
    let eligible = restorable(&claim, &item.approvals, &others);
    let returned = PoolTask::new(item_id, step_id, eligible, 1);
    tx.release_pool_slot(&returned).await?;

    tx.append_history(
        HistoryRecord::new(item_id, HistoryOutcome::Unclaimed)
            .step(Some(step_id))
            .actor(Some(principal)),
    )
    .await?;

    announce(outbox, &returned.eligible, &item);

    tracing::info!(
        workflow_item_id = %item_id,
        step_id = %step_id,
        principal = %principal,
        "Task returned to pool"
    );

    Ok(())
}
