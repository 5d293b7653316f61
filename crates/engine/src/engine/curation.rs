//! Curation coupling.
//!
//! Curation runs inside the item's transaction at step entry and/or
//! completion. A queued run parks the item on its step without tasks until
//! [`WorkflowEngine::resume_curation`] delivers the result. A curator may
//! also reject by failing with [`AppError::CurationRejected`]; that is a
//! REJECT transition, not an error for the caller.

use uuid::Uuid;

use crate::collaborators::CurationResult;
use crate::definition::{Step, WorkflowDefinition};
use crate::engine::{CurationGate, Progress, TransitionResult, WorkflowEngine, CURATION_ACTOR};
use crate::error::{AppError, AppResult};
use crate::model::{CurationPoint, HistoryOutcome, HistoryRecord, WorkflowItem};
use crate::notify::Outbox;
use crate::store::{require_item, StoreTx};

impl WorkflowEngine {
    /// Run curation for a step point if the curator wants to.
    pub(crate) async fn curate(
        &self,
        item: &WorkflowItem,
        step: &Step,
        point: CurationPoint,
    ) -> AppResult<CurationGate> {
        if !self.curator.should_curate(item, step, point) {
            return Ok(CurationGate::Proceed);
        }

        let result = match self.curator.run_curation(item, step, point).await {
            Err(AppError::CurationRejected(reason)) => CurationResult::Rejected(reason),
            other => other?,
        };
        tracing::info!(
            workflow_item_id = %item.id,
            step_id = %step.id,
            point = %point,
            result = ?result,
            "Curation finished"
        );

        Ok(match result {
            CurationResult::Completed => CurationGate::Proceed,
            CurationResult::Queued => CurationGate::Queued,
            CurationResult::Rejected(reason) => CurationGate::Rejected(reason),
        })
    }

    /// Deliver the result of a queued curation run.
    pub async fn resume_curation(
        &self,
        item_id: Uuid,
        result: CurationResult,
    ) -> AppResult<TransitionResult> {
        let mut outbox = Outbox::new();
        let mut tx = self.store.begin().await?;
        let outcome = self.resume_in(&mut *tx, item_id, result, &mut outbox).await;
        self.settle(tx, outcome, outbox).await
    }

    async fn resume_in(
        &self,
        tx: &mut dyn StoreTx,
        item_id: Uuid,
        result: CurationResult,
        outbox: &mut Outbox,
    ) -> AppResult<TransitionResult> {
        let mut item = require_item(tx, item_id).await?;
        let (Some(point), Some(step_id)) = (item.pending_curation, item.current_step.clone()) else {
            return Err(AppError::InvalidState(format!(
                "workflow item {} has no pending curation",
                item_id
            )));
        };

        let definition = self.registry.get_by_id(&item.workflow_id)?;
        let step = definition.get_step(&step_id).ok_or_else(|| {
            AppError::Configuration(format!(
                "workflow '{}' has no step '{}'",
                definition.id(),
                step_id
            ))
        })?;

        let progress = match result {
            CurationResult::Queued => {
                return Err(AppError::Validation(
                    "a resumed curation must be completed or rejected".to_string(),
                ))
            }
            CurationResult::Rejected(reason) => {
                self.revert(tx, &mut item, CURATION_ACTOR, &reason, outbox)
                    .await?;
                Progress::Returned { reason }
            }
            CurationResult::Completed => {
                item.pending_curation = None;
                match point {
                    CurationPoint::Entry => {
                        self.reenter(tx, &mut item, &definition, step, outbox)
                            .await?
                    }
                    CurationPoint::Completion => {
                        self.advance(tx, &mut item, &definition, Some(&step_id), outbox)
                            .await?
                    }
                }
            }
        };

        let (outcome, next_step, detail) = progress.history();
        let outcome = match outcome {
            HistoryOutcome::Advanced => HistoryOutcome::CurationResumed,
            other => other,
        };
        let record = HistoryRecord::new(item_id, outcome)
            .step(Some(&step_id))
            .actor(Some(CURATION_ACTOR))
            .next_step(next_step)
            .detail(detail.unwrap_or_else(|| format!("{} curation completed", point)));
        let entry = tx.append_history(record).await?;

        Ok(TransitionResult::new(
            item_id,
            progress.into_transition(),
            Some(entry.seq),
        ))
    }

    /// Open the pool of a step whose entry curation just passed. The role is
    /// resolved again: membership may have changed while the item waited.
    async fn reenter(
        &self,
        tx: &mut dyn StoreTx,
        item: &mut WorkflowItem,
        definition: &WorkflowDefinition,
        step: &Step,
        outbox: &mut Outbox,
    ) -> AppResult<Progress> {
        let eligible = self.eligible_for(definition, step, item).await?;

        if eligible.is_empty() && step.skip_if_no_reviewers {
            tracing::info!(
                workflow_item_id = %item.id,
                step_id = %step.id,
                "Step skipped after curation, role resolves to nobody"
            );
            return self
                .advance(tx, item, definition, Some(&step.id), outbox)
                .await;
        }

        if (eligible.len() as u32) < step.required_approvals {
            let reason = format!(
                "step '{}' needs {} approvals but only {} principals are eligible",
                step.id,
                step.required_approvals,
                eligible.len()
            );
            self.revert(tx, item, CURATION_ACTOR, &reason, outbox).await?;
            return Ok(Progress::Returned { reason });
        }

        self.open_pool(tx, item, step, eligible, outbox).await?;
        item.updated_at = chrono::Utc::now();
        tx.update_item(item).await?;
        Ok(Progress::Entered {
            step: step.id.clone(),
        })
    }
}
