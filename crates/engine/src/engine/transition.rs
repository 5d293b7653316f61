//! Action execution and the transition table.
//!
//! | Outcome            | Effect                                                      |
//! |--------------------|-------------------------------------------------------------|
//! | `Continue`         | claim kept, content changes saved                           |
//! | `CompleteStep`     | next stage opened, or claim consumed and approval recorded  |
//! | `Reject`           | item returned to the submitter, record deleted              |
//! | `Abort`            | administrators only; item aborted                           |
//! | `Route`            | step left through a named outcome, no approval needed       |
//! | `MoreInputNeeded`  | nothing changes                                             |
//!
//! A stage action runs only after the mandatory stages before it. Completing
//! a stage that has mandatory stages after it keeps the claim and opens the
//! next one; completing the last one approves the step.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actions::{ActionContext, ActionOutcome};
use crate::definition::ActionConfig;
use crate::definition::{Step, WorkflowDefinition};
use crate::engine::{CurationGate, Progress, WorkflowEngine, CURATION_ACTOR};
use crate::error::{AppError, AppResult};
use crate::model::{ClaimedTask, CurationPoint, HistoryOutcome, HistoryRecord, WorkflowItem};
use crate::notify::Outbox;
use crate::store::{require_item, StoreTx};

/// What a transition did to the workflow item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    Continued,
    NextAction { action: String },
    InputRequired,
    AwaitingApprovals { remaining: u32 },
    Advanced { step: String },
    CurationQueued { step: String, point: CurationPoint },
    Archived { archived_item_id: Uuid },
    Returned { reason: String },
    Aborted,
}

/// Result of `execute` and the other transition entry points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionResult {
    pub workflow_item_id: Uuid,
    #[serde(flatten)]
    pub transition: Transition,
    /// Sequence of the history entry written, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_seq: Option<i64>,
}

impl TransitionResult {
    pub(crate) fn new(
        workflow_item_id: Uuid,
        transition: Transition,
        history_seq: Option<i64>,
    ) -> Self {
        Self {
            workflow_item_id,
            transition,
            history_seq,
        }
    }
}

impl WorkflowEngine {
    /// Run an action on a claimed task and apply its outcome.
    pub async fn execute(
        &self,
        item_id: Uuid,
        step_id: &str,
        principal: &str,
        action_id: &str,
        input: serde_json::Value,
    ) -> AppResult<TransitionResult> {
        let mut outbox = Outbox::new();
        let mut tx = self.store.begin().await?;
        let result = self
            .execute_in(&mut *tx, item_id, step_id, principal, action_id, &input, &mut outbox)
            .await;
        self.settle(tx, result, outbox).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_in(
        &self,
        tx: &mut dyn StoreTx,
        item_id: Uuid,
        step_id: &str,
        principal: &str,
        action_id: &str,
        input: &serde_json::Value,
        outbox: &mut Outbox,
    ) -> AppResult<TransitionResult> {
        let mut item = require_item(tx, item_id).await?;
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

        let mut claim = tx.claim(item_id, step_id, principal).await?.ok_or_else(|| {
            AppError::NotOwner(format!(
                "{} holds no claim on item {} step '{}'",
                principal, item_id, step_id
            ))
        })?;

        let definition = self.registry.get_by_id(&item.workflow_id)?;
        let step = definition.get_step(step_id).ok_or_else(|| {
            AppError::Configuration(format!(
                "workflow '{}' has no step '{}'",
                definition.id(),
                step_id
            ))
        })?;
        let action = step.action(action_id).ok_or_else(|| {
            AppError::Validation(format!(
                "action '{}' is not offered at step '{}' (expected one of {:?})",
                action_id,
                step_id,
                step.action_ids()
            ))
        })?;

        if !step.repeatable && claim.performed_actions.iter().any(|a| a == action_id) {
            return Err(AppError::InvalidState(format!(
                "action '{}' already performed under this claim",
                action_id
            )));
        }

        if let Some(pending) = self
            .actions
            .pending_before(step, action_id, &claim.performed_actions)
        {
            return Err(AppError::InvalidState(format!(
                "action '{}' must be performed before '{}' at step '{}'",
                pending.id, action_id, step_id
            )));
        }

        let mut content = item.content.clone();
        let ctx = ActionContext {
            item: &item,
            step,
            action,
            principal,
            input,
        };
        let outcome = self.actions.execute(ctx, &mut content).await?;

        tracing::info!(
            workflow_item_id = %item_id,
            step_id = %step_id,
            principal = %principal,
            action_id = %action_id,
            outcome = ?outcome,
            "Action executed"
        );

        match outcome {
            ActionOutcome::MoreInputNeeded => Ok(TransitionResult::new(
                item_id,
                Transition::InputRequired,
                None,
            )),

            ActionOutcome::Continue => {
                item.content = content;
                item.updated_at = chrono::Utc::now();
                tx.update_item(&item).await?;

                claim.performed_actions.push(action_id.to_string());
                tx.update_claim(&claim).await?;

                let entry = tx
                    .append_history(
                        HistoryRecord::new(item_id, HistoryOutcome::Continued)
                            .step(Some(step_id))
                            .action(action_id)
                            .actor(Some(principal)),
                    )
                    .await?;
                Ok(TransitionResult::new(
                    item_id,
                    Transition::Continued,
                    Some(entry.seq),
                ))
            }

            ActionOutcome::CompleteStep => {
                if let Some(next) = self.actions.next_after(step, action_id) {
                    item.content = content;
                    return self
                        .open_next_action(tx, item, claim, next, principal, action_id)
                        .await;
                }

                item.content = content;
                tx.delete_claim(item_id, step_id, principal).await?;
                item.approvals.insert(principal.to_string());
                item.updated_at = chrono::Utc::now();

                self.complete_step(
                    tx,
                    &mut item,
                    &definition,
                    step,
                    principal,
                    Some(action_id),
                    outbox,
                )
                .await
            }

            ActionOutcome::Reject { reason } => {
                item.content = content;
                self.revert(tx, &mut item, principal, &reason, outbox).await?;
                let entry = tx
                    .append_history(
                        HistoryRecord::new(item_id, HistoryOutcome::Rejected)
                            .step(Some(step_id))
                            .action(action_id)
                            .actor(Some(principal))
                            .detail(reason.clone()),
                    )
                    .await?;
                Ok(TransitionResult::new(
                    item_id,
                    Transition::Returned { reason },
                    Some(entry.seq),
                ))
            }

            ActionOutcome::Abort => {
                self.roles.authorize_admin(principal).await?;
                let reason = input_reason(input)
                    .unwrap_or_else(|| format!("aborted via action '{}'", action_id));
                let seq = self
                    .abort_in(tx, &mut item, principal, &reason, Some(action_id), outbox)
                    .await?;
                Ok(TransitionResult::new(item_id, Transition::Aborted, Some(seq)))
            }

            ActionOutcome::Route { outcome } => {
                item.content = content;
                self.route(
                    tx,
                    &mut item,
                    &definition,
                    step,
                    &outcome,
                    principal,
                    action_id,
                    outbox,
                )
                .await
            }
        }
    }

    /// Save the stage that just completed and keep the claim for `next`.
    async fn open_next_action(
        &self,
        tx: &mut dyn StoreTx,
        mut item: WorkflowItem,
        mut claim: ClaimedTask,
        next: &ActionConfig,
        principal: &str,
        action_id: &str,
    ) -> AppResult<TransitionResult> {
        item.updated_at = chrono::Utc::now();
        tx.update_item(&item).await?;

        claim.performed_actions.push(action_id.to_string());
        tx.update_claim(&claim).await?;

        let entry = tx
            .append_history(
                HistoryRecord::new(item.id, HistoryOutcome::Continued)
                    .step(Some(&claim.step_id))
                    .action(action_id)
                    .actor(Some(principal))
                    .detail(format!("next action '{}'", next.id)),
            )
            .await?;
        Ok(TransitionResult::new(
            item.id,
            Transition::NextAction {
                action: next.id.clone(),
            },
            Some(entry.seq),
        ))
    }

    /// Leave `step` through a named outcome. The item enters the step the
    /// outcome leads to, or the first applicable step after it.
    #[allow(clippy::too_many_arguments)]
    async fn route(
        &self,
        tx: &mut dyn StoreTx,
        item: &mut WorkflowItem,
        definition: &WorkflowDefinition,
        step: &Step,
        outcome: &str,
        principal: &str,
        action_id: &str,
        outbox: &mut Outbox,
    ) -> AppResult<TransitionResult> {
        let target = step.outcomes.get(outcome).ok_or_else(|| {
            AppError::Configuration(format!(
                "no alternate step was found for outcome '{}' of step '{}'",
                outcome, step.id
            ))
        })?;

        tx.purge_tasks(item.id).await?;
        item.updated_at = chrono::Utc::now();
        let progress = self
            .advance_through(tx, item, definition, definition.steps_from(target), outbox)
            .await?;

        let (history_outcome, next_step, detail) = progress.history();
        let history_outcome = match history_outcome {
            HistoryOutcome::Advanced => HistoryOutcome::Routed,
            other => other,
        };
        let entry = tx
            .append_history(
                HistoryRecord::new(item.id, history_outcome)
                    .step(Some(&step.id))
                    .action(action_id)
                    .actor(Some(principal))
                    .next_step(next_step)
                    .detail(detail.unwrap_or_else(|| format!("outcome '{}'", outcome))),
            )
            .await?;

        tracing::info!(
            workflow_item_id = %item.id,
            step_id = %step.id,
            outcome = %outcome,
            progress = ?progress,
            "Step left through outcome"
        );

        Ok(TransitionResult::new(
            item.id,
            progress.into_transition(),
            Some(entry.seq),
        ))
    }

    /// Record that the step has an approval; finish it at quorum.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn complete_step(
        &self,
        tx: &mut dyn StoreTx,
        item: &mut WorkflowItem,
        definition: &WorkflowDefinition,
        step: &Step,
        principal: &str,
        action_id: Option<&str>,
        outbox: &mut Outbox,
    ) -> AppResult<TransitionResult> {
        let approvals = item.approvals.len() as u32;
        let item_id = item.id;

        if approvals < step.required_approvals {
            let remaining = step.required_approvals - approvals;
            tx.update_item(item).await?;
            let mut record = HistoryRecord::new(item_id, HistoryOutcome::Approved)
                .step(Some(&step.id))
                .actor(Some(principal))
                .detail(format!("{} of {} approvals", approvals, step.required_approvals));
            if let Some(action_id) = action_id {
                record = record.action(action_id);
            }
            let entry = tx.append_history(record).await?;
            return Ok(TransitionResult::new(
                item_id,
                Transition::AwaitingApprovals { remaining },
                Some(entry.seq),
            ));
        }

        tx.purge_tasks(item_id).await?;

        let progress = match self.curate(item, step, CurationPoint::Completion).await? {
            CurationGate::Proceed => {
                self.advance(tx, item, definition, Some(&step.id), outbox)
                    .await?
            }
            CurationGate::Queued => {
                item.pending_curation = Some(CurationPoint::Completion);
                tx.update_item(item).await?;
                Progress::CurationQueued {
                    step: step.id.clone(),
                    point: CurationPoint::Completion,
                }
            }
            CurationGate::Rejected(reason) => {
                self.revert(tx, item, CURATION_ACTOR, &reason, outbox).await?;
                Progress::Returned { reason }
            }
        };

        let (outcome, next_step, detail) = progress.history();
        let mut record = HistoryRecord::new(item_id, outcome)
            .step(Some(&step.id))
            .actor(Some(principal))
            .next_step(next_step);
        if let Some(action_id) = action_id {
            record = record.action(action_id);
        }
        if let Some(detail) = detail {
            record = record.detail(detail);
        }
        let entry = tx.append_history(record).await?;

        tracing::info!(
            workflow_item_id = %item_id,
            step_id = %step.id,
            progress = ?progress,
            "Step completed"
        );

        Ok(TransitionResult::new(
            item_id,
            progress.into_transition(),
            Some(entry.seq),
        ))
    }
}

fn input_reason(input: &serde_json::Value) -> Option<String> {
    input
        .get("reason")
        .and_then(|r| r.as_str())
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}
