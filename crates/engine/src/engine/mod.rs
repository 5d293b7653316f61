//! Workflow engine.
//!
//! - **Lifecycle**: start, finalize, revert, abort
//! - **Pool**: pool tasks and claims
//! - **Transition**: runs actions and applies their outcome
//! - **Curation**: entry/completion curation and the resume callback
//! - **Guard**: `when` expressions on steps
//!
//! All mutations of one workflow item happen inside a single store
//! transaction. Archive and workspace hand-offs and notifications collected
//! along the way run only after commit.

pub mod curation;
pub mod guard;
pub mod lifecycle;
pub mod pool;
pub mod transition;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::actions::ActionRegistry;
use crate::collaborators::{
    Archive, Curator, Handoff, NoopCurator, RecordingArchive, RecordingWorkspace, Workspace,
};
use crate::definition::{DefinitionRegistry, Step, WorkflowDefinition};
use crate::error::{AppError, AppResult};
use crate::model::{CurationPoint, HistoryOutcome, PrincipalId, WorkflowItem};
use crate::notify::{EventKind, LogNotifier, Notifier, Outbox};
use crate::roles::{RoleResolver, StaticRoleSource};
use crate::store::{StoreTx, WorkflowStore};

pub use guard::GuardEvaluator;
pub use transition::{Transition, TransitionResult};

/// Actor recorded when curation, not a person, drives a transition.
pub const CURATION_ACTOR: &str = "curation";

/// Default administrator group.
pub const DEFAULT_ADMIN_GROUP: &str = "administrators";

const HANDOFF_ATTEMPTS: u32 = 3;
const HANDOFF_BACKOFF: Duration = Duration::from_millis(200);

/// The workflow engine. Cheap to clone.
#[derive(Clone)]
pub struct WorkflowEngine {
    pub(crate) registry: Arc<DefinitionRegistry>,
    pub(crate) roles: RoleResolver,
    pub(crate) actions: Arc<ActionRegistry>,
    pub(crate) curator: Arc<dyn Curator>,
    pub(crate) archive: Arc<dyn Archive>,
    pub(crate) workspace: Arc<dyn Workspace>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) store: Arc<dyn WorkflowStore>,
    pub(crate) guards: Arc<GuardEvaluator>,
}

impl WorkflowEngine {
    pub fn builder(
        registry: Arc<DefinitionRegistry>,
        store: Arc<dyn WorkflowStore>,
    ) -> EngineBuilder {
        EngineBuilder::new(registry, store)
    }

    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn roles(&self) -> &RoleResolver {
        &self.roles
    }

    /// Commit or roll back `tx` according to `result`. Once the commit went
    /// through, run the queued hand-offs and send the notifications.
    pub(crate) async fn settle<T>(
        &self,
        tx: Box<dyn StoreTx>,
        result: AppResult<T>,
        mut outbox: Outbox,
    ) -> AppResult<T> {
        let value = crate::store::finish(tx, result).await?;
        for handoff in outbox.take_handoffs() {
            self.deliver(&handoff).await;
        }
        outbox.dispatch(self.notifier.clone());
        Ok(value)
    }

    /// Run a committed hand-off. The transition already stands, so a
    /// hand-off that keeps failing is logged with what is needed to replay it.
    async fn deliver(&self, handoff: &Handoff) {
        for attempt in 1..=HANDOFF_ATTEMPTS {
            let result = match handoff {
                Handoff::Install {
                    archived_id,
                    content,
                } => self.archive.install(*archived_id, content).await,
                Handoff::Return {
                    content,
                    actor,
                    reason,
                } => {
                    self.workspace
                        .return_to_workspace(content, actor, reason)
                        .await
                }
            };

            match result {
                Ok(()) => return,
                Err(e) if attempt < HANDOFF_ATTEMPTS => {
                    tracing::warn!(
                        error = %e,
                        content_id = %handoff.content().id,
                        attempt,
                        "Hand-off failed, retrying"
                    );
                    tokio::time::sleep(HANDOFF_BACKOFF * attempt).await;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        handoff = ?handoff,
                        "Hand-off failed after commit"
                    );
                }
            }
        }
    }

    /// Principals eligible for a step of this item.
    pub(crate) async fn eligible_for(
        &self,
        definition: &WorkflowDefinition,
        step: &Step,
        item: &WorkflowItem,
    ) -> AppResult<BTreeSet<PrincipalId>> {
        let role = definition.role_for(step).ok_or_else(|| {
            AppError::Configuration(format!(
                "step '{}' references undeclared role '{}'",
                step.id, step.role
            ))
        })?;
        self.roles
            .resolve(role, &item.container_id, &item.content)
            .await
    }

    /// Find the next applicable step after `after` (or the first when `None`)
    /// and enter it. Archives the item when no step applies.
    pub(crate) async fn advance(
        &self,
        tx: &mut dyn StoreTx,
        item: &mut WorkflowItem,
        definition: &WorkflowDefinition,
        after: Option<&str>,
        outbox: &mut Outbox,
    ) -> AppResult<Progress> {
        let candidates = match after {
            Some(step_id) => definition.steps_after(step_id),
            None => &definition.steps[..],
        };
        self.advance_through(tx, item, definition, candidates, outbox)
            .await
    }

    /// Enter the first applicable step of `candidates`, or archive the item.
    pub(crate) async fn advance_through(
        &self,
        tx: &mut dyn StoreTx,
        item: &mut WorkflowItem,
        definition: &WorkflowDefinition,
        candidates: &[Step],
        outbox: &mut Outbox,
    ) -> AppResult<Progress> {
        for step in candidates {
            if let Some(ref when) = step.when {
                if !self.guards.evaluate(when, item)? {
                    tracing::debug!(
                        workflow_item_id = %item.id,
                        step_id = %step.id,
                        "Step skipped by guard"
                    );
                    continue;
                }
            }

            let eligible = self.eligible_for(definition, step, item).await?;
            if eligible.is_empty() {
                if step.skip_if_no_reviewers {
                    tracing::info!(
                        workflow_item_id = %item.id,
                        step_id = %step.id,
                        "Step skipped, role resolves to nobody"
                    );
                    continue;
                }
                return Err(AppError::Configuration(format!(
                    "step '{}' has no eligible reviewers",
                    step.id
                )));
            }

            return self.enter_step(tx, item, step, eligible, outbox).await;
        }

        let archived_item_id = self.finalize(tx, item, outbox).await?;
        Ok(Progress::Archived { archived_item_id })
    }

    /// Move the item onto `step`: entry curation, then the pool task.
    pub(crate) async fn enter_step(
        &self,
        tx: &mut dyn StoreTx,
        item: &mut WorkflowItem,
        step: &Step,
        eligible: BTreeSet<PrincipalId>,
        outbox: &mut Outbox,
    ) -> AppResult<Progress> {
        item.move_to(Some(&step.id));

        match self.curate(item, step, CurationPoint::Entry).await? {
            CurationGate::Proceed => {}
            CurationGate::Queued => {
                item.pending_curation = Some(CurationPoint::Entry);
                tx.update_item(item).await?;
                return Ok(Progress::CurationQueued {
                    step: step.id.clone(),
                    point: CurationPoint::Entry,
                });
            }
            CurationGate::Rejected(reason) => {
                self.revert(tx, item, CURATION_ACTOR, &reason, outbox).await?;
                return Ok(Progress::Returned { reason });
            }
        }

        self.open_pool(tx, item, step, eligible, outbox).await?;
        tx.update_item(item).await?;
        Ok(Progress::Entered {
            step: step.id.clone(),
        })
    }
}

/// Where an item ended up after the engine moved it forward.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Progress {
    Entered { step: String },
    CurationQueued { step: String, point: CurationPoint },
    Archived { archived_item_id: Uuid },
    Returned { reason: String },
}

impl Progress {
    /// History outcome, next step and detail describing this progress.
    pub(crate) fn history(&self) -> (HistoryOutcome, Option<&str>, Option<String>) {
        match self {
            Progress::Entered { step } => (HistoryOutcome::Advanced, Some(step.as_str()), None),
            Progress::CurationQueued { step, point } => (
                HistoryOutcome::CurationQueued,
                Some(step.as_str()),
                Some(format!("curation queued at {}", point)),
            ),
            Progress::Archived { archived_item_id } => (
                HistoryOutcome::Archived,
                None,
                Some(format!("archived as {}", archived_item_id)),
            ),
            Progress::Returned { reason } => (HistoryOutcome::Rejected, None, Some(reason.clone())),
        }
    }

    pub(crate) fn into_transition(self) -> Transition {
        match self {
            Progress::Entered { step } => Transition::Advanced { step },
            Progress::CurationQueued { step, point } => Transition::CurationQueued { step, point },
            Progress::Archived { archived_item_id } => Transition::Archived { archived_item_id },
            Progress::Returned { reason } => Transition::Returned { reason },
        }
    }
}

/// Whether a step may proceed after curation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CurationGate {
    Proceed,
    Queued,
    Rejected(String),
}

/// Builds a [`WorkflowEngine`] with reference collaborators by default.
pub struct EngineBuilder {
    registry: Arc<DefinitionRegistry>,
    store: Arc<dyn WorkflowStore>,
    roles: Option<RoleResolver>,
    actions: Option<Arc<ActionRegistry>>,
    curator: Arc<dyn Curator>,
    archive: Arc<dyn Archive>,
    workspace: Arc<dyn Workspace>,
    notifier: Arc<dyn Notifier>,
}

impl EngineBuilder {
    pub fn new(registry: Arc<DefinitionRegistry>, store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            registry,
            store,
            roles: None,
            actions: None,
            curator: Arc::new(NoopCurator),
            archive: Arc::new(RecordingArchive::new()),
            workspace: Arc::new(RecordingWorkspace::new()),
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn roles(mut self, roles: RoleResolver) -> Self {
        self.roles = Some(roles);
        self
    }

    pub fn actions(mut self, actions: Arc<ActionRegistry>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn curator(mut self, curator: Arc<dyn Curator>) -> Self {
        self.curator = curator;
        self
    }

    pub fn archive(mut self, archive: Arc<dyn Archive>) -> Self {
        self.archive = archive;
        self
    }

    pub fn workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.workspace = workspace;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn build(self) -> WorkflowEngine {
        WorkflowEngine {
            registry: self.registry,
            roles: self.roles.unwrap_or_else(|| {
                RoleResolver::new(Arc::new(StaticRoleSource::default()), DEFAULT_ADMIN_GROUP)
            }),
            actions: self
                .actions
                .unwrap_or_else(|| Arc::new(ActionRegistry::with_builtins())),
            curator: self.curator,
            archive: self.archive,
            workspace: self.workspace,
            notifier: self.notifier,
            store: self.store,
            guards: Arc::new(GuardEvaluator::new()),
        }
    }
}

/// Queue a task-available notification for everyone in the pool.
pub(crate) fn announce(outbox: &mut Outbox, eligible: &BTreeSet<PrincipalId>, item: &WorkflowItem) {
    outbox.push_all(eligible, EventKind::TaskAvailable, item);
}
