//! External collaborators the engine hands work to.
//!
//! The engine never persists content, sends mail or runs curation tasks
//! itself. Each concern is a trait; the server wires the reference
//! implementations below, embedders provide their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use crate::definition::Step;
use crate::error::{AppError, AppResult};
use crate::model::{ContentItem, CurationPoint, WorkflowItem};

/// Installs an approved content item into the permanent archive.
///
/// Archival is split in two. `reserve` runs inside the item's transaction
/// and may refuse, which rolls the transition back. `install` runs once the
/// transaction has committed.
#[async_trait]
pub trait Archive: Send + Sync {
    /// Allocate the identifier the item will be archived under.
    async fn reserve(&self, content: &ContentItem) -> AppResult<Uuid>;

    async fn install(&self, archived_id: Uuid, content: &ContentItem) -> AppResult<()>;
}

/// Hands a rejected content item back to its submitter.
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn return_to_workspace(
        &self,
        content: &ContentItem,
        actor: &str,
        reason: &str,
    ) -> AppResult<()>;
}

/// Outcome of an automated curation run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum CurationResult {
    Completed,
    Queued,
    Rejected(String),
}

/// Automated curation tasks run at step entry or completion.
#[async_trait]
pub trait Curator: Send + Sync {
    fn should_curate(&self, item: &WorkflowItem, step: &Step, point: CurationPoint) -> bool;

    async fn run_curation(
        &self,
        item: &WorkflowItem,
        step: &Step,
        point: CurationPoint,
    ) -> AppResult<CurationResult>;
}

/// Curator that runs nothing.
#[derive(Debug, Default, Clone)]
pub struct NoopCurator;

#[async_trait]
impl Curator for NoopCurator {
    fn should_curate(&self, _item: &WorkflowItem, _step: &Step, _point: CurationPoint) -> bool {
        false
    }

    async fn run_curation(
        &self,
        _item: &WorkflowItem,
        _step: &Step,
        _point: CurationPoint,
    ) -> AppResult<CurationResult> {
        Ok(CurationResult::Completed)
    }
}

/// Curator that runs whenever the step configures curation for the point
/// and returns a fixed result. Used by the server when curation is delegated
/// to an external queue (`queued`) and by tests.
#[derive(Debug)]
pub struct ConfiguredCurator {
    result: Mutex<CurationResult>,
}

impl ConfiguredCurator {
    pub fn new(result: CurationResult) -> Self {
        Self {
            result: Mutex::new(result),
        }
    }

    pub fn set_result(&self, result: CurationResult) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = result;
    }
}

#[async_trait]
impl Curator for ConfiguredCurator {
    fn should_curate(&self, _item: &WorkflowItem, step: &Step, point: CurationPoint) -> bool {
        match point {
            CurationPoint::Entry => step.curation.on_entry,
            CurationPoint::Completion => step.curation.on_completion,
        }
    }

    async fn run_curation(
        &self,
        item: &WorkflowItem,
        step: &Step,
        point: CurationPoint,
    ) -> AppResult<CurationResult> {
        let result = self
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        tracing::debug!(
            workflow_item_id = %item.id,
            step_id = %step.id,
            point = %point,
            tasks = ?step.curation.tasks,
            result = ?result,
            "Curation run"
        );
        Ok(result)
    }
}

/// Work for the archive or the workspace, queued until commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Handoff {
    Install {
        archived_id: Uuid,
        content: ContentItem,
    },
    Return {
        content: ContentItem,
        actor: String,
        reason: String,
    },
}

impl Handoff {
    pub fn content(&self) -> &ContentItem {
        match self {
            Handoff::Install { content, .. } | Handoff::Return { content, .. } => content,
        }
    }
}

/// Intake side: whatever produces submissions calls this.
#[async_trait]
pub trait Intake: Send + Sync {
    /// Submit content for review; returns the workflow item id.
    async fn submit(&self, content: ContentItem, container_id: &str) -> AppResult<Uuid>;
}

/// Archive that keeps installed items in memory.
#[derive(Debug, Default)]
pub struct RecordingArchive {
    reserved: Mutex<Vec<Uuid>>,
    installed: Mutex<Vec<(Uuid, ContentItem)>>,
    fail: AtomicBool,
}

impl RecordingArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following reservation fail.
    pub fn fail_installs(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Identifiers handed out, installed or not.
    pub fn reserved(&self) -> Vec<Uuid> {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn installed(&self) -> Vec<(Uuid, ContentItem)> {
        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, content_id: Uuid) -> bool {
        self.installed().iter().any(|(_, c)| c.id == content_id)
    }
}

#[async_trait]
impl Archive for RecordingArchive {
    async fn reserve(&self, content: &ContentItem) -> AppResult<Uuid> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Collaborator(format!(
                "archive unavailable for item {}",
                content.id
            )));
        }
        let archived_id = Uuid::new_v4();
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(archived_id);
        Ok(archived_id)
    }

    async fn install(&self, archived_id: Uuid, content: &ContentItem) -> AppResult<()> {
        if !self.reserved().contains(&archived_id) {
            return Err(AppError::Collaborator(format!(
                "archived id {} was never reserved",
                archived_id
            )));
        }
        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((archived_id, content.clone()));
        tracing::info!(content_id = %content.id, archived_id = %archived_id, "Item installed");
        Ok(())
    }
}

/// A returned submission as seen by the workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnedItem {
    pub content: ContentItem,
    pub actor: String,
    pub reason: String,
}

/// Workspace that keeps returned items in memory.
#[derive(Debug, Default)]
pub struct RecordingWorkspace {
    returned: Mutex<Vec<ReturnedItem>>,
}

impl RecordingWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returned(&self) -> Vec<ReturnedItem> {
        self.returned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Workspace for RecordingWorkspace {
    async fn return_to_workspace(
        &self,
        content: &ContentItem,
        actor: &str,
        reason: &str,
    ) -> AppResult<()> {
        self.returned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ReturnedItem {
                content: content.clone(),
                actor: actor.to_string(),
                reason: reason.to_string(),
            });
        tracing::info!(content_id = %content.id, actor = %actor, "Item returned to workspace");
        Ok(())
    }
}
