//! Workflow item lifecycle.
//!
//! `finalize` (archive) and `revert` (return to the submitter) are the only
//! two ways an item record is destroyed. Both queue their hand-off on the
//! outbox; the archive or workspace sees the item only after commit. An
//! aborted item is kept as a terminal record.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::collaborators::{Handoff, Intake};
use crate::engine::WorkflowEngine;
use crate::error::{AppError, AppResult};
use crate::model::{
    ContentItem, HistoryEntry, HistoryOutcome, HistoryRecord, ItemState, Page, WorkflowItem,
};
use crate::notify::{EventKind, Notification, Outbox};
use crate::store::{require_item, StoreTx};

/// Metadata key holding provenance notes.
pub const PROVENANCE_KEY: &str = "provenance";

/// Provenance note written when an item is rejected.
pub fn rejection_provenance(actor: &str, reason: &str, at: chrono::DateTime<Utc>) -> String {
    format!(
        "Rejected by {}, reason: {} on {} (GMT)",
        actor,
        reason,
        at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    )
}

fn add_provenance(content: &mut ContentItem, note: String) {
    let mut notes = content
        .metadata
        .get(PROVENANCE_KEY)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    notes.push(serde_json::Value::String(note));

    let mut patch = serde_json::Map::new();
    patch.insert(PROVENANCE_KEY.to_string(), serde_json::Value::Array(notes));
    content.merge_metadata(&serde_json::Value::Object(patch));
}

impl WorkflowEngine {
    /// Wrap a content item in a workflow item and put it on its first step.
    ///
    /// When no step applies the item is archived right away; the returned
    /// snapshot then has state `archived`.
    pub async fn start(&self, content: ContentItem, container_id: &str) -> AppResult<WorkflowItem> {
        self.start_with(content, container_id, Outbox::new()).await
    }

    /// Same as [`start`](Self::start) without notifying reviewers.
    pub async fn start_without_notify(
        &self,
        content: ContentItem,
        container_id: &str,
    ) -> AppResult<WorkflowItem> {
        self.start_with(content, container_id, Outbox::suppressed())
            .await
    }

    async fn start_with(
        &self,
        content: ContentItem,
        container_id: &str,
        mut outbox: Outbox,
    ) -> AppResult<WorkflowItem> {
        let definition = self.registry.get_definition(container_id)?;
        let mut item = WorkflowItem::new(definition.id(), container_id, content);

        let mut tx = self.store.begin().await?;
        let result = async {
            tx.insert_item(&item).await?;
            let progress = self
                .advance(&mut *tx, &mut item, &definition, None, &mut outbox)
                .await?;

            let (_, next_step, detail) = progress.history();
            let mut record = HistoryRecord::new(item.id, HistoryOutcome::Started)
                .actor(Some(&item.content.submitter))
                .next_step(next_step);
            if let Some(detail) = detail {
                record = record.detail(detail);
            }
            tx.append_history(record).await?;
            Ok::<_, AppError>(())
        }
        .await;
        self.settle(tx, result, outbox).await?;

        tracing::info!(
            workflow_item_id = %item.id,
            workflow_id = %item.workflow_id,
            container_id = %container_id,
            step_id = ?item.current_step,
            state = %item.state,
            "Workflow started"
        );

        Ok(item)
    }

    /// Archive: reserve an archived id, drop every task, delete the record.
    /// The content is installed after commit.
    pub(crate) async fn finalize(
        &self,
        tx: &mut dyn StoreTx,
        item: &mut WorkflowItem,
        outbox: &mut Outbox,
    ) -> AppResult<Uuid> {
        tx.purge_tasks(item.id).await?;
        let archived_item_id = self.archive.reserve(&item.content).await?;
        outbox.hand_off(Handoff::Install {
            archived_id: archived_item_id,
            content: item.content.clone(),
        });

        item.move_to(None);
        item.state = ItemState::Archived;
        tx.delete_item(item.id).await?;

        outbox.push(
            Notification::new(&item.content.submitter, EventKind::Archived, item)
                .with_detail(archived_item_id.to_string()),
        );

        tracing::info!(
            workflow_item_id = %item.id,
            archived_item_id = %archived_item_id,
            "Workflow item archived"
        );

        Ok(archived_item_id)
    }

    /// Return to the submitter with a reason: drop every task, delete the
    /// record. The content goes back to the workspace after commit.
    pub(crate) async fn revert(
        &self,
        tx: &mut dyn StoreTx,
        item: &mut WorkflowItem,
        actor: &str,
        reason: &str,
        outbox: &mut Outbox,
    ) -> AppResult<()> {
        tx.purge_tasks(item.id).await?;

        add_provenance(
            &mut item.content,
            rejection_provenance(actor, reason, Utc::now()),
        );
        outbox.hand_off(Handoff::Return {
            content: item.content.clone(),
            actor: actor.to_string(),
            reason: reason.to_string(),
        });

        item.approvals.clear();
        item.pending_curation = None;
        item.state = ItemState::Returned;
        item.updated_at = Utc::now();
        tx.delete_item(item.id).await?;

        outbox.push(
            Notification::new(&item.content.submitter, EventKind::Returned, item)
                .with_detail(reason),
        );

        tracing::info!(
            workflow_item_id = %item.id,
            actor = %actor,
            reason = %reason,
            "Workflow item returned to submitter"
        );

        Ok(())
    }

    /// Administrative abort. The record stays as a terminal tombstone.
    pub async fn abort(&self, item_id: Uuid, admin: &str, reason: &str) -> AppResult<WorkflowItem> {
        self.roles.authorize_admin(admin).await?;

        let mut outbox = Outbox::new();
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut item = require_item(&mut *tx, item_id).await?;
            self.abort_in(&mut *tx, &mut item, admin, reason, None, &mut outbox)
                .await?;
            Ok::<_, AppError>(item)
        }
        .await;
        self.settle(tx, result, outbox).await
    }

    /// Abort inside an open transaction. Returns the history sequence.
    pub(crate) async fn abort_in(
        &self,
        tx: &mut dyn StoreTx,
        item: &mut WorkflowItem,
        admin: &str,
        reason: &str,
        action_id: Option<&str>,
        outbox: &mut Outbox,
    ) -> AppResult<i64> {
        if item.state.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "workflow item {} is already {}",
                item.id, item.state
            )));
        }

        tx.purge_tasks(item.id).await?;
        item.state = ItemState::Aborted;
        item.approvals.clear();
        item.pending_curation = None;
        item.updated_at = Utc::now();
        tx.update_item(item).await?;

        let mut record = HistoryRecord::new(item.id, HistoryOutcome::Aborted)
            .step(item.current_step.as_deref())
            .actor(Some(admin))
            .detail(reason);
        if let Some(action_id) = action_id {
            record = record.action(action_id);
        }
        let entry = tx.append_history(record).await?;

        outbox.push(
            Notification::new(&item.content.submitter, EventKind::Aborted, item).with_detail(reason),
        );

        tracing::warn!(
            workflow_item_id = %item.id,
            admin = %admin,
            reason = %reason,
            "Workflow item aborted"
        );

        Ok(entry.seq)
    }

    /// Current record of an item.
    pub async fn get(&self, item_id: Uuid) -> AppResult<WorkflowItem> {
        self.store
            .get_item(item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Workflow item {} not found", item_id)))
    }

    /// Audit trail of an item, also after it was archived or returned.
    pub async fn history(&self, item_id: Uuid) -> AppResult<Vec<HistoryEntry>> {
        let entries = self.store.history(item_id).await?;
        if entries.is_empty() {
            return Err(AppError::NotFound(format!(
                "No history for workflow item {}",
                item_id
            )));
        }
        Ok(entries)
    }

    pub async fn list(&self, page: Page) -> AppResult<Vec<WorkflowItem>> {
        self.store.list_items(page).await
    }
}

#[async_trait]
impl Intake for WorkflowEngine {
    async fn submit(&self, content: ContentItem, container_id: &str) -> AppResult<Uuid> {
        Ok(self.start(content, container_id).await?.id)
    }
}
