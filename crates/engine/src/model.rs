//! Core domain records shared by the engine, the stores and the API.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Identifier of a principal (a person or service account).
pub type PrincipalId = String;

/// Identifier of a step within a workflow definition.
pub type StepId = String;

/// Content item handed over by the intake collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub submitter: PrincipalId,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

fn empty_metadata() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ContentItem {
    /// Create a content item with empty metadata.
    pub fn new(submitter: &str, title: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.map(str::to_string),
            submitter: submitter.to_string(),
            metadata: empty_metadata(),
        }
    }

    /// Shallow-merge a JSON object into the metadata map.
    pub fn merge_metadata(&mut self, patch: &serde_json::Value) {
        let serde_json::Value::Object(patch) = patch else {
            return;
        };
        if !self.metadata.is_object() {
            self.metadata = empty_metadata();
        }
        if let serde_json::Value::Object(current) = &mut self.metadata {
            for (k, v) in patch {
                current.insert(k.clone(), v.clone());
            }
        }
    }
}

/// Lifecycle state of a workflow item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Active,
    Archived,
    Returned,
    Aborted,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Returned => "returned",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            "returned" => Ok(Self::Returned),
            "aborted" => Ok(Self::Aborted),
            other => Err(AppError::Persistence(format!(
                "unknown workflow item state '{}'",
                other
            ))),
        }
    }
}

/// Point in a step at which curation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurationPoint {
    Entry,
    Completion,
}

impl CurationPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Completion => "completion",
        }
    }
}

impl fmt::Display for CurationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurationPoint {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(Self::Entry),
            "completion" => Ok(Self::Completion),
            other => Err(AppError::Persistence(format!(
                "unknown curation point '{}'",
                other
            ))),
        }
    }
}

/// In-flight wrapper around a submitted content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowItem {
    pub id: Uuid,
    pub workflow_id: String,
    pub container_id: String,
    pub content: ContentItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepId>,
    pub state: ItemState,
    /// Principals whose approval has been recorded for the current step.
    #[serde(default)]
    pub approvals: BTreeSet<PrincipalId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_curation: Option<CurationPoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowItem {
    pub fn new(workflow_id: &str, container_id: &str, content: ContentItem) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.to_string(),
            container_id: container_id.to_string(),
            content,
            current_step: None,
            state: ItemState::Active,
            approvals: BTreeSet::new(),
            pending_curation: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new step, clearing per-step progress.
    pub fn move_to(&mut self, step: Option<&str>) {
        self.current_step = step.map(str::to_string);
        self.approvals.clear();
        self.pending_curation = None;
        self.updated_at = Utc::now();
    }

    pub fn is_at(&self, step_id: &str) -> bool {
        self.current_step.as_deref() == Some(step_id)
    }
}

/// Unclaimed work available to any eligible principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolTask {
    pub workflow_item_id: Uuid,
    pub step_id: StepId,
    pub eligible: BTreeSet<PrincipalId>,
    /// Claims still available before the pool entry disappears.
    pub open_slots: u32,
    pub created_at: DateTime<Utc>,
}

impl PoolTask {
    pub fn new(
        workflow_item_id: Uuid,
        step_id: &str,
        eligible: BTreeSet<PrincipalId>,
        slots: u32,
    ) -> Self {
        Self {
            workflow_item_id,
            step_id: step_id.to_string(),
            eligible,
            open_slots: slots,
            created_at: Utc::now(),
        }
    }

    pub fn is_eligible(&self, principal: &str) -> bool {
        self.eligible.contains(principal)
    }
}

/// Work locked to a single principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimedTask {
    pub workflow_item_id: Uuid,
    pub step_id: StepId,
    pub claimant: PrincipalId,
    /// Eligible set of the pool the claim came from; restored on unclaim.
    pub eligible: BTreeSet<PrincipalId>,
    /// Actions already run under this claim.
    #[serde(default)]
    pub performed_actions: Vec<String>,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimedTask {
    pub fn from_pool(pool: &PoolTask, claimant: &str) -> Self {
        Self {
            workflow_item_id: pool.workflow_item_id,
            step_id: pool.step_id.clone(),
            claimant: claimant.to_string(),
            eligible: pool.eligible.clone(),
            performed_actions: Vec::new(),
            claimed_at: Utc::now(),
        }
    }
}

/// What a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    Started,
    Claimed,
    Unclaimed,
    Continued,
    Approved,
    Advanced,
    Routed,
    Archived,
    Rejected,
    Aborted,
    CurationQueued,
    CurationResumed,
}

impl HistoryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Claimed => "claimed",
            Self::Unclaimed => "unclaimed",
            Self::Continued => "continued",
            Self::Approved => "approved",
            Self::Advanced => "advanced",
            Self::Routed => "routed",
            Self::Archived => "archived",
            Self::Rejected => "rejected",
            Self::Aborted => "aborted",
            Self::CurationQueued => "curation_queued",
            Self::CurationResumed => "curation_resumed",
        }
    }
}

impl fmt::Display for HistoryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryOutcome {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let outcome = match s {
            "started" => Self::Started,
            "claimed" => Self::Claimed,
            "unclaimed" => Self::Unclaimed,
            "continued" => Self::Continued,
            "approved" => Self::Approved,
            "advanced" => Self::Advanced,
            "routed" => Self::Routed,
            "archived" => Self::Archived,
            "rejected" => Self::Rejected,
            "aborted" => Self::Aborted,
            "curation_queued" => Self::CurationQueued,
            "curation_resumed" => Self::CurationResumed,
            other => {
                return Err(AppError::Persistence(format!(
                    "unknown history outcome '{}'",
                    other
                )))
            }
        };
        Ok(outcome)
    }
}

/// A history entry before the store assigns its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub workflow_item_id: Uuid,
    pub outcome: HistoryOutcome,
    pub step_id: Option<StepId>,
    pub action_id: Option<String>,
    pub actor: Option<PrincipalId>,
    pub next_step: Option<StepId>,
    pub detail: Option<String>,
}

impl HistoryRecord {
    pub fn new(workflow_item_id: Uuid, outcome: HistoryOutcome) -> Self {
        Self {
            workflow_item_id,
            outcome,
            step_id: None,
            action_id: None,
            actor: None,
            next_step: None,
            detail: None,
        }
    }

    pub fn step(mut self, step: Option<&str>) -> Self {
        self.step_id = step.map(str::to_string);
        self
    }

    pub fn action(mut self, action: &str) -> Self {
        self.action_id = Some(action.to_string());
        self
    }

    pub fn actor(mut self, actor: Option<&str>) -> Self {
        self.actor = actor.map(str::to_string);
        self
    }

    pub fn next_step(mut self, step: Option<&str>) -> Self {
        self.next_step = step.map(str::to_string);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Stamp the record with its sequence number.
    pub fn into_entry(self, seq: i64) -> HistoryEntry {
        HistoryEntry {
            workflow_item_id: self.workflow_item_id,
            seq,
            step_id: self.step_id,
            action_id: self.action_id,
            actor: self.actor,
            outcome: self.outcome,
            next_step: self.next_step,
            detail: self.detail,
            recorded_at: Utc::now(),
        }
    }
}

/// Immutable audit record of one transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub workflow_item_id: Uuid,
    pub seq: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<PrincipalId>,
    pub outcome: HistoryOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<StepId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Offset pagination for task listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Page {
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(offset: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            offset: offset.unwrap_or(0),
            limit: limit.unwrap_or(50).clamp(1, Self::MAX_LIMIT),
        }
    }

    /// Apply the page to an already ordered list.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_state_round_trip_strings() {
        assert_eq!(ItemState::Returned.to_string(), "returned");
        assert_eq!("ARCHIVED".parse::<ItemState>().unwrap(), ItemState::Archived);
        assert!("pending".parse::<ItemState>().is_err());
        assert!(ItemState::Aborted.is_terminal());
        assert!(!ItemState::Active.is_terminal());
    }

    #[test]
    fn test_move_to_clears_step_progress() {
        let mut item = WorkflowItem::new("default", "c1", ContentItem::new("alice", None));
        item.current_step = Some("review".to_string());
        item.approvals.insert("bob".to_string());
        item.pending_curation = Some(CurationPoint::Entry);

        item.move_to(Some("edit"));
        assert!(item.is_at("edit"));
        assert!(item.approvals.is_empty());
        assert!(item.pending_curation.is_none());
    }

    #[test]
    fn test_merge_metadata() {
        let mut content = ContentItem::new("alice", Some("Thesis"));
        content.merge_metadata(&serde_json::json!({"dc.title": "Thesis", "dc.type": "text"}));
        content.merge_metadata(&serde_json::json!({"dc.type": "dataset"}));
        assert_eq!(content.metadata["dc.title"], "Thesis");
        assert_eq!(content.metadata["dc.type"], "dataset");

        // Non-object patches are ignored
        content.merge_metadata(&serde_json::json!("oops"));
        assert_eq!(content.metadata["dc.type"], "dataset");
    }

    #[test]
    fn test_page_clamps_limit() {
        assert_eq!(Page::new(None, Some(500)).limit, Page::MAX_LIMIT);
        assert_eq!(Page::new(None, Some(0)).limit, 1);
        let page = Page::new(Some(1), Some(2));
        assert_eq!(page.slice(vec![1, 2, 3, 4]), vec![2, 3]);
    }

    #[test]
    fn test_history_record_builder() {
        let id = Uuid::new_v4();
        let entry = HistoryRecord::new(id, HistoryOutcome::Claimed)
            .step(Some("review"))
            .actor(Some("bob"))
            .into_entry(3);
        assert_eq!(entry.seq, 3);
        assert_eq!(entry.step_id.as_deref(), Some("review"));
        assert_eq!(entry.actor.as_deref(), Some("bob"));
        assert!(entry.action_id.is_none());
    }
}
