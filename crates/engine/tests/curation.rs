//! Curation deferral and resumption.

mod common;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{harness, harness_with_source};
use reviewflow_engine::{
    collaborators::{CurationResult, Curator},
    definition::Step,
    engine::{Transition, WorkflowEngine},
    model::{ContentItem, CurationPoint, HistoryOutcome, ItemState, WorkflowItem},
    roles::{RoleResolver, RoleSource},
    AppError, AppResult,
};
use serde_json::json;

fn dataset() -> ContentItem {
    ContentItem::new("alice", Some("Survey data"))
}

#[tokio::test]
async fn test_queued_entry_curation_parks_item_without_tasks() {
    let h = harness();
    h.curator.set_result(CurationResult::Queued);

    let item = h.engine.start(dataset(), "datasets").await.unwrap();
    assert_eq!(item.state, ItemState::Active);
    assert_eq!(item.current_step.as_deref(), Some("intake"));
    assert_eq!(item.pending_curation, Some(CurationPoint::Entry));
    assert!(h.engine.pool_tasks_for_item(item.id).await.unwrap().is_empty());
    assert!(h.engine.claimed_tasks_for_item(item.id).await.unwrap().is_empty());

    let blocked = h.engine.claim(item.id, "intake", "p1").await;
    assert!(matches!(blocked, Err(AppError::InvalidState(_))));

    let result = h
        .engine
        .resume_curation(item.id, CurationResult::Completed)
        .await
        .unwrap();
    assert_eq!(
        result.transition,
        Transition::Advanced {
            step: "intake".to_string()
        }
    );

    let item = h.engine.get(item.id).await.unwrap();
    assert!(item.pending_curation.is_none());
    let pool = h.engine.pool_tasks_for_item(item.id).await.unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool[0].step_id, "intake");

    let history = h.engine.history(item.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.outcome, HistoryOutcome::CurationResumed);
    assert_eq!(last.actor.as_deref(), Some("curation"));
}

#[tokio::test]
async fn test_queued_completion_curation_then_archive() {
    let h = harness();
    let item = h.engine.start(dataset(), "datasets").await.unwrap();

    h.engine.claim(item.id, "intake", "p1").await.unwrap();
    h.engine
        .execute(item.id, "intake", "p1", "approve", json!({}))
        .await
        .unwrap();

    h.curator.set_result(CurationResult::Queued);
    h.engine.claim(item.id, "publish", "p2").await.unwrap();
    let result = h
        .engine
        .execute(item.id, "publish", "p2", "approve", json!({}))
        .await
        .unwrap();
    assert_eq!(
        result.transition,
        Transition::CurationQueued {
            step: "publish".to_string(),
            point: CurationPoint::Completion
        }
    );
    assert!(h.archive.installed().is_empty());
    assert!(h.engine.pool_tasks_for_item(item.id).await.unwrap().is_empty());

    let result = h
        .engine
        .resume_curation(item.id, CurationResult::Completed)
        .await
        .unwrap();
    assert!(matches!(result.transition, Transition::Archived { .. }));
    assert_eq!(h.archive.installed().len(), 1);
}

#[tokio::test]
async fn test_rejected_curation_returns_item() {
    let h = harness();
    h.curator.set_result(CurationResult::Queued);
    let item = h.engine.start(dataset(), "datasets").await.unwrap();

    let result = h
        .engine
        .resume_curation(
            item.id,
            CurationResult::Rejected("checksum mismatch".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(
        result.transition,
        Transition::Returned {
            reason: "checksum mismatch".to_string()
        }
    );

    let returned = h.workspace.returned();
    assert_eq!(returned.len(), 1);
    assert_eq!(returned[0].actor, "curation");
    assert!(matches!(h.engine.get(item.id).await, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_immediate_rejection_at_entry() {
    let h = harness();
    h.curator
        .set_result(CurationResult::Rejected("virus found".to_string()));

    let item = h.engine.start(dataset(), "datasets").await.unwrap();
    assert_eq!(item.state, ItemState::Returned);
    assert_eq!(h.workspace.returned().len(), 1);
    assert!(h.archive.installed().is_empty());
}

#[tokio::test]
async fn test_resume_without_pending_curation() {
    let h = harness();
    let item = h.engine.start(dataset(), "datasets").await.unwrap();

    let result = h
        .engine
        .resume_curation(item.id, CurationResult::Completed)
        .await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));
}

#[tokio::test]
async fn test_resume_with_queued_is_invalid() {
    let h = harness();
    h.curator.set_result(CurationResult::Queued);
    let item = h.engine.start(dataset(), "datasets").await.unwrap();

    let result = h
        .engine
        .resume_curation(item.id, CurationResult::Queued)
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let item = h.engine.get(item.id).await.unwrap();
    assert_eq!(item.pending_curation, Some(CurationPoint::Entry));
}

/// Group directory whose membership can change between calls.
#[derive(Default)]
struct ChangingGroups {
    groups: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl ChangingGroups {
    fn set(&self, group: &str, members: &[&str]) {
        self.groups.lock().unwrap().insert(
            group.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
    }
}

#[async_trait]
impl RoleSource for ChangingGroups {
    async fn group_members(&self, group: &str) -> AppResult<BTreeSet<String>> {
        Ok(self
            .groups
            .lock()
            .unwrap()
            .get(group)
            .cloned()
            .unwrap_or_default())
    }

    async fn container_role_members(
        &self,
        _container_id: &str,
        _role: &str,
        _content: &ContentItem,
    ) -> AppResult<BTreeSet<String>> {
        Ok(BTreeSet::new())
    }
}

#[tokio::test]
async fn test_resume_skips_step_whose_role_emptied() {
    let groups = Arc::new(ChangingGroups::default());
    groups.set("reviewers", &["p1", "p2"]);
    let h = harness_with_source(&[common::CURATED], groups.clone());
    h.curator.set_result(CurationResult::Queued);

    let item = h.engine.start(dataset(), "datasets").await.unwrap();
    assert_eq!(item.pending_curation, Some(CurationPoint::Entry));

    groups.set("reviewers", &[]);
    h.curator.set_result(CurationResult::Completed);
    let result = h
        .engine
        .resume_curation(item.id, CurationResult::Completed)
        .await
        .unwrap();

    // Both steps resolve to nobody now, so the item runs off the end.
    assert!(matches!(result.transition, Transition::Archived { .. }));
    assert_eq!(h.archive.installed().len(), 1);
    assert!(matches!(h.engine.get(item.id).await, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_resume_returns_item_when_step_is_understaffed() {
    let workflow = r#"
apiVersion: reviewflow.io/v1
kind: Workflow
metadata:
  name: panel
containers:
  - datasets
roles:
  panel:
    kind: group
    group: panel
steps:
  - id: screening
    role: panel
    required_approvals: 2
    skip_if_no_reviewers: false
    curation:
      on_entry: true
    actions:
      - id: approve
        kind: accept
"#;
    let groups = Arc::new(ChangingGroups::default());
    groups.set("panel", &["p1", "p2", "p3"]);
    let h = harness_with_source(&[workflow], groups.clone());
    h.curator.set_result(CurationResult::Queued);

    let item = h.engine.start(dataset(), "datasets").await.unwrap();
    groups.set("panel", &["p1"]);

    let result = h
        .engine
        .resume_curation(item.id, CurationResult::Completed)
        .await
        .unwrap();
    let Transition::Returned { reason } = result.transition else {
        panic!("expected the item to be returned, got {:?}", result.transition);
    };
    assert!(reason.contains("screening"));

    let returned = h.workspace.returned();
    assert_eq!(returned.len(), 1);
    assert_eq!(returned[0].actor, "curation");

    // Nothing is left to resume.
    let again = h
        .engine
        .resume_curation(item.id, CurationResult::Completed)
        .await;
    assert!(matches!(again, Err(AppError::NotFound(_))));
}

/// Curator that signals rejection through its error type.
struct FailingCurator;

#[async_trait]
impl Curator for FailingCurator {
    fn should_curate(&self, _item: &WorkflowItem, step: &Step, _point: CurationPoint) -> bool {
        step.curation.on_entry
    }

    async fn run_curation(
        &self,
        _item: &WorkflowItem,
        _step: &Step,
        _point: CurationPoint,
    ) -> AppResult<CurationResult> {
        Err(AppError::CurationRejected("embargoed file".to_string()))
    }
}

#[tokio::test]
async fn test_curation_rejected_error_is_a_rejection() {
    let h = harness();
    let engine = WorkflowEngine::builder(h.engine.registry().clone(), h.store.clone())
        .roles(RoleResolver::new(
            Arc::new(common::roles()),
            "administrators",
        ))
        .workspace(h.workspace.clone())
        .curator(Arc::new(FailingCurator))
        .build();

    let item = engine.start(dataset(), "datasets").await.unwrap();
    assert_eq!(item.state, ItemState::Returned);

    let returned = h.workspace.returned();
    assert_eq!(returned.len(), 1);
    assert_eq!(returned[0].reason, "embargoed file");
}
