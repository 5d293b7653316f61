//! End-to-end workflow scenarios against the in-memory store.

mod common;

use common::{harness, harness_with, roles, TWO_STEP};
use reviewflow_engine::{
    engine::Transition,
    model::{ContentItem, HistoryOutcome, ItemState},
    notify::EventKind,
    roles::StaticRoleSource,
    AppError,
};
use serde_json::json;

fn paper() -> ContentItem {
    ContentItem::new("alice", Some("On Claims"))
}

#[tokio::test]
async fn test_approve_moves_item_to_next_step() {
    let h = harness();
    let item = h.engine.start(paper(), "articles").await.unwrap();
    assert_eq!(item.current_step.as_deref(), Some("step1"));
    assert_eq!(item.state, ItemState::Active);

    let pool = h.engine.pool_tasks_for_item(item.id).await.unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool[0].step_id, "step1");
    assert!(pool[0].is_eligible("p1") && pool[0].is_eligible("p2"));

    h.engine.claim(item.id, "step1", "p1").await.unwrap();
    let result = h
        .engine
        .execute(item.id, "step1", "p1", "approve", json!({}))
        .await
        .unwrap();
    assert_eq!(
        result.transition,
        Transition::Advanced {
            step: "step2".to_string()
        }
    );

    let item = h.engine.get(item.id).await.unwrap();
    assert_eq!(item.current_step.as_deref(), Some("step2"));
    assert!(item.approvals.is_empty());

    let pool = h.engine.pool_tasks_for_item(item.id).await.unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool[0].step_id, "step2");
    assert!(pool[0].is_eligible("e1"));
    assert!(h.engine.claimed_tasks_for_item(item.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_last_step_archives_item() {
    let h = harness();
    let item = h.engine.start(paper(), "articles").await.unwrap();

    h.engine.claim(item.id, "step1", "p1").await.unwrap();
    h.engine
        .execute(item.id, "step1", "p1", "approve", json!({}))
        .await
        .unwrap();
    h.engine.claim(item.id, "step2", "e1").await.unwrap();
    let result = h
        .engine
        .execute(item.id, "step2", "e1", "approve", json!({}))
        .await
        .unwrap();

    let Transition::Archived { archived_item_id } = result.transition else {
        panic!("expected archival, got {:?}", result.transition);
    };
    let installed = h.archive.installed();
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].0, archived_item_id);
    assert_eq!(installed[0].1.id, item.content.id);

    assert!(matches!(h.engine.get(item.id).await, Err(AppError::NotFound(_))));
    assert!(h.engine.pool_tasks_for_item(item.id).await.unwrap().is_empty());

    let history = h.engine.history(item.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.outcome, HistoryOutcome::Archived);
    assert_eq!(last.step_id.as_deref(), Some("step2"));
    assert_eq!(last.actor.as_deref(), Some("e1"));

    let archived = h.notifier.wait_for(4).await;
    assert!(archived
        .iter()
        .any(|n| n.event == EventKind::Archived && n.principal == "alice"));
}

#[tokio::test]
async fn test_reject_returns_item_to_submitter() {
    let h = harness();
    let item = h.engine.start(paper(), "articles").await.unwrap();

    h.engine.claim(item.id, "step1", "p1").await.unwrap();
    let result = h
        .engine
        .execute(
            item.id,
            "step1",
            "p1",
            "reject",
            json!({"reason": "incomplete metadata"}),
        )
        .await
        .unwrap();
    assert_eq!(
        result.transition,
        Transition::Returned {
            reason: "incomplete metadata".to_string()
        }
    );

    let returned = h.workspace.returned();
    assert_eq!(returned.len(), 1);
    assert_eq!(returned[0].reason, "incomplete metadata");
    assert_eq!(returned[0].actor, "p1");
    let provenance = returned[0].content.metadata["provenance"].as_array().unwrap();
    assert!(provenance[0]
        .as_str()
        .unwrap()
        .starts_with("Rejected by p1, reason: incomplete metadata on "));

    assert!(matches!(h.engine.get(item.id).await, Err(AppError::NotFound(_))));
    assert!(h.engine.claimed_tasks_for_item(item.id).await.unwrap().is_empty());

    let history = h.engine.history(item.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.outcome, HistoryOutcome::Rejected);
    assert_eq!(last.detail.as_deref(), Some("incomplete metadata"));
}

#[tokio::test]
async fn test_reject_without_reason_needs_more_input() {
    let h = harness();
    let item = h.engine.start(paper(), "articles").await.unwrap();
    h.engine.claim(item.id, "step1", "p1").await.unwrap();
    let before = h.engine.history(item.id).await.unwrap().len();

    let result = h
        .engine
        .execute(item.id, "step1", "p1", "reject", json!({"reason": "   "}))
        .await
        .unwrap();
    assert_eq!(result.transition, Transition::InputRequired);
    assert!(result.history_seq.is_none());

    assert_eq!(h.engine.history(item.id).await.unwrap().len(), before);
    let claims = h.engine.claimed_tasks_for_item(item.id).await.unwrap();
    assert_eq!(claims.len(), 1);
    assert!(h.workspace.returned().is_empty());
}

#[tokio::test]
async fn test_edit_keeps_claim_and_is_not_repeatable() {
    let h = harness();
    let item = h.engine.start(paper(), "articles").await.unwrap();
    h.engine.claim(item.id, "step1", "p1").await.unwrap();

    let result = h
        .engine
        .execute(
            item.id,
            "step1",
            "p1",
            "edit",
            json!({"metadata": {"language": "en"}}),
        )
        .await
        .unwrap();
    assert_eq!(result.transition, Transition::Continued);

    let current = h.engine.get(item.id).await.unwrap();
    assert_eq!(current.content.metadata["language"], "en");
    assert_eq!(current.current_step.as_deref(), Some("step1"));

    let again = h
        .engine
        .execute(
            item.id,
            "step1",
            "p1",
            "edit",
            json!({"metadata": {"language": "de"}}),
        )
        .await;
    assert!(matches!(again, Err(AppError::InvalidState(_))));
}

#[tokio::test]
async fn test_execute_requires_claim_and_known_action() {
    let h = harness();
    let item = h.engine.start(paper(), "articles").await.unwrap();

    let unclaimed = h
        .engine
        .execute(item.id, "step1", "p1", "approve", json!({}))
        .await;
    assert!(matches!(unclaimed, Err(AppError::NotOwner(_))));

    h.engine.claim(item.id, "step1", "p1").await.unwrap();
    let unknown = h
        .engine
        .execute(item.id, "step1", "p1", "publish", json!({}))
        .await;
    assert!(matches!(unknown, Err(AppError::Validation(_))));

    let wrong_step = h
        .engine
        .execute(item.id, "step2", "p1", "approve", json!({}))
        .await;
    assert!(matches!(wrong_step, Err(AppError::InvalidState(_))));
}

#[tokio::test]
async fn test_ineligible_principal_cannot_claim() {
    let h = harness();
    let item = h.engine.start(paper(), "articles").await.unwrap();

    let result = h.engine.claim(item.id, "step1", "e1").await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn test_unclaim_is_idempotent() {
    let h = harness();
    let item = h.engine.start(paper(), "articles").await.unwrap();

    h.engine.claim(item.id, "step1", "p1").await.unwrap();
    assert!(h
        .engine
        .list_pool_tasks_for("p2", Default::default())
        .await
        .unwrap()
        .is_empty());

    h.engine.unclaim(item.id, "step1", "p1").await.unwrap();
    let pool = h.engine.pool_tasks_for_item(item.id).await.unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool[0].open_slots, 1);
    assert!(pool[0].is_eligible("p1") && pool[0].is_eligible("p2"));

    let second = h.engine.unclaim(item.id, "step1", "p1").await;
    assert!(matches!(second, Err(AppError::NotOwner(_))));

    let pool = h.engine.pool_tasks_for_item(item.id).await.unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool[0].open_slots, 1);
    assert!(h.engine.claimed_tasks_for_item(item.id).await.unwrap().is_empty());

    // Someone else can claim again afterwards.
    h.engine.claim(item.id, "step1", "p2").await.unwrap();
}

#[tokio::test]
async fn test_approval_threshold_and_reject_short_circuit() {
    let h = harness();
    let item = h.engine.start(paper(), "theses").await.unwrap();
    assert_eq!(item.workflow_id, "committee");

    for member in ["c1", "c2", "c3"] {
        h.engine.claim(item.id, "vote", member).await.unwrap();
    }
    // All three slots taken.
    let late = h.engine.claim(item.id, "vote", "c4").await;
    assert!(matches!(late, Err(AppError::AlreadyClaimed(_))));

    let first = h
        .engine
        .execute(item.id, "vote", "c1", "review", json!({"decision": "approve"}))
        .await
        .unwrap();
    assert_eq!(first.transition, Transition::AwaitingApprovals { remaining: 2 });

    let second = h
        .engine
        .execute(item.id, "vote", "c2", "review", json!({"decision": "approve"}))
        .await
        .unwrap();
    assert_eq!(second.transition, Transition::AwaitingApprovals { remaining: 1 });
    assert_eq!(h.engine.get(item.id).await.unwrap().approvals.len(), 2);

    let rejected = h
        .engine
        .execute(
            item.id,
            "vote",
            "c3",
            "review",
            json!({"decision": "reject", "reason": "plagiarism"}),
        )
        .await
        .unwrap();
    assert!(matches!(rejected.transition, Transition::Returned { .. }));
    assert!(h.archive.installed().is_empty());
    assert_eq!(h.workspace.returned().len(), 1);
}

#[tokio::test]
async fn test_approval_threshold_reached_archives() {
    let h = harness();
    let item = h.engine.start(paper(), "theses").await.unwrap();

    for member in ["c1", "c2", "c3"] {
        h.engine.claim(item.id, "vote", member).await.unwrap();
    }
    h.engine.unclaim(item.id, "vote", "c3").await.unwrap();
    h.engine.claim(item.id, "vote", "c5").await.unwrap();

    let mut last = None;
    for member in ["c1", "c2", "c5"] {
        last = Some(
            h.engine
                .execute(item.id, "vote", member, "review", json!({"decision": "approve"}))
                .await
                .unwrap(),
        );
    }
    assert!(matches!(
        last.unwrap().transition,
        Transition::Archived { .. }
    ));
    assert_eq!(h.archive.installed().len(), 1);
}

#[tokio::test]
async fn test_approver_cannot_claim_same_step_again() {
    let h = harness();
    let item = h.engine.start(paper(), "theses").await.unwrap();

    h.engine.claim(item.id, "vote", "c1").await.unwrap();
    h.engine
        .execute(item.id, "vote", "c1", "review", json!({"decision": "approve"}))
        .await
        .unwrap();

    let again = h.engine.claim(item.id, "vote", "c1").await;
    assert!(matches!(again, Err(AppError::AlreadyClaimed(_))));
}

#[tokio::test]
async fn test_abort_is_admin_only() {
    let h = harness();
    let item = h.engine.start(paper(), "articles").await.unwrap();
    h.engine.claim(item.id, "step1", "p1").await.unwrap();

    let by_reviewer = h
        .engine
        .execute(item.id, "step1", "p1", "abort", json!({"reason": "spam"}))
        .await;
    assert!(matches!(by_reviewer, Err(AppError::Forbidden(_))));
    assert_eq!(
        h.engine.get(item.id).await.unwrap().state,
        ItemState::Active
    );

    let denied = h.engine.abort(item.id, "p1", "spam").await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));

    let aborted = h.engine.abort(item.id, "admin", "spam").await.unwrap();
    assert_eq!(aborted.state, ItemState::Aborted);
    assert!(h.engine.pool_tasks_for_item(item.id).await.unwrap().is_empty());
    assert!(h.engine.claimed_tasks_for_item(item.id).await.unwrap().is_empty());

    let twice = h.engine.abort(item.id, "admin", "spam").await;
    assert!(matches!(twice, Err(AppError::InvalidState(_))));

    let history = h.engine.history(item.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.outcome, HistoryOutcome::Aborted);
    assert_eq!(last.actor.as_deref(), Some("admin"));
}

#[tokio::test]
async fn test_history_has_one_entry_per_transition() {
    let h = harness();
    let item = h.engine.start(paper(), "articles").await.unwrap();
    h.engine.claim(item.id, "step1", "p1").await.unwrap();
    h.engine
        .execute(item.id, "step1", "p1", "approve", json!({}))
        .await
        .unwrap();

    let history = h.engine.history(item.id).await.unwrap();
    let outcomes: Vec<HistoryOutcome> = history.iter().map(|e| e.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            HistoryOutcome::Started,
            HistoryOutcome::Claimed,
            HistoryOutcome::Advanced
        ]
    );
    let seqs: Vec<i64> = history.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(history[0].next_step.as_deref(), Some("step1"));
    assert_eq!(history[2].next_step.as_deref(), Some("step2"));
}

#[tokio::test]
async fn test_start_without_notify_stays_quiet() {
    let h = harness();
    h.engine
        .start_without_notify(paper(), "articles")
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(h.notifier.seen().is_empty());

    h.engine.start(paper(), "articles").await.unwrap();
    let seen = h.notifier.wait_for(2).await;
    assert_eq!(
        seen.iter()
            .filter(|n| n.event == EventKind::TaskAvailable)
            .count(),
        2
    );
}

#[tokio::test]
async fn test_step_with_nobody_is_skipped() {
    let roles = StaticRoleSource::default()
        .with_group("administrators", ["admin"])
        .with_group("editors", ["e1"]);
    let h = harness_with(&[TWO_STEP], roles);

    let item = h.engine.start(paper(), "articles").await.unwrap();
    assert_eq!(item.current_step.as_deref(), Some("step2"));
}

#[tokio::test]
async fn test_guard_skips_step() {
    let workflow = r#"
apiVersion: reviewflow.io/v1
kind: Workflow
metadata:
  name: guarded
default: true
roles:
  r1:
    kind: group
    group: reviewers
  r2:
    kind: group
    group: editors
steps:
  - id: language
    role: r1
    when: "metadata.language == 'de'"
    actions:
      - id: approve
        kind: accept
  - id: final
    role: r2
    actions:
      - id: approve
        kind: accept
"#;
    let h = harness_with(&[workflow], roles());

    let item = h.engine.start(paper(), "articles").await.unwrap();
    assert_eq!(item.current_step.as_deref(), Some("final"));

    let mut german = paper();
    german.merge_metadata(&json!({"language": "de"}));
    let item = h.engine.start(german, "articles").await.unwrap();
    assert_eq!(item.current_step.as_deref(), Some("language"));
}

#[tokio::test]
async fn test_workflow_with_no_applicable_step_archives_on_start() {
    let workflow = r#"
apiVersion: reviewflow.io/v1
kind: Workflow
metadata:
  name: nobody
default: true
roles:
  ghosts:
    kind: group
    group: ghosts
steps:
  - id: only
    role: ghosts
    actions:
      - id: approve
        kind: accept
"#;
    let h = harness_with(&[workflow], roles());
    let item = h.engine.start(paper(), "articles").await.unwrap();
    assert_eq!(item.state, ItemState::Archived);
    assert_eq!(h.archive.installed().len(), 1);
}

#[tokio::test]
async fn test_unknown_container_without_default() {
    let h = harness_with(&[common::COMMITTEE], roles());
    let result = h.engine.start(paper(), "articles").await;
    assert!(matches!(result, Err(AppError::Configuration(_))));
}
