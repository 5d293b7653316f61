//! Claim races on a multi-threaded runtime.

mod common;

use std::collections::BTreeSet;

use common::{harness_with, COMMITTEE};
use reviewflow_engine::{model::ContentItem, roles::StaticRoleSource, AppError};

fn crowd(size: usize) -> Vec<String> {
    (0..size).map(|i| format!("reviewer-{:02}", i)).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_slot_has_exactly_one_winner() {
    let reviewers = crowd(16);
    let workflow = r#"
apiVersion: reviewflow.io/v1
kind: Workflow
metadata:
  name: race
default: true
roles:
  crowd:
    kind: group
    group: crowd
steps:
  - id: review
    role: crowd
    actions:
      - id: approve
        kind: accept
"#;
    let roles = StaticRoleSource::default().with_group("crowd", reviewers.clone());
    let h = harness_with(&[workflow], roles);
    let item = h
        .engine
        .start(ContentItem::new("alice", None), "articles")
        .await
        .unwrap();

    let mut handles = Vec::new();
    for reviewer in reviewers {
        let engine = h.engine.clone();
        let item_id = item.id;
        handles.push(tokio::spawn(async move {
            engine.claim(item_id, "review", &reviewer).await
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(task) => winners.push(task.claimant),
            Err(AppError::AlreadyClaimed(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners.len(), 1);
    let claims = h.engine.claimed_tasks_for_item(item.id).await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].claimant, winners[0]);
    assert!(h.engine.pool_tasks_for_item(item.id).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_slot_has_exactly_required_winners() {
    let members = crowd(12);
    let roles = StaticRoleSource::default().with_group("committee", members.clone());
    let h = harness_with(&[COMMITTEE], roles);
    let item = h
        .engine
        .start(ContentItem::new("alice", None), "theses")
        .await
        .unwrap();

    let mut handles = Vec::new();
    for member in members {
        let engine = h.engine.clone();
        let item_id = item.id;
        handles.push(tokio::spawn(async move {
            engine.claim(item_id, "vote", &member).await
        }));
    }

    let mut winners = BTreeSet::new();
    let mut losers = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(task) => {
                winners.insert(task.claimant);
            }
            Err(AppError::AlreadyClaimed(_)) => losers += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners.len(), 3);
    assert_eq!(losers, 9);

    let claimants: BTreeSet<String> = h
        .engine
        .claimed_tasks_for_item(item.id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.claimant)
        .collect();
    assert_eq!(claimants, winners);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_unclaims_restore_one_slot() {
    let roles = StaticRoleSource::default().with_group("committee", crowd(5));
    let h = harness_with(&[COMMITTEE], roles);
    let item = h
        .engine
        .start(ContentItem::new("alice", None), "theses")
        .await
        .unwrap();
    h.engine.claim(item.id, "vote", "reviewer-00").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        let item_id = item.id;
        handles.push(tokio::spawn(async move {
            engine.unclaim(item_id, "vote", "reviewer-00").await
        }));
    }

    let mut released = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => released += 1,
            Err(AppError::NotOwner(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(released, 1);

    let pool = h.engine.pool_tasks_for_item(item.id).await.unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool[0].open_slots, 3);
    assert_eq!(pool[0].eligible.len(), 5);
}
