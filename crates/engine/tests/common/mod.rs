//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reviewflow_engine::{
    actions::ActionRegistry,
    collaborators::{ConfiguredCurator, CurationResult, RecordingArchive, RecordingWorkspace},
    definition::DefinitionRegistry,
    engine::WorkflowEngine,
    notify::{EventKind, Notification, Notifier},
    roles::{RoleResolver, RoleSource, StaticRoleSource},
    store::MemoryStore,
    AppResult,
};

/// Two single-approval steps; reviewers then editors.
pub const TWO_STEP: &str = r#"
apiVersion: reviewflow.io/v1
kind: Workflow
metadata:
  name: two-step
default: true
roles:
  r1:
    kind: group
    group: reviewers
  r2:
    kind: group
    group: editors
  admins:
    kind: group
    group: administrators
steps:
  - id: step1
    role: r1
    actions:
      - id: edit
        kind: edit_metadata
        optional: true
      - id: approve
        kind: accept
      - id: reject
        kind: reject
      - id: abort
        kind: abort
  - id: step2
    role: r2
    actions:
      - id: approve
        kind: accept
"#;

/// One step needing three approvals from a five-member committee.
pub const COMMITTEE: &str = r#"
apiVersion: reviewflow.io/v1
kind: Workflow
metadata:
  name: committee
containers:
  - theses
roles:
  committee:
    kind: group
    group: committee
steps:
  - id: vote
    role: committee
    required_approvals: 3
    actions:
      - id: review
        kind: review
"#;

/// Entry curation on the first step, completion curation on the second.
pub const CURATED: &str = r#"
apiVersion: reviewflow.io/v1
kind: Workflow
metadata:
  name: curated
containers:
  - datasets
roles:
  r1:
    kind: group
    group: reviewers
steps:
  - id: intake
    role: r1
    curation:
      on_entry: true
    actions:
      - id: approve
        kind: accept
  - id: publish
    role: r1
    curation:
      on_completion: true
    actions:
      - id: approve
        kind: accept
"#;

/// Notifier that keeps everything it is asked to send.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl CollectingNotifier {
    pub fn seen(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }

    /// Wait for background dispatch to deliver at least `count` messages.
    pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
        for _ in 0..100 {
            if self.seen.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.seen()
    }

    pub fn of_kind(&self, event: EventKind) -> Vec<Notification> {
        self.seen()
            .into_iter()
            .filter(|n| n.event == event)
            .collect()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        self.seen.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Engine plus handles on every reference collaborator.
pub struct Harness {
    pub engine: WorkflowEngine,
    pub store: Arc<MemoryStore>,
    pub archive: Arc<RecordingArchive>,
    pub workspace: Arc<RecordingWorkspace>,
    pub curator: Arc<ConfiguredCurator>,
    pub notifier: Arc<CollectingNotifier>,
}

pub fn roles() -> StaticRoleSource {
    StaticRoleSource::default()
        .with_group("administrators", ["admin"])
        .with_group("reviewers", ["p1", "p2"])
        .with_group("editors", ["e1"])
        .with_group("committee", ["c1", "c2", "c3", "c4", "c5"])
}

pub fn harness() -> Harness {
    harness_with(&[TWO_STEP, COMMITTEE, CURATED], roles())
}

pub fn harness_with(documents: &[&str], roles: StaticRoleSource) -> Harness {
    harness_with_source(documents, Arc::new(roles))
}

pub fn harness_with_source(documents: &[&str], roles: Arc<dyn RoleSource>) -> Harness {
    let actions = ActionRegistry::with_builtins();
    let registry = DefinitionRegistry::from_documents(documents, actions.kinds()).unwrap();

    let store = Arc::new(MemoryStore::new());
    let archive = Arc::new(RecordingArchive::new());
    let workspace = Arc::new(RecordingWorkspace::new());
    let curator = Arc::new(ConfiguredCurator::new(CurationResult::Completed));
    let notifier = Arc::new(CollectingNotifier::default());

    let engine = WorkflowEngine::builder(Arc::new(registry), store.clone())
        .roles(RoleResolver::new(roles, "administrators"))
        .actions(Arc::new(actions))
        .archive(archive.clone())
        .workspace(workspace.clone())
        .curator(curator.clone())
        .notifier(notifier.clone())
        .build();

    Harness {
        engine,
        store,
        archive,
        workspace,
        curator,
        notifier,
    }
}
