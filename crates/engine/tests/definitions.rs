//! Loading and reloading the shipped configuration files.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use reviewflow_engine::{
    actions::ActionRegistry,
    definition::DefinitionRegistry,
    engine::WorkflowEngine,
    model::ContentItem,
    roles::{RoleResolver, StaticRoleSource},
    store::MemoryStore,
    AppError,
};
use tokio_test::assert_ok;

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

#[test]
fn test_shipped_workflows_load() {
    let actions = ActionRegistry::with_builtins();
    let registry =
        DefinitionRegistry::load_dir(config_dir().join("workflows"), actions.kinds()).unwrap();

    let ids: Vec<String> = registry
        .definitions()
        .iter()
        .map(|d| d.id().to_string())
        .collect();
    assert_eq!(ids, vec!["default", "theses"]);
    assert_eq!(registry.default_workflow().as_deref(), Some("default"));
    assert_eq!(registry.get_definition("theses").unwrap().id(), "theses");
    assert_eq!(registry.get_definition("articles").unwrap().id(), "default");
}

#[test]
fn test_shipped_workflows_need_builtin_actions() {
    let kinds: BTreeSet<String> = ["accept".to_string()].into_iter().collect();
    let result = DefinitionRegistry::load_dir(config_dir().join("workflows"), kinds);
    assert!(matches!(result, Err(AppError::Configuration(_))));
}

#[tokio::test]
async fn test_shipped_roles_drive_default_workflow() {
    let actions = ActionRegistry::with_builtins();
    let registry =
        DefinitionRegistry::load_dir(config_dir().join("workflows"), actions.kinds()).unwrap();
    let roles = StaticRoleSource::from_file(config_dir().join("roles.yaml")).unwrap();
    let engine = WorkflowEngine::builder(Arc::new(registry), Arc::new(MemoryStore::new()))
        .roles(RoleResolver::new(Arc::new(roles), "administrators"))
        .actions(Arc::new(actions))
        .build();

    let item = engine
        .start(ContentItem::new("alice", Some("Paper")), "articles")
        .await
        .unwrap();
    assert_eq!(item.current_step.as_deref(), Some("reviewstep"));

    assert_ok!(engine.claim(item.id, "reviewstep", "bob").await);
    assert!(engine.roles().is_admin("admin").await.unwrap());
}

#[test]
fn test_reload_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    let first = r#"
apiVersion: reviewflow.io/v1
kind: Workflow
metadata:
  name: first
default: true
roles:
  me: { kind: submitter }
steps:
  - id: check
    role: me
    actions:
      - { id: approve, kind: accept }
"#;
    std::fs::write(dir.path().join("first.yaml"), first).unwrap();

    let actions = ActionRegistry::with_builtins();
    let registry = DefinitionRegistry::load_dir(dir.path(), actions.kinds()).unwrap();
    assert_eq!(registry.definitions().len(), 1);

    std::fs::write(
        dir.path().join("second.yml"),
        first.replace("name: first", "name: second").replace("default: true", "containers: [c2]"),
    )
    .unwrap();
    assert_eq!(registry.reload_from_source().unwrap(), 2);
    assert_eq!(registry.get_definition("c2").unwrap().id(), "second");

    std::fs::write(dir.path().join("broken.yaml"), "apiVersion: [").unwrap();
    assert!(registry.reload_from_source().is_err());
    assert_eq!(registry.definitions().len(), 2);
}
