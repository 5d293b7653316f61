//! Workflow definition registry.
//!
//! Holds an immutable snapshot of validated definitions and the
//! container-to-workflow mapping. Reloads build a full new snapshot and swap
//! it in; readers holding the old `Arc` keep a consistent view.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::definition::parser::parse_definition;
use crate::definition::types::WorkflowDefinition;
use crate::error::{AppError, AppResult};

/// One validated set of definitions.
#[derive(Debug, Default)]
struct Snapshot {
    definitions: BTreeMap<String, Arc<WorkflowDefinition>>,
    by_container: HashMap<String, String>,
    default_id: Option<String>,
}

impl Snapshot {
    fn build(definitions: Vec<WorkflowDefinition>) -> AppResult<Self> {
        let mut snapshot = Snapshot::default();

        for definition in definitions {
            let id = definition.id().to_string();

            if snapshot.definitions.contains_key(&id) {
                return Err(AppError::Configuration(format!(
                    "Workflow '{}' is defined more than once",
                    id
                )));
            }

            if definition.default {
                if let Some(ref existing) = snapshot.default_id {
                    return Err(AppError::Configuration(format!(
                        "Workflows '{}' and '{}' are both marked default",
                        existing, id
                    )));
                }
                snapshot.default_id = Some(id.clone());
            }

            for container in &definition.containers {
                if let Some(existing) = snapshot.by_container.insert(container.clone(), id.clone())
                {
                    return Err(AppError::Configuration(format!(
                        "Container '{}' is mapped to both '{}' and '{}'",
                        container, existing, id
                    )));
                }
            }

            snapshot.definitions.insert(id, Arc::new(definition));
        }

        Ok(snapshot)
    }
}

/// Registry of workflow definitions keyed by container.
#[derive(Debug)]
pub struct DefinitionRegistry {
    action_kinds: BTreeSet<String>,
    source_dir: Option<PathBuf>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl DefinitionRegistry {
    /// Build a registry from YAML documents.
    pub fn from_documents<S: AsRef<str>>(
        documents: &[S],
        action_kinds: BTreeSet<String>,
    ) -> AppResult<Self> {
        let snapshot = parse_snapshot(documents, &action_kinds)?;
        Ok(Self {
            action_kinds,
            source_dir: None,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Load every `*.yaml`/`*.yml` file of a directory.
    pub fn load_dir(path: impl AsRef<Path>, action_kinds: BTreeSet<String>) -> AppResult<Self> {
        let path = path.as_ref();
        let documents = read_dir_documents(path)?;
        let snapshot = parse_snapshot(&documents, &action_kinds)?;

        tracing::info!(
            dir = %path.display(),
            workflows = snapshot.definitions.len(),
            "Loaded workflow definitions"
        );

        Ok(Self {
            action_kinds,
            source_dir: Some(path.to_path_buf()),
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Replace the snapshot with a new set of documents.
    ///
    /// The new set is validated in full before the swap; on error the
    /// current definitions stay in place.
    pub fn reload<S: AsRef<str>>(&self, documents: &[S]) -> AppResult<usize> {
        let snapshot = parse_snapshot(documents, &self.action_kinds)?;
        let count = snapshot.definitions.len();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
        tracing::info!(workflows = count, "Workflow definitions reloaded");
        Ok(count)
    }

    /// Re-read the directory the registry was loaded from.
    pub fn reload_from_source(&self) -> AppResult<usize> {
        let dir = self.source_dir.as_ref().ok_or_else(|| {
            AppError::Validation("registry was not loaded from a directory".to_string())
        })?;
        let documents = read_dir_documents(dir)?;
        self.reload(&documents)
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Definition governing a container: explicit mapping first, then the default.
    pub fn get_definition(&self, container_id: &str) -> AppResult<Arc<WorkflowDefinition>> {
        let snapshot = self.current();
        let id = snapshot
            .by_container
            .get(container_id)
            .or(snapshot.default_id.as_ref())
            .ok_or_else(|| {
                AppError::Configuration(format!(
                    "No workflow mapped to container '{}' and no default workflow",
                    container_id
                ))
            })?;

        snapshot
            .definitions
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::Configuration(format!("Workflow '{}' missing", id)))
    }

    /// Definition by workflow id.
    pub fn get_by_id(&self, workflow_id: &str) -> AppResult<Arc<WorkflowDefinition>> {
        self.current()
            .definitions
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| {
                AppError::Configuration(format!("Workflow '{}' is not loaded", workflow_id))
            })
    }

    /// All loaded definitions, ordered by id.
    pub fn definitions(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.current().definitions.values().cloned().collect()
    }

    pub fn default_workflow(&self) -> Option<String> {
        self.current().default_id.clone()
    }
}

fn parse_snapshot<S: AsRef<str>>(
    documents: &[S],
    action_kinds: &BTreeSet<String>,
) -> AppResult<Snapshot> {
    let definitions = documents
        .iter()
        .map(|doc| parse_definition(doc.as_ref(), action_kinds))
        .collect::<AppResult<Vec<_>>>()?;
    Snapshot::build(definitions)
}

fn read_dir_documents(dir: &Path) -> AppResult<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        AppError::Configuration(format!("cannot read definitions dir {}: {}", dir.display(), e))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|ext| ext.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|p| {
            std::fs::read_to_string(p).map_err(|e| {
                AppError::Configuration(format!("cannot read {}: {}", p.display(), e))
            })
        })
        .collect()
}
