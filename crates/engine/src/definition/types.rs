//! Workflow definition types.
//!
//! A definition is a YAML document:
//!
//! ```yaml
//! apiVersion: reviewflow.io/v1
//! kind: Workflow
//! metadata:
//!   name: default
//! default: true
//! containers: ["123456789/4"]
//! roles:
//!   reviewer: { kind: container, role: reviewer }
//!   editor: { kind: group, group: editors }
//! steps:
//!   - id: reviewstep
//!     role: reviewer
//!     outcomes:
//!       revise: editstep
//!     actions:
//!       - { id: approve, kind: accept }
//!       - { id: reject, kind: reject }
//!       - { id: revise, kind: route, options: { outcome: revise } }
//! ```
//!
//! Actions are ordered. Exit actions (reject, abort, route) are available at
//! any time; every other action waits until the actions before it have run,
//! unless those are marked `optional`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Supported definition API version.
pub const API_VERSION: &str = "reviewflow.io/v1";

/// Supported definition kind.
pub const KIND: &str = "Workflow";

/// Definition metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Workflow identifier (required).
    pub name: String,

    /// Description.
    #[serde(default)]
    pub description: Option<String>,

    /// Labels for filtering.
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

/// Who may work on a step.
///
/// A closed set of variants; resolution is dispatched by the role resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Role {
    /// Members of a named principal group.
    Group { group: String },
    /// Members of a role scoped to the item's container (e.g. collection editors).
    Container { role: String },
    /// An explicit list of principals.
    Assignees { principals: Vec<String> },
    /// The submitter of the content item.
    Submitter,
}

impl Role {
    /// Stable key of the resolver kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Role::Group { .. } => "group",
            Role::Container { .. } => "container",
            Role::Assignees { .. } => "assignees",
            Role::Submitter => "submitter",
        }
    }
}

/// Reference to an action executor plus its options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Action identifier, unique within the step.
    pub id: String,

    /// Executor kind registered in the action registry.
    pub kind: String,

    /// Later actions may run without this one having run first.
    #[serde(default)]
    pub optional: bool,

    /// Executor-specific options.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl ActionConfig {
    /// The `outcome` option, for actions that route to a named outcome.
    pub fn outcome(&self) -> Option<&str> {
        self.options.get("outcome").and_then(|o| o.as_str())
    }
}

/// Where automated curation runs for a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationConfig {
    #[serde(default)]
    pub on_entry: bool,

    #[serde(default)]
    pub on_completion: bool,

    /// Curation task names passed through to the curator.
    #[serde(default)]
    pub tasks: Vec<String>,
}

impl CurationConfig {
    pub fn is_enabled(&self) -> bool {
        self.on_entry || self.on_completion
    }
}

/// One stage of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step identifier (unique within the definition).
    pub id: String,

    /// Role id from the definition's role table.
    pub role: String,

    /// Actions offered to the claimant, in the order they apply.
    pub actions: Vec<ActionConfig>,

    /// Named outcomes and the step each one leads to.
    #[serde(default)]
    pub outcomes: BTreeMap<String, String>,

    /// Approvals needed before the step completes.
    #[serde(default = "default_required_approvals")]
    pub required_approvals: u32,

    /// Whether an action may run more than once under the same claim.
    #[serde(default)]
    pub repeatable: bool,

    /// Guard expression; the step is skipped when it evaluates false.
    #[serde(default)]
    pub when: Option<String>,

    /// Skip the step when its role resolves to nobody.
    #[serde(default = "default_true")]
    pub skip_if_no_reviewers: bool,

    #[serde(default)]
    pub curation: CurationConfig,
}

fn default_required_approvals() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Step {
    /// Look up an action by id.
    pub fn action(&self, action_id: &str) -> Option<&ActionConfig> {
        self.actions.iter().find(|a| a.id == action_id)
    }

    pub fn action_ids(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.id.as_str()).collect()
    }
}

/// Complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// API version (reviewflow.io/v1).
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (Workflow).
    pub kind: String,

    pub metadata: Metadata,

    /// Use this workflow for containers without an explicit mapping.
    #[serde(default)]
    pub default: bool,

    /// Containers explicitly mapped to this workflow.
    #[serde(default)]
    pub containers: Vec<String>,

    /// Role table referenced by steps.
    #[serde(default)]
    pub roles: BTreeMap<String, Role>,

    /// Ordered steps.
    pub steps: Vec<Step>,
}

impl WorkflowDefinition {
    /// Workflow identifier.
    pub fn id(&self) -> &str {
        &self.metadata.name
    }

    /// Get a step by id.
    pub fn get_step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Position of a step in the ordered list.
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    pub fn first_step(&self) -> Option<&Step> {
        self.steps.first()
    }

    /// The given step and every step after it.
    pub fn steps_from(&self, step_id: &str) -> &[Step] {
        match self.step_index(step_id) {
            Some(idx) => &self.steps[idx..],
            None => &[],
        }
    }

    /// Steps after the given one, in order.
    pub fn steps_after(&self, step_id: &str) -> &[Step] {
        match self.step_index(step_id) {
            Some(idx) => &self.steps[idx + 1..],
            None => &[],
        }
    }

    /// Role declared for a step.
    pub fn role_for(&self, step: &Step) -> Option<&Role> {
        self.roles.get(&step.role)
    }
}
