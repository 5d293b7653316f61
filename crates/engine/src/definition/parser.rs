//! Workflow definition YAML parser and validator.

use std::collections::{BTreeSet, HashSet};

use crate::definition::types::{WorkflowDefinition, API_VERSION, KIND};
use crate::engine::guard::GuardEvaluator;
use crate::error::{AppError, AppResult};

/// Parse a YAML string into a validated workflow definition.
///
/// `action_kinds` is the set of executor kinds registered in the action registry.
pub fn parse_definition(
    yaml_content: &str,
    action_kinds: &BTreeSet<String>,
) -> AppResult<WorkflowDefinition> {
    let definition: WorkflowDefinition = serde_yaml::from_str(yaml_content)
        .map_err(|e| AppError::Configuration(format!("invalid workflow document: {}", e)))?;

    validate_definition(&definition, action_kinds)?;

    Ok(definition)
}

/// Validate a parsed definition.
pub fn validate_definition(
    definition: &WorkflowDefinition,
    action_kinds: &BTreeSet<String>,
) -> AppResult<()> {
    let name = definition.id();

    if definition.api_version != API_VERSION {
        return Err(AppError::Configuration(format!(
            "Workflow '{}': unsupported API version {}. Expected {}",
            name, definition.api_version, API_VERSION
        )));
    }

    if definition.kind != KIND {
        return Err(AppError::Configuration(format!(
            "Workflow '{}': invalid kind {}. Expected {}",
            name, definition.kind, KIND
        )));
    }

    if name.trim().is_empty() {
        return Err(AppError::Configuration(
            "Workflow metadata.name must not be empty".to_string(),
        ));
    }

    if definition.steps.is_empty() {
        return Err(AppError::Configuration(format!(
            "Workflow '{}' must have at least one step",
            name
        )));
    }

    let guards = GuardEvaluator::new();
    let mut seen_steps = HashSet::new();
    for step in &definition.steps {
        if !seen_steps.insert(step.id.as_str()) {
            return Err(AppError::Configuration(format!(
                "Workflow '{}': duplicate step id '{}'",
                name, step.id
            )));
        }

        if step.actions.is_empty() {
            return Err(AppError::Configuration(format!(
                "Workflow '{}': step '{}' has no actions",
                name, step.id
            )));
        }

        if step.required_approvals < 1 {
            return Err(AppError::Configuration(format!(
                "Workflow '{}': step '{}' requires at least one approval",
                name, step.id
            )));
        }

        if definition.role_for(step).is_none() {
            return Err(AppError::Configuration(format!(
                "Workflow '{}': step '{}' references undeclared role '{}'",
                name, step.id, step.role
            )));
        }

        for (outcome, target) in &step.outcomes {
            if target == &step.id {
                return Err(AppError::Configuration(format!(
                    "Workflow '{}': step '{}' outcome '{}' leads back to the same step",
                    name, step.id, outcome
                )));
            }
            if definition.get_step(target).is_none() {
                return Err(AppError::Configuration(format!(
                    "Workflow '{}': step '{}' outcome '{}' leads to unknown step '{}'",
                    name, step.id, outcome, target
                )));
            }
        }

        let mut seen_actions = HashSet::new();
        for action in &step.actions {
            if !seen_actions.insert(action.id.as_str()) {
                return Err(AppError::Configuration(format!(
                    "Workflow '{}': step '{}' has duplicate action '{}'",
                    name, step.id, action.id
                )));
            }
            if !action_kinds.contains(&action.kind) {
                return Err(AppError::Configuration(format!(
                    "Workflow '{}': step '{}' action '{}' uses unknown kind '{}'",
                    name, step.id, action.id, action.kind
                )));
            }
            if let Some(outcome) = action.outcome() {
                if !step.outcomes.contains_key(outcome) {
                    return Err(AppError::Configuration(format!(
                        "Workflow '{}': step '{}' action '{}' routes to undeclared outcome '{}'",
                        name, step.id, action.id, outcome
                    )));
                }
            }
        }

        if let Some(ref when) = step.when {
            guards.validate(when).map_err(|e| {
                AppError::Configuration(format!("Workflow '{}': step '{}': {}", name, step.id, e))
            })?;
        }
    }

    Ok(())
}
