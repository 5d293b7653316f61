//! Workflow definition API handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::definition::{Step, WorkflowDefinition};
use crate::error::{AppError, AppResult};
use crate::result_ext::ResultExt;
use crate::state::AppState;

/// Step as shown in listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    pub id: String,
    pub role: String,
    pub actions: Vec<String>,
    pub required_approvals: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outcomes: BTreeMap<String, String>,
}

impl From<&Step> for StepSummary {
    fn from(step: &Step) -> Self {
        Self {
            id: step.id.clone(),
            role: step.role.clone(),
            actions: step.action_ids().into_iter().map(str::to_string).collect(),
            required_approvals: step.required_approvals,
            when: step.when.clone(),
            outcomes: step.outcomes.clone(),
        }
    }
}

/// Workflow as shown in listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub default: bool,
    pub containers: Vec<String>,
    pub steps: Vec<StepSummary>,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(definition: &WorkflowDefinition) -> Self {
        Self {
            id: definition.id().to_string(),
            description: definition.metadata.description.clone(),
            default: definition.default,
            containers: definition.containers.clone(),
            steps: definition.steps.iter().map(StepSummary::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub status: String,
    pub workflows: usize,
}

/// List loaded workflow definitions.
///
/// `GET /api/workflows`
pub async fn list(State(state): State<AppState>) -> Json<Vec<WorkflowSummary>> {
    let workflows = state
        .engine
        .registry()
        .definitions()
        .iter()
        .map(|d| WorkflowSummary::from(d.as_ref()))
        .collect();
    Json(workflows)
}

/// Full definition of one workflow.
///
/// `GET /api/workflows/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> AppResult<Json<WorkflowDefinition>> {
    let definition = state
        .engine
        .registry()
        .definitions()
        .into_iter()
        .find(|d| d.id() == workflow_id)
        .ok_or_else(|| AppError::NotFound(format!("Workflow '{}' not found", workflow_id)))?;
    Ok(Json(definition.as_ref().clone()))
}

/// Re-read the definitions directory.
///
/// `POST /api/workflows/reload`
///
/// On a validation error the loaded set stays unchanged.
pub async fn reload(State(state): State<AppState>) -> AppResult<Json<ReloadResponse>> {
    let workflows = state
        .engine
        .registry()
        .reload_from_source()
        .log("reloading workflow definitions")?;
    Ok(Json(ReloadResponse {
        status: "ok".to_string(),
        workflows,
    }))
}
