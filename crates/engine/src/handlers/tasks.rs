//! Task pool and claim API handlers.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::TransitionResult;
use crate::error::{AppError, AppResult};
use crate::model::{ClaimedTask, PoolTask};
use crate::state::AppState;

/// Query for the per-principal task listings.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskQuery {
    pub principal: String,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Identifies one task of one principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub workflow_item_id: Uuid,
    pub step_id: String,
    pub principal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub workflow_item_id: Uuid,
    pub step_id: String,
    pub principal: String,
    pub action_id: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnclaimResponse {
    pub status: String,
    pub workflow_item_id: Uuid,
    pub step_id: String,
}

fn require_principal(principal: &str) -> AppResult<()> {
    if principal.trim().is_empty() {
        return Err(AppError::Validation("principal must not be empty".to_string()));
    }
    Ok(())
}

/// Pool tasks a principal may claim.
///
/// `GET /api/tasks/pool?principal=bob&offset=0&limit=50`
pub async fn pool(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> AppResult<Json<Vec<PoolTask>>> {
    require_principal(&query.principal)?;
    let page = state.page(query.offset, query.limit);
    let tasks = state
        .engine
        .list_pool_tasks_for(&query.principal, page)
        .await?;
    Ok(Json(tasks))
}

/// Tasks a principal has claimed.
///
/// `GET /api/tasks/claimed?principal=bob`
pub async fn claimed(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> AppResult<Json<Vec<ClaimedTask>>> {
    require_principal(&query.principal)?;
    let page = state.page(query.offset, query.limit);
    let tasks = state
        .engine
        .list_claimed_tasks_for(&query.principal, page)
        .await?;
    Ok(Json(tasks))
}

/// Claim a pool task.
///
/// `POST /api/tasks/claim`
///
/// # Errors
///
/// - `409 Conflict` when another principal won the race
/// - `403 Forbidden` when the principal is not eligible
pub async fn claim(
    State(state): State<AppState>,
    Json(request): Json<TaskRequest>,
) -> AppResult<Json<ClaimedTask>> {
    require_principal(&request.principal)?;
    let task = state
        .engine
        .claim(request.workflow_item_id, &request.step_id, &request.principal)
        .await?;
    Ok(Json(task))
}

/// Return a claimed task to the pool.
///
/// `POST /api/tasks/unclaim`
pub async fn unclaim(
    State(state): State<AppState>,
    Json(request): Json<TaskRequest>,
) -> AppResult<Json<UnclaimResponse>> {
    state
        .engine
        .unclaim(request.workflow_item_id, &request.step_id, &request.principal)
        .await?;
    Ok(Json(UnclaimResponse {
        status: "ok".to_string(),
        workflow_item_id: request.workflow_item_id,
        step_id: request.step_id,
    }))
}

/// Run an action on a claimed task.
///
/// `POST /api/tasks/execute`
///
/// # Request Body
///
/// ```json
/// {
///   "workflow_item_id": "6f9c...",
///   "step_id": "review",
///   "principal": "bob",
///   "action_id": "reject",
///   "input": {"reason": "missing abstract"}
/// }
/// ```
pub async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> AppResult<Json<TransitionResult>> {
    require_principal(&request.principal)?;
    let result = state
        .engine
        .execute(
            request.workflow_item_id,
            &request.step_id,
            &request.principal,
            &request.action_id,
            request.input,
        )
        .await?;
    Ok(Json(result))
}
