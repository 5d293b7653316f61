//! Workflow item API handlers.
//!
//! Starting, inspecting and aborting workflow items, plus the callback an
//! external curation queue uses to deliver its result.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::CurationResult;
use crate::engine::TransitionResult;
use crate::error::{AppError, AppResult};
use crate::model::{ClaimedTask, ContentItem, HistoryEntry, PoolTask, WorkflowItem};
use crate::state::AppState;

/// Request to start a workflow for a submitted content item.
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub container_id: String,
    pub submitter: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Notify the reviewers of the first step (default: true)
    #[serde(default = "default_notify")]
    pub notify: bool,
}

fn default_notify() -> bool {
    true
}

impl StartRequest {
    fn into_content(self) -> AppResult<ContentItem> {
        if self.submitter.trim().is_empty() {
            return Err(AppError::Validation("submitter must not be empty".to_string()));
        }
        let mut content = ContentItem::new(&self.submitter, self.title.as_deref());
        if let Some(metadata) = self.metadata {
            if !metadata.is_object() {
                return Err(AppError::Validation(
                    "metadata must be a JSON object".to_string(),
                ));
            }
            content.merge_metadata(&metadata);
        }
        Ok(content)
    }
}

/// Workflow item with its open tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDetail {
    #[serde(flatten)]
    pub item: WorkflowItem,
    pub pool_tasks: Vec<PoolTask>,
    pub claimed_tasks: Vec<ClaimedTask>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbortRequest {
    pub admin: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

/// Start a workflow.
///
/// `POST /api/workflow/items`
///
/// # Request Body
///
/// ```json
/// {
///   "container_id": "theses",
///   "submitter": "alice",
///   "title": "On Claims",
///   "metadata": {"language": "en"}
/// }
/// ```
pub async fn start(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> AppResult<(StatusCode, Json<WorkflowItem>)> {
    let container_id = request.container_id.clone();
    let notify = request.notify;
    let content = request.into_content()?;

    let item = if notify {
        state.engine.start(content, &container_id).await?
    } else {
        state
            .engine
            .start_without_notify(content, &container_id)
            .await?
    };

    Ok((StatusCode::CREATED, Json(item)))
}

/// List live workflow items.
///
/// `GET /api/workflow/items?offset=&limit=`
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<WorkflowItem>>> {
    let page = state.page(query.offset, query.limit);
    Ok(Json(state.engine.list(page).await?))
}

/// Get a workflow item with its pool and claimed tasks.
///
/// `GET /api/workflow/items/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> AppResult<Json<ItemDetail>> {
    let item = state.engine.get(item_id).await?;
    let pool_tasks = state.engine.pool_tasks_for_item(item_id).await?;
    let claimed_tasks = state.engine.claimed_tasks_for_item(item_id).await?;

    Ok(Json(ItemDetail {
        item,
        pool_tasks,
        claimed_tasks,
    }))
}

/// Audit trail of a workflow item.
///
/// `GET /api/workflow/items/{id}/history`
///
/// Still answers after the item was archived or returned.
pub async fn history(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> AppResult<Json<Vec<HistoryEntry>>> {
    Ok(Json(state.engine.history(item_id).await?))
}

/// Administrative abort.
///
/// `POST /api/workflow/items/{id}/abort`
pub async fn abort(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Json(request): Json<AbortRequest>,
) -> AppResult<Json<WorkflowItem>> {
    let reason = request.reason.unwrap_or_else(|| "aborted by administrator".to_string());
    let item = state.engine.abort(item_id, &request.admin, &reason).await?;
    Ok(Json(item))
}

/// Deliver the result of a queued curation run.
///
/// `POST /api/workflow/items/{id}/curation`
///
/// ```json
/// {"result": "rejected", "reason": "checksum mismatch"}
/// ```
pub async fn resume_curation(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Json(result): Json<CurationResult>,
) -> AppResult<Json<TransitionResult>> {
    Ok(Json(state.engine.resume_curation(item_id, result).await?))
}
