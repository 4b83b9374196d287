/// Guarded project, task and developer endpoints
///
/// Project/task CRUD belongs to the domain layer. These handlers exist so the
/// authorization guards have real routes in front of them; each one runs only
/// after its route's guard allowed the request.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, State},
    Json,
};
use devtrack_shared::{
    models::{
        developer::Developer,
        task::{Project, Task, TaskStatus},
    },
    store::{DeveloperStore, ResourceStore},
};
use serde::Deserialize;
use tracing::info;

/// Status change request
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: TaskStatus,
}

/// `GET /projects/:id` (View Project)
pub async fn get_project(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Project>> {
    state
        .store
        .find_project(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Project {} not found", id)))
}

/// `GET /tasks/:id` (View Task)
pub async fn get_task(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Task>> {
    state
        .store
        .find_task(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", id)))
}

/// `PUT /tasks/:id/status` (Modify Task)
pub async fn update_task_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<Task>> {
    let task = state
        .store
        .update_task_status(id, req.status)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", id)))?;

    info!(task_id = id, status = req.status.as_str(), "Task status updated");
    Ok(Json(task))
}

/// `GET /developers` (View Developer)
pub async fn list_developers(State(state): State<AppState>) -> ApiResult<Json<Vec<Developer>>> {
    Ok(Json(state.store.list_developers().await?))
}
