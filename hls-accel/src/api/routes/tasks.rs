//! Task administration routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use tracing::info;

use crate::api::error::ApiResult;
use crate::api::models::{AddTaskRequest, AddTaskResponse, MessageResponse, TaskResponse};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks).post(add_task))
        .route("/{id}", get(get_task).delete(delete_task))
        .route("/{id}/stop", post(stop_task))
}

/// All tasks, newest first, with download progress.
async fn list_tasks(State(state): State<AppState>) -> ApiResult<Json<Vec<TaskResponse>>> {
    let tasks = state.manager.list_with_progress().await?;
    Ok(Json(tasks.into_iter().map(TaskResponse::from).collect()))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskResponse>> {
    let task = state.manager.get_with_progress(&id).await?;
    Ok(Json(task.into()))
}

/// Start caching a playlist without a player. Work continues in the
/// background after the response.
async fn add_task(
    State(state): State<AppState>,
    Json(request): Json<AddTaskRequest>,
) -> ApiResult<(StatusCode, Json<AddTaskResponse>)> {
    let url = request.url.trim();
    let id = state.proxy.add_task(url).await?;
    info!(task_id = %id, url = %url, "Task add accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(AddTaskResponse {
            id,
            message: "Task started".to_string(),
        }),
    ))
}

async fn stop_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.manager.stop_task(&id).await?;
    Ok(Json(MessageResponse::new(format!("Task {id} stopped"))))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.manager.delete_task(&id).await?;
    Ok(Json(MessageResponse::new(format!("Task {id} deleted"))))
}
