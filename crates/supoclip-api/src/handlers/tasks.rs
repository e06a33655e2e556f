//! Task handlers: submission, status, progress, clips and deletion.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use supoclip_models::{
    is_valid_upload_handle, ClipView, FontOptions, ProgressSnapshot, Source, SourceDescriptor,
    SourceRef, TaskId, TaskStatus, TaskView,
};
use supoclip_queue::ProcessTaskJob;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::security::{is_valid_task_id, sanitize_title, screen_source_url};
use crate::state::AppState;

/// URL prefix the clip files are served under.
pub const CLIPS_URL_PREFIX: &str = "/clips";

// ============================================================================
// Types
// ============================================================================

/// Where the source video comes from.
#[derive(Debug, Default, Deserialize)]
pub struct SourceRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub uploaded_file_handle: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartTaskRequest {
    pub source: SourceRequest,
    #[serde(default)]
    pub font_options: FontOptions,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartTaskResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClipsResponse {
    pub task_id: TaskId,
    pub clips: Vec<ClipView>,
    pub total_clips: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/tasks
///
/// Validates the request, records a pending task and hands it to the workers.
/// Nothing is stored when validation fails.
pub async fn start_task(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<StartTaskRequest>, JsonRejection>,
) -> ApiResult<Json<StartTaskResponse>> {
    let Json(request) = payload.map_err(|e| {
        metrics::record_task_rejected("malformed");
        ApiError::bad_request(e.body_text())
    })?;

    let (descriptor, font) = validate_request(&state, &request).await.inspect_err(|_| {
        metrics::record_task_rejected("validation");
    })?;

    let task_id = state
        .tasks
        .create(user.user_id.clone(), &descriptor, font)
        .await?;

    let job = ProcessTaskJob::new(task_id.clone(), user.user_id.clone());
    if let Err(e) = state.dispatcher.dispatch(job).await {
        warn!(task_id = %task_id, error = %e, "Dispatch failed, removing task");
        if let Err(cleanup) = state.tasks.delete(&task_id, &user.user_id).await {
            warn!(task_id = %task_id, error = %cleanup, "Failed to remove undispatched task");
        }
        return Err(e.into());
    }

    let source_type = descriptor.source_type();
    metrics::record_task_submitted(source_type.as_str());
    info!(
        task_id = %task_id,
        user_id = %user.user_id,
        source_type = %source_type,
        "Task submitted"
    );

    Ok(Json(StartTaskResponse {
        task_id,
        status: TaskStatus::Pending,
    }))
}

async fn validate_request(
    state: &AppState,
    request: &StartTaskRequest,
) -> ApiResult<(SourceDescriptor, supoclip_models::FontConfig)> {
    let source = &request.source;

    if let Some(url) = source.url.as_deref().filter(|u| !u.trim().is_empty()) {
        screen_source_url(url).map_err(ApiError::BadRequest)?;
    }
    let title = source.title.as_deref().map(sanitize_title);

    let descriptor = SourceDescriptor::from_parts(
        source.url.as_deref(),
        source.uploaded_file_handle.as_deref(),
        title.as_deref(),
    )?;
    let font = request.font_options.resolve()?;

    if let SourceRef::LocalUpload { handle } = &descriptor.source {
        let path = state.config.upload_dir.join(handle);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ApiError::bad_request(format!(
                "Uploaded file '{}' not found",
                handle
            )));
        }
    }

    Ok((descriptor, font))
}

/// GET /api/tasks/:task_id
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<TaskView>> {
    let task_id = parse_task_id(&task_id)?;
    let view = state.tasks.get(&task_id, &user.user_id).await?;
    Ok(Json(view))
}

/// GET /api/tasks/:task_id/clips
///
/// Clips ordered by `clip_order`; empty until the task has completed.
pub async fn list_task_clips(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<ClipsResponse>> {
    let task_id = parse_task_id(&task_id)?;
    let clips: Vec<ClipView> = state
        .tasks
        .list_clips(&task_id, &user.user_id)
        .await?
        .iter()
        .map(|clip| ClipView::new(clip, CLIPS_URL_PREFIX))
        .collect();

    Ok(Json(ClipsResponse {
        task_id,
        total_clips: clips.len(),
        clips,
    }))
}

/// GET /api/tasks/:task_id/progress
pub async fn get_task_progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<ProgressSnapshot>> {
    let task_id = parse_task_id(&task_id)?;
    let snapshot = state
        .tasks
        .notifier()
        .snapshot(&task_id, &user.user_id)
        .await?;
    Ok(Json(snapshot))
}

/// DELETE /api/tasks/:task_id
///
/// Removes the task, its clips and source, the clip files and the staged
/// upload the task was started from.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    user: AuthUser,
) -> ApiResult<StatusCode> {
    let task_id = parse_task_id(&task_id)?;
    let task = state.tasks.load(&task_id).await?;
    let source = state.tasks.source_of(&task).await?;
    let removed = state.tasks.delete(&task_id, &user.user_id).await?;

    if let Some(Source {
        reference: SourceRef::LocalUpload { handle },
        ..
    }) = &source
    {
        remove_upload(&state, &task_id, handle).await;
    }

    let clip_dir = state.config.clips_dir.join(task_id.as_str());
    match tokio::fs::remove_dir_all(&clip_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(task_id = %task_id, error = %e, "Failed to remove clip files"),
    }

    info!(task_id = %task_id, clips = removed.len(), "Task deleted by owner");
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_upload(state: &AppState, task_id: &TaskId, handle: &str) {
    if !is_valid_upload_handle(handle) {
        warn!(task_id = %task_id, handle = %handle, "Refusing to remove malformed upload handle");
        return;
    }
    match tokio::fs::remove_file(state.config.upload_dir.join(handle)).await {
        Ok(()) => info!(task_id = %task_id, handle = %handle, "Staged upload removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(task_id = %task_id, error = %e, "Failed to remove staged upload"),
    }
}

/// Malformed IDs cannot name a task.
fn parse_task_id(raw: &str) -> ApiResult<TaskId> {
    if !is_valid_task_id(raw) {
        return Err(ApiError::not_found(format!("Task {} not found", raw)));
    }
    Ok(TaskId::from_string(raw))
}
