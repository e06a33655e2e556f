//! Upload staging.
//!
//! A client uploads a video once and then refers to it by the returned
//! handle when starting a task.

use axum::extract::{Multipart, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::security::{upload_extension, ALLOWED_UPLOAD_EXTENSIONS};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub uploaded_file_handle: String,
    /// Name the client sent
    pub filename: String,
    pub size: u64,
}

/// POST /api/upload
///
/// Expects one multipart field named `file`.
pub async fn upload_video(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart field: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original = field.file_name().unwrap_or("upload").to_string();
        let ext = upload_extension(&original).ok_or_else(|| {
            ApiError::bad_request(format!(
                "Unsupported file type. Allowed: {}",
                ALLOWED_UPLOAD_EXTENSIONS.join(", ")
            ))
        })?;

        let handle = format!("{}.{}", Uuid::new_v4(), ext);
        tokio::fs::create_dir_all(&state.config.upload_dir).await?;
        let path = state.config.upload_dir.join(&handle);
        let mut out = tokio::fs::File::create(&path).await?;

        let limit = state.config.max_upload_size as u64;
        let mut size: u64 = 0;
        let written: ApiResult<()> = async {
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read file chunk: {}", e)))?
            {
                size = size.saturating_add(chunk.len() as u64);
                if size > limit {
                    return Err(ApiError::PayloadTooLarge(format!(
                        "Upload exceeds {} bytes",
                        limit
                    )));
                }
                out.write_all(&chunk).await?;
            }
            out.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = written {
            drop(out);
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %rm, "Failed to remove partial upload");
            }
            return Err(e);
        }
        if size == 0 {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(ApiError::bad_request("Uploaded file is empty"));
        }

        metrics::record_upload(size);
        info!(
            user_id = %user.user_id,
            handle = %handle,
            bytes = size,
            "Upload staged"
        );

        return Ok(Json(UploadResponse {
            uploaded_file_handle: handle,
            filename: original,
            size,
        }));
    }

    Err(ApiError::bad_request("Multipart field 'file' is required"))
}
