//! Font catalog.

use axum::extract::State;
use axum::Json;

use supoclip_models::FontInfo;

use crate::error::ApiResult;
use crate::state::AppState;

/// GET /api/fonts
pub async fn list_fonts(State(state): State<AppState>) -> ApiResult<Json<Vec<FontInfo>>> {
    Ok(Json(state.fonts.list().await?))
}
