//! API routes.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::ServeDir;

use crate::handlers::{
    delete_task, get_task, get_task_progress, health, list_fonts, list_task_clips, start_task,
    store_health, upload_video, CLIPS_URL_PREFIX,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, security_headers, trace_layer, RateLimiterCache,
    REQUEST_ID_HEADER,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let task_routes = Router::new()
        .route("/tasks", post(start_task))
        .route("/tasks/:task_id", get(get_task).delete(delete_task))
        .route("/tasks/:task_id/clips", get(list_task_clips))
        .route("/tasks/:task_id/progress", get(get_task_progress))
        .route("/fonts", get(list_fonts))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size));

    // Uploads get their own, much larger, limit
    let upload_routes = Router::new()
        .route("/upload", post(upload_video))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.config.max_upload_size));

    let rate_limiter = Arc::new(RateLimiterCache::new(state.config.rate_limit_rps));

    let api_routes = Router::new()
        .merge(task_routes)
        .merge(upload_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/health/store", get(store_health));

    // JSON only; rendered clips are already compressed
    let json_routes = Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(CompressionLayer::new());

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .merge(json_routes)
        .nest_service(CLIPS_URL_PREFIX, ServeDir::new(&state.config.clips_dir))
        .merge(metrics_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(trace_layer())
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER.clone()))
        .layer(SetRequestIdLayer::new(
            REQUEST_ID_HEADER.clone(),
            MakeRequestUuid,
        ))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
