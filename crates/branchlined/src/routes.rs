//! Route table.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/upload-file", post(handlers::upload_file))
        .route("/git/commit", post(handlers::commit_files))
        .route("/git/commit/contents", post(handlers::commit_contents))
        .route("/git/cherrypick", post(handlers::cherry_pick))
        .route("/git/cherrypick/review", post(handlers::open_review))
        .route("/git/reviews/{id}/approve", post(handlers::approve_review))
        .route("/git/promote/dev-to-uat", post(handlers::promote_dev_to_uat))
        .route("/git/promote/uat-to-main", post(handlers::promote_uat_to_main))
        .route("/git/promote/selective", post(handlers::promote_selective))
        .route("/git/branches", post(handlers::create_branch))
        .route("/git/branches/{*branch}", get(handlers::get_branch))
        .route("/git/audit", get(handlers::audit_log))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}
