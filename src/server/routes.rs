//! Router configuration.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Upload cap for one submission (all PDFs together).
pub const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let download_path = state.download_path.clone();
    Router::new()
        .route(
            "/extract_text_stream",
            post(handlers::extract_text_stream).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(&download_path, get(handlers::download))
        .route("/history", post(handlers::history))
        .route("/stats", get(handlers::stats))
        .route("/user_stats", post(handlers::user_stats))
        .route("/user_stats_self", post(handlers::user_stats_self))
        .route("/user_list", get(handlers::user_list))
        .route("/health", get(handlers::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
