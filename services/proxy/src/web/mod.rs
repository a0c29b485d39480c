pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;

pub use rest::{get_progress_handler, proxy_all_handler, update_progress_handler};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, put},
    Router,
};
use std::sync::Arc;

use crate::web::state::AppState;

/// Builds the full proxy router.
///
/// Methods other than the tracked ones on the progress paths fall through to
/// the pass-through handler, like every unknown path.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/syncs/progress",
            put(update_progress_handler).fallback(proxy_all_handler),
        )
        .route(
            "/syncs/progress/{document}",
            get(get_progress_handler).fallback(proxy_all_handler),
        )
        .fallback(proxy_all_handler)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(middleware::request_tracing())
        .with_state(app_state)
}
