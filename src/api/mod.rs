//! API layer -- axum routes, handlers, and middleware.

mod routes;
pub mod state;

use self::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    let body_limit = state.pipeline.config().api.max_body_bytes;
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}
