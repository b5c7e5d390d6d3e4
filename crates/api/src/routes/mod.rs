pub mod health;
pub mod metrics;
pub mod ratelimit;
pub mod send;

use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::state::AppState;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(metrics::router())
        .merge(ratelimit::router())
        .merge(send::router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}
