//! Per-user rate limit status.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use herald_common::error::AppError;
use herald_common::types::RateLimitStatus;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ratelimit/{user_id}", get(rate_limit_status))
}

/// GET /ratelimit/:user_id: Counter, remaining allowance and reset time.
async fn rate_limit_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<RateLimitStatus>, AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::Validation("user_id is required".to_string()));
    }
    let status = state.limiter.status(&user_id).await?;
    Ok(Json(status))
}
