//! Pipeline counters.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics))
}

async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.pool.metrics();
    let topic_depth = state
        .topics
        .stats(&state.config.queue_topic)
        .map(|stats| stats.len)
        .unwrap_or(0);

    Json(json!({
        "processed_messages": snapshot.processed,
        "failed_messages": snapshot.failed,
        "rate_limited_messages": snapshot.rate_limited,
        "queue_size": state.pool.queue_len(),
        "worker_count": state.pool.worker_count(),
        "topic_depth": topic_depth,
        "timestamp": Utc::now().timestamp(),
    }))
}
