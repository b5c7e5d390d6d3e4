//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health: 200 when the pool, the limiter store and at least one
/// provider are healthy, 503 otherwise. Each provider is health-checked once per request.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let mut healthy = true;
    let mut status = json!({
        "service": "herald",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().timestamp(),
    });

    let checks = state.registry.health_check_all().await;
    let healthy_providers = checks.iter().filter(|(_, result)| result.is_ok()).count();

    if let Err(e) = state.pool.health_with_providers(healthy_providers) {
        healthy = false;
        status["worker_pool_error"] = json!(e.to_string());
    }

    if let Err(e) = state.limiter.ping().await {
        healthy = false;
        status["rate_limiter_error"] = json!(e.to_string());
    }

    status["healthy_providers"] = json!(healthy_providers);
    status["total_providers"] = json!(checks.len());
    if healthy_providers == 0 {
        healthy = false;
        status["provider_error"] = json!("no healthy providers");
    }

    status["status"] = json!(if healthy { "healthy" } else { "unhealthy" });
    let code = if healthy {
        StatusCode::OK
    } else {
        tracing::warn!(status = %status, "Health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(status))
}
