use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Message queue failures.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No space (send) or no message (receive) before the deadline.
    #[error("Queue operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Queue handle is closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures reported by a delivery backend or by provider selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("No providers available")]
    NoProvidersAvailable,

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider {provider} is unhealthy: {reason}")]
    Unhealthy { provider: String, reason: String },
}

/// Counter store failures.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Counter store error: {0}")]
    Store(String),
}

/// Infrastructure faults emitted by the worker pool on its error sink.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Job queue is full")]
    QueueFull,

    #[error("Worker pool is stopped")]
    Stopped,

    #[error("Notification {id} expired")]
    Expired { id: String },

    #[error("Rate limiter error for user {user_id}: {source}")]
    RateLimiter {
        user_id: String,
        #[source]
        source: RateLimitError,
    },

    #[error("Failed to get provider: {0}")]
    NoProvidersAvailable(#[source] ProviderError),

    #[error("No healthy providers available")]
    NoHealthyProviders,
}

/// Reason attached to a failed `ProcessingResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryFailure {
    #[error("Rate limit exceeded for user {user_id}")]
    RateLimited { user_id: String },

    /// The provider answered but declined the notification.
    #[error("Provider error: {reason}")]
    Rejected { reason: String },

    #[error("All {attempts} attempts failed, last error: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Rate limiter error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Queue(QueueError::Timeout(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::Queue(QueueError::Serialization(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::Queue(QueueError::Closed) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::RateLimit(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
