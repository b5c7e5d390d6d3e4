//! Notification ingestion.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{NotificationMessage, Priority};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/send", post(send_notification))
}

/// Body of `POST /send`. Everything but `user_id` is optional.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SendRequest {
    fn into_notification(self) -> Result<NotificationMessage, AppError> {
        if self.user_id.trim().is_empty() {
            return Err(AppError::Validation("user_id is required".to_string()));
        }

        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(NotificationMessage {
            id,
            user_id: self.user_id,
            title: self.title,
            body: self.body,
            data: self.data,
            priority: self.priority,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            expires_at: self.expires_at,
            retry_count: 0,
        })
    }
}

/// POST /send: Enqueue a notification on the ingestion topic.
async fn send_notification(
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let notification = request.into_notification()?;

    state
        .producer
        .send(&notification.user_id, &notification)
        .await?;

    tracing::info!(
        notification_id = %notification.id,
        user_id = %notification.user_id,
        priority = %notification.priority,
        "Notification enqueued"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Notification sent successfully",
            "notification_id": notification.id,
            "user_id": notification.user_id,
        })),
    ))
}
