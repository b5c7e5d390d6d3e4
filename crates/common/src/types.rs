use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DeliveryFailure;

/// Notification priority levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// A notification travelling through the delivery pipeline.
///
/// Ownership moves from stage to stage (queue → dispatcher → worker); a message
/// is never shared between two workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    /// Opaque key/value payload forwarded to the provider.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
}

impl NotificationMessage {
    /// Build a notification with a fresh v4 id and `created_at = now`.
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            title: title.into(),
            body: body.into(),
            data: HashMap::new(),
            priority: Priority::Normal,
            created_at: Utc::now(),
            expires_at: None,
            retry_count: 0,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Whether the notification's expiry lies strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if now > expires_at)
    }
}

/// A serialized record stored in a topic buffer.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Routing key; producers use the notification's user id.
    pub key: String,
    pub value: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    /// Always 0: each topic is a single buffer.
    pub partition: i32,
    /// Monotonic per-topic sequence number, for diagnostics only.
    pub offset: i64,
}

impl QueueMessage {
    /// Deserialize the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.value)
    }
}

/// Response returned by a delivery backend for a completed call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderResponse {
    pub fn delivered(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(reason.into()),
        }
    }
}

/// Terminal outcome of one notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingResult {
    pub message_id: String,
    pub user_id: String,
    pub success: bool,
    /// Backend that handled the final attempt; `None` when no provider was contacted.
    pub provider: Option<String>,
    pub error: Option<DeliveryFailure>,
    pub processed_at: DateTime<Utc>,
    pub attempts: u32,
}

impl ProcessingResult {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.error, Some(DeliveryFailure::RateLimited { .. }))
    }
}

/// Snapshot of the worker pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    pub processed: u64,
    pub failed: u64,
    pub rate_limited: u64,
}

/// Per-user limiter state exposed to status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub user_id: String,
    pub limit: u64,
    pub current: u64,
    pub remaining: u64,
    pub window_seconds: u64,
    pub reset_in_seconds: u64,
}

/// How a provider is chosen for each notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    Random,
    /// Cycles through providers in registration order.
    RoundRobin,
    /// First provider whose health check passes, else the first registered one.
    HealthBased,
}

impl std::str::FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "random" => Ok(SelectionStrategy::Random),
            "round_robin" | "roundrobin" => Ok(SelectionStrategy::RoundRobin),
            "health_based" | "healthbased" => Ok(SelectionStrategy::HealthBased),
            other => Err(format!("unknown selection strategy: {other}")),
        }
    }
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionStrategy::Random => write!(f, "random"),
            SelectionStrategy::RoundRobin => write!(f, "round_robin"),
            SelectionStrategy::HealthBased => write!(f, "health_based"),
        }
    }
}

/// When the limiter (re)arms a counter's expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Expiry refreshed on every call: the window only closes after `window`
    /// of inactivity.
    #[default]
    Idle,
    /// Expiry set once when the counter is created.
    Fixed,
}

impl std::str::FromStr for WindowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" | "rolling" => Ok(WindowPolicy::Idle),
            "fixed" => Ok(WindowPolicy::Fixed),
            other => Err(format!("unknown window policy: {other}")),
        }
    }
}

/// Backing store for rate-limit counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterBackend {
    #[default]
    Redis,
    Memory,
}

impl std::str::FromStr for LimiterBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(LimiterBackend::Redis),
            "memory" => Ok(LimiterBackend::Memory),
            other => Err(format!("unknown rate limit backend: {other}")),
        }
    }
}
