use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{LimiterBackend, SelectionStrategy, WindowPolicy};

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection string
    pub redis_url: String,

    /// Counter store for the rate limiter (`redis` or `memory`)
    pub rate_limit_backend: LimiterBackend,

    /// Notifications allowed per user per window (default: 10)
    pub rate_limit_per_user: u64,

    /// Rate limit window in seconds (default: 60)
    pub rate_limit_window_secs: u64,

    /// Whether every call refreshes the window (`idle`) or only the first (`fixed`)
    pub rate_limit_window_policy: WindowPolicy,

    /// Topic the dispatcher consumes notifications from
    pub queue_topic: String,

    /// Consumer group name (diagnostic only, there is no fan-out)
    pub queue_consumer_group: String,

    /// Capacity of each topic buffer (default: 10000)
    pub queue_capacity: usize,

    /// How long a producer waits for buffer space, in milliseconds
    pub queue_send_timeout_ms: u64,

    /// How long a consumer waits for a message before re-checking shutdown
    pub queue_poll_timeout_ms: u64,

    /// Number of concurrent delivery workers (default: 10)
    pub worker_count: usize,

    /// Capacity of the worker pool's job, result and error buffers (default: 1000)
    pub max_queue_size: usize,

    /// Retries after the first delivery attempt (default: 3)
    pub retry_attempts: u32,

    /// Base retry delay in milliseconds; attempt `n` waits `delay * (n - 1)`
    pub retry_delay_ms: u64,

    /// Ceiling for a single provider call in milliseconds
    pub provider_timeout_ms: u64,

    /// Provider selection strategy
    pub provider_strategy: SelectionStrategy,

    /// Webhook backends as `name=url` pairs
    pub webhook_providers: Vec<(String, String)>,

    /// Register the simulated firebase/apns/fcm providers
    pub mock_providers: bool,

    /// Port for the status API
    pub api_port: u16,

    /// Grace period for shutdown in seconds
    pub shutdown_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let webhook_providers = match lookup("WEBHOOK_PROVIDERS") {
            Some(raw) => parse_webhook_providers(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            redis_url: lookup("REDIS_URL")
                .unwrap_or_else(|| "redis://localhost:6379".to_string()),
            rate_limit_backend: parse_or(&lookup, "RATE_LIMIT_BACKEND", LimiterBackend::Redis)?,
            rate_limit_per_user: parse_or(&lookup, "RATE_LIMIT_PER_USER", 10)?,
            rate_limit_window_secs: parse_or(&lookup, "RATE_LIMIT_WINDOW_SECS", 60)?,
            rate_limit_window_policy: parse_or(
                &lookup,
                "RATE_LIMIT_WINDOW_POLICY",
                WindowPolicy::Idle,
            )?,
            queue_topic: lookup("QUEUE_TOPIC").unwrap_or_else(|| "notifications".to_string()),
            queue_consumer_group: lookup("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|| "notification-service".to_string()),
            queue_capacity: parse_or(&lookup, "QUEUE_CAPACITY", 10_000)?,
            queue_send_timeout_ms: parse_or(&lookup, "QUEUE_SEND_TIMEOUT_MS", 10_000)?,
            queue_poll_timeout_ms: parse_or(&lookup, "QUEUE_POLL_TIMEOUT_MS", 1_000)?,
            worker_count: at_least_one("WORKER_COUNT", parse_or(&lookup, "WORKER_COUNT", 10)?)?,
            max_queue_size: parse_or(&lookup, "MAX_QUEUE_SIZE", 1_000)?,
            retry_attempts: parse_or(&lookup, "RETRY_ATTEMPTS", 3)?,
            retry_delay_ms: parse_or(&lookup, "RETRY_DELAY_MS", 1_000)?,
            provider_timeout_ms: parse_or(&lookup, "PROVIDER_TIMEOUT_MS", 10_000)?,
            provider_strategy: parse_or(&lookup, "PROVIDER_STRATEGY", SelectionStrategy::Random)?,
            webhook_providers,
            mock_providers: parse_or(&lookup, "MOCK_PROVIDERS", true)?,
            api_port: parse_or(&lookup, "API_PORT", 8080)?,
            shutdown_timeout_secs: parse_or(&lookup, "SHUTDOWN_TIMEOUT_SECS", 30)?,
        })
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn queue_send_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_send_timeout_ms)
    }

    pub fn queue_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_poll_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} is invalid ({raw:?}): {e}")),
        _ => Ok(default),
    }
}

fn at_least_one(key: &str, value: usize) -> anyhow::Result<usize> {
    if value < 1 {
        anyhow::bail!("{key} must be at least 1, got {value}");
    }
    Ok(value)
}

/// Parse `name=url,name2=url2`.
fn parse_webhook_providers(raw: &str) -> anyhow::Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, url) = entry.split_once('=').ok_or_else(|| {
                anyhow::anyhow!("WEBHOOK_PROVIDERS entry {entry:?} must look like name=url")
            })?;
            Ok((name.trim().to_string(), url.trim().to_string()))
        })
        .collect()
}
