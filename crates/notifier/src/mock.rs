//! Simulated delivery backend.
//!
//! Used for local runs and tests: latency is `base + uniform(0, jitter)`,
//! delivery succeeds with probability `success_rate`, and failures carry one of
//! a small set of canonical reasons.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;

use herald_common::error::ProviderError;
use herald_common::types::{NotificationMessage, ProviderResponse};

use crate::provider::Provider;

/// Reasons reported by a simulated rejection.
pub const FAILURE_REASONS: [&str; 5] = [
    "network timeout",
    "rate limit exceeded",
    "invalid token",
    "service unavailable",
    "message too large",
];

const DEFAULT_HEALTH_LATENCY: Duration = Duration::from_millis(50);
const DEFAULT_HEALTH_FAILURE_RATE: f64 = 0.05;

pub struct MockProvider {
    name: String,
    success_rate: f64,
    avg_latency: Duration,
    latency_jitter: Duration,
    health_latency: Duration,
    health_failure_rate: f64,
    healthy: AtomicBool,
}

impl MockProvider {
    /// `success_rate` is clamped to `0.0..=1.0`.
    pub fn new(
        name: impl Into<String>,
        success_rate: f64,
        avg_latency: Duration,
        latency_jitter: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            success_rate: success_rate.clamp(0.0, 1.0),
            avg_latency,
            latency_jitter,
            health_latency: DEFAULT_HEALTH_LATENCY,
            health_failure_rate: DEFAULT_HEALTH_FAILURE_RATE,
            healthy: AtomicBool::new(true),
        }
    }

    pub fn with_health_latency(mut self, latency: Duration) -> Self {
        self.health_latency = latency;
        self
    }

    /// Probability that a health check fails even while marked healthy.
    pub fn with_health_failure_rate(mut self, rate: f64) -> Self {
        self.health_failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Force the health status (health checks always fail while `false`).
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    fn simulated_latency(&self) -> Duration {
        let jitter_nanos = self.latency_jitter.as_nanos() as u64;
        if jitter_nanos == 0 {
            return self.avg_latency;
        }
        self.avg_latency + Duration::from_nanos(rand::thread_rng().gen_range(0..jitter_nanos))
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        notification: &NotificationMessage,
    ) -> Result<ProviderResponse, ProviderError> {
        tokio::time::sleep(self.simulated_latency()).await;

        let (success, reason_index) = {
            let mut rng = rand::thread_rng();
            (
                rng.r#gen::<f64>() < self.success_rate,
                rng.gen_range(0..FAILURE_REASONS.len()),
            )
        };

        if success {
            let short_id: String = notification.id.chars().take(8).collect();
            Ok(ProviderResponse::delivered(format!(
                "{}_{}_{}",
                self.name,
                Utc::now().timestamp(),
                short_id
            )))
        } else {
            Ok(ProviderResponse::rejected(FAILURE_REASONS[reason_index]))
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        tokio::time::sleep(self.health_latency).await;

        if !self.healthy.load(Ordering::Relaxed) {
            return Err(ProviderError::Unhealthy {
                provider: self.name.clone(),
                reason: "marked unhealthy".to_string(),
            });
        }

        let flaked = rand::thread_rng().r#gen::<f64>() < self.health_failure_rate;
        if flaked {
            return Err(ProviderError::Unhealthy {
                provider: self.name.clone(),
                reason: "health check failed".to_string(),
            });
        }

        Ok(())
    }
}
