//! Construction of the pipeline components from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::redis_pool::create_redis_pool;
use herald_common::types::LimiterBackend;
use herald_engine::{MemoryCounterStore, RateLimiter, RedisCounterStore};
use herald_notifier::{MockProvider, ProviderRegistry, WebhookProvider};

const DEFAULT_LOG_FILTER: &str =
    "herald_api=info,herald_engine=info,herald_queue=info,herald_notifier=info,tower_http=info";

/// Install the global subscriber. `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Rate limiter over the configured counter store.
pub async fn build_limiter(config: &AppConfig) -> anyhow::Result<RateLimiter> {
    let limiter = match config.rate_limit_backend {
        LimiterBackend::Redis => {
            let conn = create_redis_pool(&config.redis_url).await?;
            tracing::info!("Redis connection established");
            RateLimiter::new(
                Arc::new(RedisCounterStore::new(conn)),
                config.rate_limit_per_user,
                config.rate_limit_window(),
                config.rate_limit_window_policy,
            )
        }
        LimiterBackend::Memory => {
            tracing::warn!("Using in-memory rate limit counters; limits are per process");
            RateLimiter::new(
                Arc::new(MemoryCounterStore::new()),
                config.rate_limit_per_user,
                config.rate_limit_window(),
                config.rate_limit_window_policy,
            )
        }
    };

    tracing::info!(
        limit = config.rate_limit_per_user,
        window_secs = config.rate_limit_window_secs,
        policy = ?config.rate_limit_window_policy,
        "Rate limiter ready"
    );
    Ok(limiter)
}

/// Provider registry with the simulated backends (when enabled) followed by
/// every configured webhook.
pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new(config.provider_strategy)
        .with_health_timeout(config.provider_timeout());

    if config.mock_providers {
        for (name, success_rate, latency_ms, jitter_ms) in [
            ("firebase", 0.95, 100, 50),
            ("apns", 0.98, 150, 75),
            ("fcm", 0.92, 80, 40),
        ] {
            registry.add_provider(Arc::new(MockProvider::new(
                name,
                success_rate,
                Duration::from_millis(latency_ms),
                Duration::from_millis(jitter_ms),
            )));
        }
    }

    for (name, url) in &config.webhook_providers {
        registry.add_provider(Arc::new(
            WebhookProvider::new(name.clone(), url.clone()).with_timeout(config.provider_timeout()),
        ));
    }

    if registry.is_empty() {
        tracing::warn!("No delivery providers configured; every notification will fail");
    }
    tracing::info!(
        providers = registry.len(),
        strategy = %registry.strategy(),
        "Provider registry ready"
    );
    registry
}
