//! Shared application state for the Axum API server.

use std::sync::Arc;

use herald_common::config::AppConfig;
use herald_engine::{RateLimiter, WorkerPool};
use herald_notifier::ProviderRegistry;
use herald_queue::{Producer, TopicRegistry};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<WorkerPool>,
    pub limiter: Arc<RateLimiter>,
    pub registry: Arc<ProviderRegistry>,
    pub topics: Arc<TopicRegistry>,
    /// Producer for the ingestion topic.
    pub producer: Producer,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(
        pool: Arc<WorkerPool>,
        limiter: Arc<RateLimiter>,
        registry: Arc<ProviderRegistry>,
        topics: Arc<TopicRegistry>,
        config: AppConfig,
    ) -> Self {
        let producer = topics.producer(&config.queue_topic);
        Self {
            pool,
            limiter,
            registry,
            topics,
            producer,
            config,
        }
    }
}
