use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;

use herald_common::error::ProviderError;
use herald_common::types::SelectionStrategy;

use crate::provider::Provider;

/// Upper bound on a single provider health check.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Registered delivery backends plus the policy for choosing between them.
///
/// Providers are registered during startup; the registry is then shared
/// read-only (behind an `Arc`) by every worker.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
    strategy: SelectionStrategy,
    cursor: AtomicUsize,
    health_timeout: Duration,
}

impl ProviderRegistry {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self {
            providers: Vec::new(),
            strategy,
            cursor: AtomicUsize::new(0),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }

    /// A health check that has not answered within `timeout` counts as unhealthy.
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Register a backend. Registration order matters for `HealthBased` and
    /// `RoundRobin`.
    pub fn add_provider(&mut self, provider: Arc<dyn Provider>) {
        tracing::info!(provider = provider.name(), "Registered delivery provider");
        self.providers.push(provider);
    }

    /// Builder form of [`add_provider`](Self::add_provider).
    pub fn with_provider(mut self, provider: impl Provider + 'static) -> Self {
        self.add_provider(Arc::new(provider));
        self
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Pick a provider for the next notification.
    ///
    /// Fails only when nothing is registered; `HealthBased` falls back to the
    /// first registered provider when every health check fails.
    pub async fn select(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        if self.providers.is_empty() {
            return Err(ProviderError::NoProvidersAvailable);
        }

        let provider = match self.strategy {
            SelectionStrategy::Random => {
                let index = rand::thread_rng().gen_range(0..self.providers.len());
                self.providers[index].clone()
            }
            SelectionStrategy::RoundRobin => {
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.providers.len();
                self.providers[index].clone()
            }
            SelectionStrategy::HealthBased => self.first_healthy().await,
        };

        Ok(provider)
    }

    async fn first_healthy(&self) -> Arc<dyn Provider> {
        for provider in &self.providers {
            match self.check_health(provider.as_ref()).await {
                Ok(()) => return provider.clone(),
                Err(e) => {
                    tracing::debug!(provider = provider.name(), error = %e, "Skipping unhealthy provider");
                }
            }
        }

        tracing::warn!(
            fallback = self.providers[0].name(),
            "No provider passed its health check, falling back to the first registered"
        );
        self.providers[0].clone()
    }

    /// Health-check every provider in registration order.
    pub async fn health_check_all(&self) -> Vec<(String, Result<(), ProviderError>)> {
        let mut results = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            results.push((provider.name().to_string(), self.check_health(provider.as_ref()).await));
        }
        results
    }

    async fn check_health(&self, provider: &dyn Provider) -> Result<(), ProviderError> {
        tokio::time::timeout(self.health_timeout, provider.health_check())
            .await
            .unwrap_or(Err(ProviderError::Timeout(self.health_timeout)))
    }

    /// Number of providers currently passing their health check.
    pub async fn healthy_count(&self) -> usize {
        self.health_check_all()
            .await
            .iter()
            .filter(|(_, result)| result.is_ok())
            .count()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(SelectionStrategy::default())
    }
}
