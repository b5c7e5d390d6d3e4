//! Worker pool: bounded job buffer, fixed set of delivery workers.
//!
//! Each accepted notification goes through:
//! 1. expiry check (expired → error sink, nothing else)
//! 2. rate limit (denied → terminal rate-limited result)
//! 3. provider selection
//! 4. up to `retry_attempts + 1` provider calls with linear backoff
//!
//! Every notification ends in exactly one of: a result, an error, or (when the
//! pool is stopped mid-flight) abandonment, which emits nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use herald_common::config::AppConfig;
use herald_common::error::{DeliveryFailure, PoolError, ProviderError};
use herald_common::types::{NotificationMessage, PoolMetrics, ProcessingResult};
use herald_notifier::{Provider, ProviderRegistry};

use crate::ratelimit::RateLimiter;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    /// Capacity of the job buffer and of both sinks.
    pub max_queue_size: usize,
    /// Retries after the first attempt.
    pub retry_attempts: u32,
    /// Attempt `n` waits `retry_delay * (n - 1)` before calling the provider.
    pub retry_delay: Duration,
    pub provider_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            max_queue_size: 1000,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            provider_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&AppConfig> for PoolConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            workers: config.worker_count,
            max_queue_size: config.max_queue_size,
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay(),
            provider_timeout: config.provider_timeout(),
        }
    }
}

/// Receiving ends of the pool's outputs. Both close once the pool has stopped
/// and every worker has exited.
pub struct PoolSinks {
    pub results: mpsc::Receiver<ProcessingResult>,
    pub errors: mpsc::Receiver<PoolError>,
}

struct SinkSenders {
    results: mpsc::Sender<ProcessingResult>,
    errors: mpsc::Sender<PoolError>,
}

pub struct WorkerPool {
    config: PoolConfig,
    limiter: Arc<RateLimiter>,
    registry: Arc<ProviderRegistry>,
    metrics: Arc<parking_lot::Mutex<PoolMetrics>>,
    jobs_tx: parking_lot::Mutex<Option<mpsc::Sender<NotificationMessage>>>,
    jobs_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<NotificationMessage>>>,
    /// Handed to the workers on start; dropped here so the sinks close with them.
    sinks: parking_lot::Mutex<Option<SinkSenders>>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    cancel: parking_lot::Mutex<CancellationToken>,
    stopped: AtomicBool,
}

impl WorkerPool {
    pub fn new(
        config: PoolConfig,
        limiter: Arc<RateLimiter>,
        registry: Arc<ProviderRegistry>,
    ) -> (Self, PoolSinks) {
        let capacity = config.max_queue_size.max(1);
        let (jobs_tx, jobs_rx) = mpsc::channel(capacity);
        let (results_tx, results_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(capacity);

        let pool = Self {
            config,
            limiter,
            registry,
            metrics: Arc::new(parking_lot::Mutex::new(PoolMetrics::default())),
            jobs_tx: parking_lot::Mutex::new(Some(jobs_tx)),
            jobs_rx: Arc::new(tokio::sync::Mutex::new(jobs_rx)),
            sinks: parking_lot::Mutex::new(Some(SinkSenders {
                results: results_tx,
                errors: errors_tx,
            })),
            handles: parking_lot::Mutex::new(Vec::new()),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
            stopped: AtomicBool::new(false),
        };

        let sinks = PoolSinks {
            results: results_rx,
            errors: errors_rx,
        };

        (pool, sinks)
    }

    /// Spawn the workers. They stop when `shutdown` is cancelled or on
    /// [`stop`](Self::stop); stopping the pool leaves `shutdown` untouched.
    pub fn start(&self, shutdown: &CancellationToken) {
        let Some(sinks) = self.sinks.lock().take() else {
            tracing::warn!("Worker pool already started");
            return;
        };

        let cancel = shutdown.child_token();
        *self.cancel.lock() = cancel.clone();

        let mut handles = self.handles.lock();
        for id in 0..self.config.workers {
            let worker = Worker {
                id,
                config: self.config.clone(),
                limiter: self.limiter.clone(),
                registry: self.registry.clone(),
                metrics: self.metrics.clone(),
                jobs: self.jobs_rx.clone(),
                results: sinks.results.clone(),
                errors: sinks.errors.clone(),
                cancel: cancel.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        tracing::info!(workers = self.config.workers, "Worker pool started");
    }

    /// Enqueue a notification without waiting.
    pub fn submit(&self, notification: NotificationMessage) -> Result<(), PoolError> {
        if self.is_stopped() {
            return Err(PoolError::Stopped);
        }

        let jobs = self.jobs_tx.lock();
        let Some(tx) = jobs.as_ref() else {
            return Err(PoolError::Stopped);
        };

        tx.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PoolError::Stopped,
        })
    }

    /// Cancel the workers, wait for all of them to exit, then close the job
    /// buffer. In-flight notifications are abandoned.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::info!("Stopping worker pool");
        self.cancel.lock().cancel();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }

        self.jobs_tx.lock().take();
        // Never started: close the sinks here instead.
        self.sinks.lock().take();

        tracing::info!("Worker pool stopped");
    }

    pub fn metrics(&self) -> PoolMetrics {
        *self.metrics.lock()
    }

    /// Jobs waiting for a worker.
    pub fn queue_len(&self) -> usize {
        self.jobs_tx
            .lock()
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    pub fn worker_count(&self) -> usize {
        self.config.workers
    }

    /// True after [`stop`](Self::stop) or once the shutdown token given to
    /// [`start`](Self::start) is cancelled.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.cancel.lock().is_cancelled()
    }

    pub async fn health_check(&self) -> Result<(), PoolError> {
        if self.is_stopped() {
            return Err(PoolError::Stopped);
        }
        self.health_with_providers(self.registry.healthy_count().await)
    }

    /// Pool health given a healthy provider count the caller already counted.
    pub fn health_with_providers(&self, healthy_providers: usize) -> Result<(), PoolError> {
        if self.is_stopped() {
            return Err(PoolError::Stopped);
        }
        if healthy_providers == 0 {
            return Err(PoolError::NoHealthyProviders);
        }
        Ok(())
    }
}

enum Outcome {
    Finished(ProcessingResult),
    Faulted(PoolError),
    /// Cancelled mid-flight; nothing is reported.
    Abandoned,
}

struct Worker {
    id: usize,
    config: PoolConfig,
    limiter: Arc<RateLimiter>,
    registry: Arc<ProviderRegistry>,
    metrics: Arc<parking_lot::Mutex<PoolMetrics>>,
    jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<NotificationMessage>>>,
    results: mpsc::Sender<ProcessingResult>,
    errors: mpsc::Sender<PoolError>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        tracing::debug!(worker_id = self.id, "Worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                job = async { self.jobs.lock().await.recv().await } => job,
            };

            let Some(notification) = job else {
                break;
            };

            let notification_id = notification.id.clone();
            match self.process(notification).await {
                Outcome::Finished(result) => self.emit_result(result),
                Outcome::Faulted(error) => self.emit_error(error),
                Outcome::Abandoned => {
                    tracing::debug!(
                        worker_id = self.id,
                        notification_id = %notification_id,
                        "Notification abandoned on shutdown"
                    );
                }
            }
        }

        tracing::debug!(worker_id = self.id, "Worker stopped");
    }

    async fn process(&self, notification: NotificationMessage) -> Outcome {
        if notification.is_expired_at(Utc::now()) {
            tracing::debug!(
                worker_id = self.id,
                notification_id = %notification.id,
                "Notification expired before delivery"
            );
            return Outcome::Faulted(PoolError::Expired {
                id: notification.id,
            });
        }

        match self.limiter.is_allowed(&notification.user_id).await {
            Ok(true) => {}
            Ok(false) => {
                self.metrics.lock().rate_limited += 1;
                let attempts = notification.retry_count + 1;
                let user_id = notification.user_id.clone();
                return Outcome::Finished(self.result(
                    notification,
                    None,
                    Some(DeliveryFailure::RateLimited { user_id }),
                    attempts,
                ));
            }
            Err(source) => {
                return Outcome::Faulted(PoolError::RateLimiter {
                    user_id: notification.user_id,
                    source,
                });
            }
        }

        let selected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Outcome::Abandoned,
            selected = self.registry.select() => selected,
        };
        let provider = match selected {
            Ok(provider) => provider,
            Err(e) => return Outcome::Faulted(PoolError::NoProvidersAvailable(e)),
        };

        self.deliver(notification, provider).await
    }

    async fn deliver(
        &self,
        notification: NotificationMessage,
        provider: Arc<dyn Provider>,
    ) -> Outcome {
        let max_attempts = self.config.retry_attempts + 1;
        let mut last_error: Option<ProviderError> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.config.retry_delay * (attempt - 1);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Outcome::Abandoned,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let call = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Outcome::Abandoned,
                call = tokio::time::timeout(self.config.provider_timeout, provider.send(&notification)) => call,
            };

            let response = call
                .unwrap_or_else(|_| Err(ProviderError::Timeout(self.config.provider_timeout)));

            match response {
                Ok(response) if response.success => {
                    self.metrics.lock().processed += 1;
                    tracing::info!(
                        worker_id = self.id,
                        notification_id = %notification.id,
                        user_id = %notification.user_id,
                        provider = provider.name(),
                        attempt,
                        message_id = response.message_id.as_deref().unwrap_or_default(),
                        "Notification delivered"
                    );
                    let name = provider.name().to_string();
                    return Outcome::Finished(self.result(notification, Some(name), None, attempt));
                }
                Ok(response) => {
                    self.metrics.lock().failed += 1;
                    let reason = response
                        .error
                        .unwrap_or_else(|| "unknown provider error".to_string());
                    tracing::warn!(
                        worker_id = self.id,
                        notification_id = %notification.id,
                        provider = provider.name(),
                        reason = %reason,
                        "Provider rejected notification"
                    );
                    let name = provider.name().to_string();
                    return Outcome::Finished(self.result(
                        notification,
                        Some(name),
                        Some(DeliveryFailure::Rejected { reason }),
                        attempt,
                    ));
                }
                Err(e) => {
                    tracing::warn!(
                        worker_id = self.id,
                        notification_id = %notification.id,
                        provider = provider.name(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Delivery attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        self.metrics.lock().failed += 1;
        let last_error = last_error.map(|e| e.to_string()).unwrap_or_default();
        tracing::error!(
            worker_id = self.id,
            notification_id = %notification.id,
            attempts = max_attempts,
            last_error = %last_error,
            "Delivery attempts exhausted"
        );
        let name = provider.name().to_string();
        Outcome::Finished(self.result(
            notification,
            Some(name),
            Some(DeliveryFailure::Exhausted {
                attempts: max_attempts,
                last_error,
            }),
            max_attempts,
        ))
    }

    fn result(
        &self,
        notification: NotificationMessage,
        provider: Option<String>,
        error: Option<DeliveryFailure>,
        attempts: u32,
    ) -> ProcessingResult {
        ProcessingResult {
            success: error.is_none(),
            message_id: notification.id,
            user_id: notification.user_id,
            provider,
            error,
            processed_at: Utc::now(),
            attempts,
        }
    }

    fn emit_result(&self, result: ProcessingResult) {
        if let Err(e) = self.results.try_send(result) {
            tracing::warn!(worker_id = self.id, error = %e, "Result sink full, dropping result");
        }
    }

    fn emit_error(&self, error: PoolError) {
        if let Err(e) = self.errors.try_send(error) {
            tracing::warn!(worker_id = self.id, error = %e, "Error sink full, dropping error");
        }
    }
}
