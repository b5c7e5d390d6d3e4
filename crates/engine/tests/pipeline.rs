//! End-to-end behaviour of the worker pool and dispatcher, using scripted
//! providers and the in-memory counter store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use herald_common::error::{DeliveryFailure, PoolError, ProviderError};
use herald_common::types::{
    NotificationMessage, ProcessingResult, ProviderResponse, SelectionStrategy, WindowPolicy,
};
use herald_engine::{Dispatcher, PoolConfig, PoolSinks, RateLimiter, WorkerPool};
use herald_notifier::{MockProvider, Provider, ProviderRegistry};
use herald_queue::TopicRegistry;

// ============================================================
// Shared helpers
// ============================================================

#[derive(Clone, Copy)]
enum Behaviour {
    Deliver,
    Reject(&'static str),
    TransportError,
    Hang,
}

struct ScriptedProvider {
    name: &'static str,
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    fn new(name: &'static str, behaviour: Behaviour) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Self {
            name,
            behaviour,
            calls: calls.clone(),
        };
        (provider, calls)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn send(
        &self,
        notification: &NotificationMessage,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Deliver => Ok(ProviderResponse::delivered(format!(
                "{}_{}",
                self.name, notification.id
            ))),
            Behaviour::Reject(reason) => Ok(ProviderResponse::rejected(reason)),
            Behaviour::TransportError => {
                Err(ProviderError::Transport("connection reset".to_string()))
            }
            Behaviour::Hang => std::future::pending().await,
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Delegates sends but never finishes a health check.
struct StalledHealth(ScriptedProvider);

#[async_trait]
impl Provider for StalledHealth {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn send(
        &self,
        notification: &NotificationMessage,
    ) -> Result<ProviderResponse, ProviderError> {
        self.0.send(notification).await
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        std::future::pending().await
    }
}

fn fast_config() -> PoolConfig {
    PoolConfig {
        workers: 2,
        max_queue_size: 16,
        retry_attempts: 3,
        retry_delay: Duration::from_millis(5),
        provider_timeout: Duration::from_secs(2),
    }
}

fn limiter(limit: u64) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::in_memory(
        limit,
        Duration::from_secs(60),
        WindowPolicy::Idle,
    ))
}

fn pool_with(
    config: PoolConfig,
    limiter: Arc<RateLimiter>,
    provider: impl Provider + 'static,
) -> (WorkerPool, PoolSinks, CancellationToken) {
    let registry = ProviderRegistry::new(SelectionStrategy::RoundRobin).with_provider(provider);
    let (pool, sinks) = WorkerPool::new(config, limiter, Arc::new(registry));
    let shutdown = CancellationToken::new();
    pool.start(&shutdown);
    (pool, sinks, shutdown)
}

async fn next_result(results: &mut mpsc::Receiver<ProcessingResult>) -> ProcessingResult {
    tokio::time::timeout(Duration::from_secs(5), results.recv())
        .await
        .expect("timed out waiting for a result")
        .expect("result sink closed")
}

async fn wait_for_calls(calls: &AtomicUsize, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while calls.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("provider was not called in time");
}

// ============================================================
// Worker pool
// ============================================================

#[tokio::test]
async fn test_successful_delivery_produces_single_attempt_result() {
    let (provider, calls) = ScriptedProvider::new("firebase", Behaviour::Deliver);
    let (pool, mut sinks, _shutdown) = pool_with(fast_config(), limiter(10), provider);

    let notification = NotificationMessage::new("user-1", "Hello", "World");
    let id = notification.id.clone();
    pool.submit(notification).unwrap();

    let result = next_result(&mut sinks.results).await;
    assert!(result.success);
    assert_eq!(result.message_id, id);
    assert_eq!(result.user_id, "user-1");
    assert_eq!(result.provider.as_deref(), Some("firebase"));
    assert_eq!(result.attempts, 1);
    assert!(result.error.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    pool.stop().await;
    assert_eq!(pool.metrics().processed, 1);
    assert_eq!(pool.metrics().failed, 0);
}

#[tokio::test]
async fn test_expired_notification_is_never_sent() {
    let (provider, calls) = ScriptedProvider::new("firebase", Behaviour::Deliver);
    let (pool, mut sinks, _shutdown) = pool_with(fast_config(), limiter(10), provider);

    let notification = NotificationMessage::new("user-1", "Stale", "Too late")
        .with_expiry(Utc::now() - chrono::Duration::seconds(1));
    let id = notification.id.clone();
    pool.submit(notification).unwrap();

    let error = tokio::time::timeout(Duration::from_secs(5), sinks.errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(error, PoolError::Expired { id: ref expired } if *expired == id));

    pool.stop().await;
    assert!(sinks.results.recv().await.is_none());
    assert!(sinks.errors.recv().await.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_transport_errors_are_retried_until_budget_is_spent() {
    let (provider, calls) = ScriptedProvider::new("apns", Behaviour::TransportError);
    let config = PoolConfig {
        retry_attempts: 2,
        ..fast_config()
    };
    let (pool, mut sinks, _shutdown) = pool_with(config, limiter(10), provider);

    pool.submit(NotificationMessage::new("user-1", "t", "b")).unwrap();

    let result = next_result(&mut sinks.results).await;
    assert!(!result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match result.error {
        Some(DeliveryFailure::Exhausted {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("connection reset"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    pool.stop().await;
    assert_eq!(pool.metrics().failed, 1);
}

#[tokio::test]
async fn test_backoff_grows_linearly() {
    let (provider, _calls) = ScriptedProvider::new("apns", Behaviour::TransportError);
    let config = PoolConfig {
        workers: 1,
        retry_attempts: 3,
        retry_delay: Duration::from_millis(40),
        ..fast_config()
    };
    let (pool, mut sinks, _shutdown) = pool_with(config, limiter(10), provider);

    let started = tokio::time::Instant::now();
    pool.submit(NotificationMessage::new("user-1", "t", "b")).unwrap();
    next_result(&mut sinks.results).await;

    // 0 + 40 + 80 + 120
    assert!(started.elapsed() >= Duration::from_millis(240));
    pool.stop().await;
}

#[tokio::test]
async fn test_provider_timeout_counts_as_transport_error() {
    let (provider, calls) = ScriptedProvider::new("slow", Behaviour::Hang);
    let config = PoolConfig {
        retry_attempts: 1,
        provider_timeout: Duration::from_millis(30),
        ..fast_config()
    };
    let (pool, mut sinks, _shutdown) = pool_with(config, limiter(10), provider);

    pool.submit(NotificationMessage::new("user-1", "t", "b")).unwrap();

    let result = next_result(&mut sinks.results).await;
    assert_eq!(result.attempts, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(matches!(
        result.error,
        Some(DeliveryFailure::Exhausted { ref last_error, .. }) if last_error.contains("timed out")
    ));
    pool.stop().await;
}

#[tokio::test]
async fn test_logical_rejection_is_not_retried() {
    let (provider, calls) = ScriptedProvider::new("fcm", Behaviour::Reject("invalid token"));
    let (pool, mut sinks, _shutdown) = pool_with(fast_config(), limiter(10), provider);

    pool.submit(NotificationMessage::new("user-1", "t", "b")).unwrap();

    let result = next_result(&mut sinks.results).await;
    assert!(!result.success);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.provider.as_deref(), Some("fcm"));
    assert_eq!(
        result.error,
        Some(DeliveryFailure::Rejected {
            reason: "invalid token".to_string()
        })
    );

    pool.stop().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pool.metrics().failed, 1);
}

#[tokio::test]
async fn test_eleventh_notification_for_user_is_rate_limited() {
    let (provider, calls) = ScriptedProvider::new("firebase", Behaviour::Deliver);
    let (pool, mut sinks, _shutdown) = pool_with(fast_config(), limiter(10), provider);

    for _ in 0..11 {
        pool.submit(NotificationMessage::new("user123", "t", "b")).unwrap();
    }

    let mut results = Vec::new();
    for _ in 0..11 {
        results.push(next_result(&mut sinks.results).await);
    }

    let delivered = results.iter().filter(|r| r.success).count();
    let limited: Vec<_> = results.iter().filter(|r| r.is_rate_limited()).collect();
    assert_eq!(delivered, 10);
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].attempts, 1);
    assert!(limited[0].provider.is_none());
    assert_eq!(
        limited[0].error,
        Some(DeliveryFailure::RateLimited {
            user_id: "user123".to_string()
        })
    );

    pool.stop().await;
    assert_eq!(calls.load(Ordering::SeqCst), 10);
    let metrics = pool.metrics();
    assert_eq!(metrics.processed, 10);
    assert_eq!(metrics.rate_limited, 1);
}

#[tokio::test]
async fn test_rate_limited_attempts_include_prior_retries() {
    let (provider, _calls) = ScriptedProvider::new("firebase", Behaviour::Deliver);
    let (pool, mut sinks, _shutdown) = pool_with(fast_config(), limiter(0), provider);

    let mut notification = NotificationMessage::new("user-1", "t", "b");
    notification.retry_count = 2;
    pool.submit(notification).unwrap();

    let result = next_result(&mut sinks.results).await;
    assert!(result.is_rate_limited());
    assert_eq!(result.attempts, 3);
    pool.stop().await;
}

#[tokio::test]
async fn test_submit_reports_full_queue_without_blocking() {
    let (provider, calls) = ScriptedProvider::new("busy", Behaviour::Hang);
    let config = PoolConfig {
        workers: 1,
        max_queue_size: 1,
        provider_timeout: Duration::from_secs(60),
        ..fast_config()
    };
    let (pool, _sinks, _shutdown) = pool_with(config, limiter(10), provider);

    pool.submit(NotificationMessage::new("u", "t", "b")).unwrap();
    wait_for_calls(&calls, 1).await;

    pool.submit(NotificationMessage::new("u", "t", "b")).unwrap();
    assert!(matches!(
        pool.submit(NotificationMessage::new("u", "t", "b")),
        Err(PoolError::QueueFull)
    ));
    assert_eq!(pool.queue_len(), 1);

    tokio::time::timeout(Duration::from_secs(2), pool.stop())
        .await
        .expect("stop should cancel the hung provider call");
}

#[tokio::test]
async fn test_stop_during_backoff_abandons_notification() {
    let (provider, calls) = ScriptedProvider::new("apns", Behaviour::TransportError);
    let config = PoolConfig {
        workers: 1,
        retry_delay: Duration::from_secs(30),
        ..fast_config()
    };
    let (pool, mut sinks, _shutdown) = pool_with(config, limiter(10), provider);

    pool.submit(NotificationMessage::new("user-1", "t", "b")).unwrap();
    wait_for_calls(&calls, 1).await;

    tokio::time::timeout(Duration::from_secs(2), pool.stop())
        .await
        .expect("stop should interrupt the backoff");

    assert!(sinks.results.recv().await.is_none());
    assert!(sinks.errors.recv().await.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pool.metrics().failed, 0);
}

#[tokio::test]
async fn test_caller_shutdown_token_stops_workers() {
    let (provider, _calls) = ScriptedProvider::new("firebase", Behaviour::Deliver);
    let (pool, mut sinks, shutdown) = pool_with(fast_config(), limiter(10), provider);

    shutdown.cancel();
    let closed = tokio::time::timeout(Duration::from_secs(5), sinks.results.recv())
        .await
        .expect("workers kept running after shutdown");
    assert!(closed.is_none());

    assert!(pool.is_stopped());
    assert!(matches!(pool.health_check().await, Err(PoolError::Stopped)));
    assert!(matches!(
        pool.submit(NotificationMessage::new("u", "t", "b")),
        Err(PoolError::Stopped)
    ));
    pool.stop().await;
}

#[tokio::test]
async fn test_stop_interrupts_stalled_provider_selection() {
    let (provider, calls) = ScriptedProvider::new("stalled", Behaviour::Deliver);
    let registry = ProviderRegistry::new(SelectionStrategy::HealthBased)
        .with_provider(StalledHealth(provider));
    let config = PoolConfig {
        workers: 1,
        ..fast_config()
    };
    let (pool, mut sinks) = WorkerPool::new(config, limiter(10), Arc::new(registry));
    pool.start(&CancellationToken::new());

    pool.submit(NotificationMessage::new("user-1", "t", "b")).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while pool.queue_len() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker never picked up the job");

    tokio::time::timeout(Duration::from_secs(2), pool.stop())
        .await
        .expect("stop hung on provider selection");
    assert!(sinks.results.recv().await.is_none());
    assert!(sinks.errors.recv().await.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_full_result_sink_drops_results_without_blocking_workers() {
    let (provider, calls) = ScriptedProvider::new("firebase", Behaviour::Deliver);
    let config = PoolConfig {
        workers: 2,
        max_queue_size: 1,
        ..fast_config()
    };
    let (pool, mut sinks, _shutdown) = pool_with(config, limiter(100), provider);

    for i in 0..5 {
        let notification = NotificationMessage::new(format!("user-{i}"), "t", "b");
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Err(PoolError::QueueFull) = pool.submit(notification.clone()) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("job buffer never drained");
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while pool.metrics().processed < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("workers stalled on a full result sink");
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    tokio::time::timeout(Duration::from_secs(2), pool.stop())
        .await
        .expect("stop blocked on a full result sink");
    assert!(sinks.results.recv().await.is_some());
    assert!(sinks.results.recv().await.is_none());
}

#[tokio::test]
async fn test_stop_leaves_caller_token_untouched() {
    let (provider, _calls) = ScriptedProvider::new("firebase", Behaviour::Deliver);
    let (pool, _sinks, shutdown) = pool_with(fast_config(), limiter(10), provider);

    pool.stop().await;
    assert!(!shutdown.is_cancelled());
    assert!(matches!(
        pool.submit(NotificationMessage::new("u", "t", "b")),
        Err(PoolError::Stopped)
    ));
}

#[tokio::test]
async fn test_empty_registry_reports_missing_provider() {
    let (pool, mut sinks) = WorkerPool::new(
        fast_config(),
        limiter(10),
        Arc::new(ProviderRegistry::new(SelectionStrategy::Random)),
    );
    pool.start(&CancellationToken::new());

    pool.submit(NotificationMessage::new("u", "t", "b")).unwrap();
    let error = tokio::time::timeout(Duration::from_secs(5), sinks.errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        error,
        PoolError::NoProvidersAvailable(ProviderError::NoProvidersAvailable)
    ));
    pool.stop().await;
}

#[tokio::test]
async fn test_health_check() {
    let down = MockProvider::new("down", 1.0, Duration::ZERO, Duration::ZERO)
        .with_health_latency(Duration::ZERO)
        .with_health_failure_rate(0.0);
    down.set_healthy(false);
    let registry = Arc::new(ProviderRegistry::new(SelectionStrategy::HealthBased).with_provider(down));
    let (pool, _sinks) = WorkerPool::new(fast_config(), limiter(10), registry.clone());

    assert!(matches!(
        pool.health_check().await,
        Err(PoolError::NoHealthyProviders)
    ));

    let (healthy, _calls) = ScriptedProvider::new("up", Behaviour::Deliver);
    let registry = Arc::new(ProviderRegistry::new(SelectionStrategy::Random).with_provider(healthy));
    let (pool, _sinks) = WorkerPool::new(fast_config(), limiter(10), registry);
    assert!(pool.health_check().await.is_ok());

    pool.stop().await;
    assert!(matches!(pool.health_check().await, Err(PoolError::Stopped)));
}

// ============================================================
// Dispatcher
// ============================================================

#[tokio::test]
async fn test_dispatcher_feeds_queue_into_pool() {
    let topics = TopicRegistry::new(64).with_poll_timeout(Duration::from_millis(20));
    let producer = topics.producer("notifications");
    let consumer = topics.consumer("notifications", "notification-service");

    let (provider, calls) = ScriptedProvider::new("firebase", Behaviour::Deliver);
    let (pool, mut sinks, shutdown) = pool_with(fast_config(), limiter(10), provider);
    let pool = Arc::new(pool);

    let dispatcher = tokio::spawn(Dispatcher::new(consumer, pool.clone()).run(shutdown.clone()));

    let mut ids = Vec::new();
    for i in 0..3 {
        let notification = NotificationMessage::new("user-7", format!("title {i}"), "body");
        ids.push(notification.id.clone());
        producer.send(&notification.user_id, &notification).await.unwrap();
    }
    producer.send_raw("user-7", b"not json".to_vec()).await.unwrap();

    let mut delivered = Vec::new();
    for _ in 0..3 {
        delivered.push(next_result(&mut sinks.results).await.message_id);
    }
    delivered.sort();
    ids.sort();
    assert_eq!(delivered, ids);

    wait_for_calls(&calls, 3).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while topics.stats("notifications").is_some_and(|s| s.len > 0) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    shutdown.cancel();
    let stats = dispatcher.await.unwrap();
    assert_eq!(stats.received, 4);
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.dropped, 1);

    pool.stop().await;
}

#[tokio::test]
async fn test_dispatcher_exits_when_consumer_closes() {
    let topics = TopicRegistry::new(4).with_poll_timeout(Duration::from_millis(20));
    let consumer = topics.consumer("notifications", "g");

    let (provider, _calls) = ScriptedProvider::new("firebase", Behaviour::Deliver);
    let (pool, _sinks, _shutdown) = pool_with(fast_config(), limiter(10), provider);
    let pool = Arc::new(pool);

    consumer.close();
    let stats = tokio::time::timeout(
        Duration::from_secs(2),
        Dispatcher::new(consumer, pool.clone()).run(CancellationToken::new()),
    )
    .await
    .unwrap();
    assert_eq!(stats.received, 0);
    pool.stop().await;
}
