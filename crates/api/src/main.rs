//! Herald delivery service binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use herald_common::config::AppConfig;
use herald_engine::dispatcher::{log_errors, log_results};
use herald_engine::{Dispatcher, PoolConfig, WorkerPool};
use herald_queue::TopicRegistry;

use herald_api::bootstrap::{build_limiter, build_registry, init_tracing};
use herald_api::routes::create_router;
use herald_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting Herald notification service...");

    // Load configuration
    let config = AppConfig::from_env()?;

    let limiter = Arc::new(build_limiter(&config).await?);
    let registry = Arc::new(build_registry(&config));

    let topics = Arc::new(
        TopicRegistry::new(config.queue_capacity)
            .with_send_timeout(config.queue_send_timeout())
            .with_poll_timeout(config.queue_poll_timeout()),
    );
    let consumer = topics.consumer(&config.queue_topic, &config.queue_consumer_group);

    // Worker pool and its sinks
    let shutdown = CancellationToken::new();
    let (pool, sinks) = WorkerPool::new(PoolConfig::from(&config), limiter.clone(), registry.clone());
    let pool = Arc::new(pool);
    pool.start(&shutdown);

    let results_task = tokio::spawn(log_results(sinks.results));
    let errors_task = tokio::spawn(log_errors(sinks.errors));
    let dispatcher_task =
        tokio::spawn(Dispatcher::new(consumer.clone(), pool.clone()).run(shutdown.clone()));

    let state = AppState::new(
        pool.clone(),
        limiter,
        registry,
        topics,
        config.clone(),
    );
    let producer = state.producer.clone();

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Drain in order: stop ingestion, stop dispatching, stop workers.
    shutdown.cancel();
    producer.close();
    consumer.close();

    let drained = tokio::time::timeout(config.shutdown_timeout(), async {
        if let Err(e) = dispatcher_task.await {
            tracing::error!(error = %e, "Dispatcher task failed");
        }
        pool.stop().await;
        if let Err(e) = results_task.await {
            tracing::error!(error = %e, "Result logger task failed");
        }
        if let Err(e) = errors_task.await {
            tracing::error!(error = %e, "Error logger task failed");
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "Shutdown timed out, exiting anyway"
        );
    }

    let metrics = pool.metrics();
    tracing::info!(
        processed = metrics.processed,
        failed = metrics.failed,
        rate_limited = metrics.rate_limited,
        "Herald stopped"
    );
    Ok(())
}

/// Resolve on Ctrl-C / SIGTERM, or when `shutdown` is cancelled elsewhere.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
        _ = shutdown.cancelled() => {}
    }
}
