//! Queue → pool bridge, plus loggers for the pool's sinks.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use herald_common::error::{PoolError, QueueError};
use herald_common::types::{NotificationMessage, ProcessingResult};
use herald_queue::Consumer;

use crate::pool::WorkerPool;

/// Counters for one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub submitted: u64,
    /// Undecodable payloads and notifications refused by a full pool.
    pub dropped: u64,
}

/// Pulls notifications off a topic and hands them to the worker pool.
pub struct Dispatcher {
    consumer: Consumer,
    pool: Arc<WorkerPool>,
}

impl Dispatcher {
    pub fn new(consumer: Consumer, pool: Arc<WorkerPool>) -> Self {
        Self { consumer, pool }
    }

    /// Run until `shutdown` fires, the consumer is closed, or the pool stops.
    pub async fn run(self, shutdown: CancellationToken) -> DispatchStats {
        let mut stats = DispatchStats::default();

        tracing::info!(
            topic = self.consumer.topic(),
            group_id = self.consumer.group_id(),
            "Dispatcher started"
        );

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.consumer.receive() => received,
            };

            let message = match received {
                Ok(message) => message,
                Err(QueueError::Timeout(_)) => continue,
                Err(QueueError::Closed) => {
                    tracing::info!("Consumer closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to receive message");
                    continue;
                }
            };
            stats.received += 1;

            let decoded = message.decode::<NotificationMessage>();
            if let Err(e) = self.consumer.commit(&message) {
                tracing::warn!(offset = message.offset, error = %e, "Failed to commit message");
            }

            let notification = match decoded {
                Ok(notification) => notification,
                Err(e) => {
                    tracing::warn!(
                        key = %message.key,
                        offset = message.offset,
                        error = %e,
                        "Dropping undecodable message"
                    );
                    stats.dropped += 1;
                    continue;
                }
            };

            let notification_id = notification.id.clone();
            match self.pool.submit(notification) {
                Ok(()) => {
                    stats.submitted += 1;
                    tracing::debug!(notification_id = %notification_id, "Notification submitted");
                }
                Err(PoolError::QueueFull) => {
                    stats.dropped += 1;
                    tracing::warn!(
                        notification_id = %notification_id,
                        "Worker pool queue full, dropping notification"
                    );
                }
                Err(PoolError::Stopped) => {
                    tracing::info!("Worker pool stopped, dispatcher exiting");
                    break;
                }
                Err(e) => {
                    stats.dropped += 1;
                    tracing::warn!(notification_id = %notification_id, error = %e, "Failed to submit notification");
                }
            }
        }

        tracing::info!(
            received = stats.received,
            submitted = stats.submitted,
            dropped = stats.dropped,
            "Dispatcher stopped"
        );
        stats
    }
}

/// Log every terminal result until the pool closes its result sink.
pub async fn log_results(mut results: mpsc::Receiver<ProcessingResult>) {
    while let Some(result) = results.recv().await {
        if result.success {
            tracing::info!(
                notification_id = %result.message_id,
                user_id = %result.user_id,
                provider = result.provider.as_deref().unwrap_or_default(),
                attempts = result.attempts,
                "Notification processed"
            );
        } else {
            let reason = result
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            tracing::warn!(
                notification_id = %result.message_id,
                user_id = %result.user_id,
                attempts = result.attempts,
                reason = %reason,
                "Notification failed"
            );
        }
    }
}

/// Log every pool error until the pool closes its error sink.
pub async fn log_errors(mut errors: mpsc::Receiver<PoolError>) {
    while let Some(error) = errors.recv().await {
        tracing::error!(error = %error, "Worker pool error");
    }
}
