use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use herald_common::error::QueueError;

use crate::registry::TopicQueue;

/// Write handle for one topic.
///
/// Clones share the same closed flag: closing any clone closes them all.
#[derive(Clone)]
pub struct Producer {
    queue: Arc<TopicQueue>,
    closed: CancellationToken,
    send_timeout: Duration,
}

impl Producer {
    pub(crate) fn new(queue: Arc<TopicQueue>, send_timeout: Duration) -> Self {
        Self {
            queue,
            closed: CancellationToken::new(),
            send_timeout,
        }
    }

    pub fn topic(&self) -> &str {
        &self.queue.name
    }

    /// Serialize `value` as JSON and enqueue it under `key`.
    ///
    /// Waits for buffer space up to the send timeout. Returns the offset
    /// assigned to the message; only accepted messages consume an offset.
    pub async fn send<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<i64, QueueError> {
        let bytes = serde_json::to_vec(value)?;
        self.send_raw(key, bytes).await
    }

    /// Enqueue an already-serialized payload.
    pub async fn send_raw(&self, key: &str, value: Vec<u8>) -> Result<i64, QueueError> {
        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }

        let reserved = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(QueueError::Closed),
            reserved = tokio::time::timeout(self.send_timeout, self.queue.sender.reserve()) => reserved,
        };

        match reserved {
            Ok(Ok(permit)) => {
                let offset = self.queue.push(permit, key, value);
                tracing::debug!(topic = %self.queue.name, key, offset, "Message produced");
                Ok(offset)
            }
            Ok(Err(_)) => Err(QueueError::Closed),
            Err(_) => Err(QueueError::Timeout(self.send_timeout)),
        }
    }

    /// Close the producer. Pending and future sends fail with `Closed`.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            tracing::info!(topic = %self.queue.name, "Queue producer closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
