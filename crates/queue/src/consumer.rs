use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use herald_common::error::QueueError;
use herald_common::types::QueueMessage;

use crate::registry::TopicQueue;

/// Read handle for one topic.
///
/// Several consumers of the same topic compete for messages; each message is
/// handed to exactly one of them.
#[derive(Clone)]
pub struct Consumer {
    queue: Arc<TopicQueue>,
    group_id: String,
    closed: CancellationToken,
    poll_timeout: Duration,
}

impl Consumer {
    pub(crate) fn new(queue: Arc<TopicQueue>, group_id: &str, poll_timeout: Duration) -> Self {
        Self {
            queue,
            group_id: group_id.to_string(),
            closed: CancellationToken::new(),
            poll_timeout,
        }
    }

    pub fn topic(&self) -> &str {
        &self.queue.name
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Wait up to the poll timeout for the next message.
    ///
    /// `Timeout` is the normal "nothing yet" answer; callers use it to check
    /// for shutdown and then poll again.
    pub async fn receive(&self) -> Result<QueueMessage, QueueError> {
        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }

        let next = async {
            let mut receiver = self.queue.receiver.lock().await;
            receiver.recv().await
        };

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(QueueError::Closed),
            received = tokio::time::timeout(self.poll_timeout, next) => match received {
                Ok(Some(message)) => Ok(message),
                Ok(None) => Err(QueueError::Closed),
                Err(_) => Err(QueueError::Timeout(self.poll_timeout)),
            },
        }
    }

    /// Acknowledge a message.
    ///
    /// Buffers keep no offset log, so this only records the acknowledgment.
    pub fn commit(&self, message: &QueueMessage) -> Result<(), QueueError> {
        tracing::debug!(
            topic = %message.topic,
            offset = message.offset,
            partition = message.partition,
            group_id = %self.group_id,
            "Message committed"
        );
        Ok(())
    }

    /// Close the consumer. Pending and future receives fail with `Closed`.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            tracing::info!(topic = %self.queue.name, group_id = %self.group_id, "Queue consumer closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
