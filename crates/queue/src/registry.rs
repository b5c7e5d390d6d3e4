use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use herald_common::error::QueueError;
use herald_common::types::QueueMessage;

use crate::consumer::Consumer;
use crate::producer::Producer;

/// Default number of messages a topic buffer holds.
pub const DEFAULT_TOPIC_CAPACITY: usize = 10_000;

/// Default time a producer waits for buffer space.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a consumer waits for a message before reporting a timeout.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// One bounded buffer shared by every producer and consumer of a topic.
pub(crate) struct TopicQueue {
    pub(crate) name: String,
    pub(crate) sender: mpsc::Sender<QueueMessage>,
    pub(crate) receiver: tokio::sync::Mutex<mpsc::Receiver<QueueMessage>>,
    /// Next offset to hand out; held while a message is pushed so offsets
    /// are dense and match buffer order.
    next_offset: Mutex<i64>,
    capacity: usize,
}

impl TopicQueue {
    fn new(name: &str, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            name: name.to_string(),
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            next_offset: Mutex::new(0),
            capacity,
        }
    }

    /// Stamp the message with the next offset and push it into a reserved slot.
    pub(crate) fn push(
        &self,
        permit: mpsc::Permit<'_, QueueMessage>,
        key: &str,
        value: Vec<u8>,
    ) -> i64 {
        let mut next_offset = self.next_offset.lock();
        let offset = *next_offset;
        *next_offset += 1;
        permit.send(QueueMessage {
            key: key.to_string(),
            value,
            timestamp: Utc::now(),
            topic: self.name.clone(),
            partition: 0,
            offset,
        });
        offset
    }

    fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }
}

/// Buffer occupancy for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
}

/// Owner of every topic buffer.
///
/// Topics are created lazily on first use and live as long as the registry.
/// Independent registries never share buffers.
pub struct TopicRegistry {
    queues: Mutex<HashMap<String, Arc<TopicQueue>>>,
    capacity: usize,
    send_timeout: Duration,
    poll_timeout: Duration,
}

impl TopicRegistry {
    /// Create a registry whose topics hold at most `capacity` messages each.
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    fn get_or_create(&self, topic: &str) -> Arc<TopicQueue> {
        let mut queues = self.queues.lock();
        queues
            .entry(topic.to_string())
            .or_insert_with(|| {
                tracing::debug!(topic, capacity = self.capacity, "Created topic buffer");
                Arc::new(TopicQueue::new(topic, self.capacity))
            })
            .clone()
    }

    /// Open a producer for `topic`.
    pub fn producer(&self, topic: &str) -> Producer {
        let producer = Producer::new(self.get_or_create(topic), self.send_timeout);
        tracing::info!(topic, "Queue producer initialized");
        producer
    }

    /// Open a consumer for `topic`. `group_id` is recorded for logging only.
    pub fn consumer(&self, topic: &str, group_id: &str) -> Consumer {
        let consumer = Consumer::new(self.get_or_create(topic), group_id, self.poll_timeout);
        tracing::info!(topic, group_id, "Queue consumer initialized");
        consumer
    }

    /// Serialize `value` and enqueue it on `topic` with the registry's send timeout.
    pub async fn send<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<i64, QueueError> {
        Producer::new(self.get_or_create(topic), self.send_timeout)
            .send(key, value)
            .await
    }

    /// Occupancy of `topic`, or `None` if it has never been used.
    pub fn stats(&self, topic: &str) -> Option<QueueStats> {
        self.queues.lock().get(topic).map(|queue| QueueStats {
            len: queue.len(),
            capacity: queue.capacity,
        })
    }

    /// Names of every topic created so far.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}
