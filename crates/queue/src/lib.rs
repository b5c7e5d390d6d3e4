//! In-memory, topic-keyed message queue.
//!
//! Each topic is one bounded multi-producer/multi-consumer buffer held by a
//! [`TopicRegistry`]. Producers block (with a timeout) when the buffer is full;
//! consumers poll with a short timeout so callers can check for shutdown
//! between reads. There is no persistence and no consumer-group fan-out.

pub mod consumer;
pub mod producer;
pub mod registry;

pub use consumer::Consumer;
pub use producer::Producer;
pub use registry::{QueueStats, TopicRegistry};
