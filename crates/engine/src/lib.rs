//! Delivery engine: per-user rate limiting, the worker pool and the
//! dispatcher feeding it from the message queue.

pub mod dispatcher;
pub mod pool;
pub mod ratelimit;

pub use dispatcher::{DispatchStats, Dispatcher};
pub use pool::{PoolConfig, PoolSinks, WorkerPool};
pub use ratelimit::{CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore};
