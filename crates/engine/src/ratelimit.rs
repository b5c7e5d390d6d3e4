//! Per-user rate limiter.
//!
//! Counts notifications per user in a time window. Each user has one counter
//! under `rate_limit:{user_id}`; a call is allowed while the post-increment
//! count is at most `limit`.
//!
//! Counters live in a [`CounterStore`]: Redis in production (an atomic Lua
//! script does the increment and expiry together), or an in-process map for
//! tests and single-node runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::time::Instant;

use herald_common::error::RateLimitError;
use herald_common::types::{RateLimitStatus, WindowPolicy};

const KEY_PREFIX: &str = "rate_limit:";

/// Storage for windowed counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return the new count. The expiry is (re)armed to
    /// `window` when the counter is created, and on every call when
    /// `refresh_expiry` is set.
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        refresh_expiry: bool,
    ) -> Result<u64, RateLimitError>;

    /// Current count, 0 when the key is absent.
    async fn get(&self, key: &str) -> Result<u64, RateLimitError>;

    /// Time until the key expires; `None` when absent or without expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, RateLimitError>;

    async fn delete(&self, key: &str) -> Result<(), RateLimitError>;

    async fn ping(&self) -> Result<(), RateLimitError>;
}

// KEYS[1] = counter, ARGV[1] = window in ms, ARGV[2] = "1" to refresh expiry
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or ARGV[2] == '1' then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Redis-backed counters shared by every service instance.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: redis::Script,
}

impl RedisCounterStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: redis::Script::new(INCREMENT_SCRIPT),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        refresh_expiry: bool,
    ) -> Result<u64, RateLimitError> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis().max(1) as u64;
        let count: i64 = self
            .script
            .key(key)
            .arg(window_ms)
            .arg(if refresh_expiry { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn get(&self, key: &str) -> Result<u64, RateLimitError> {
        let mut conn = self.conn.clone();
        let count: Option<i64> = conn.get(key).await?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, RateLimitError> {
        let mut conn = self.conn.clone();
        // -2 = missing key, -1 = no expiry
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn delete(&self, key: &str) -> Result<(), RateLimitError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), RateLimitError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// In-process counters. Expired entries are dropped lazily on access.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: parking_lot::Mutex<HashMap<String, Counter>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, key: &str) -> Option<Counter> {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        match counters.get(key) {
            Some(counter) if counter.is_live(now) => Some(*counter),
            Some(_) => {
                counters.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        refresh_expiry: bool,
    ) -> Result<u64, RateLimitError> {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: None,
        });
        if !counter.is_live(now) {
            counter.count = 0;
        }

        counter.count += 1;
        if counter.count == 1 || refresh_expiry {
            counter.expires_at = Some(now + window);
        }
        Ok(counter.count)
    }

    async fn get(&self, key: &str) -> Result<u64, RateLimitError> {
        Ok(self.live(key).map(|c| c.count).unwrap_or(0))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, RateLimitError> {
        Ok(self
            .live(key)
            .and_then(|c| c.expires_at)
            .map(|deadline| deadline.saturating_duration_since(Instant::now())))
    }

    async fn delete(&self, key: &str) -> Result<(), RateLimitError> {
        self.counters.lock().remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), RateLimitError> {
        Ok(())
    }
}

/// Windowed per-user limiter over a [`CounterStore`].
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u64,
    window: Duration,
    policy: WindowPolicy,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        limit: u64,
        window: Duration,
        policy: WindowPolicy,
    ) -> Self {
        Self {
            store,
            limit,
            window,
            policy,
        }
    }

    /// Limiter over a fresh [`MemoryCounterStore`].
    pub fn in_memory(limit: u64, window: Duration, policy: WindowPolicy) -> Self {
        Self::new(Arc::new(MemoryCounterStore::new()), limit, window, policy)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    fn key(user_id: &str) -> String {
        format!("{KEY_PREFIX}{user_id}")
    }

    /// Count one notification for `user_id` and report whether it fits in
    /// the current window.
    pub async fn is_allowed(&self, user_id: &str) -> Result<bool, RateLimitError> {
        let refresh = self.policy == WindowPolicy::Idle;
        let count = self
            .store
            .increment(&Self::key(user_id), self.window, refresh)
            .await?;

        let allowed = count <= self.limit;
        if !allowed {
            tracing::debug!(
                user_id = %user_id,
                count,
                limit = self.limit,
                "Rate limit exceeded"
            );
        }
        Ok(allowed)
    }

    pub async fn current_count(&self, user_id: &str) -> Result<u64, RateLimitError> {
        self.store.get(&Self::key(user_id)).await
    }

    pub async fn remaining_count(&self, user_id: &str) -> Result<u64, RateLimitError> {
        let current = self.current_count(user_id).await?;
        Ok(self.limit.saturating_sub(current))
    }

    /// Time until the user's window closes; zero when no window is open.
    pub async fn ttl(&self, user_id: &str) -> Result<Duration, RateLimitError> {
        Ok(self
            .store
            .ttl(&Self::key(user_id))
            .await?
            .unwrap_or(Duration::ZERO))
    }

    pub async fn reset(&self, user_id: &str) -> Result<(), RateLimitError> {
        self.store.delete(&Self::key(user_id)).await?;
        tracing::info!(user_id = %user_id, "Rate limit reset");
        Ok(())
    }

    pub async fn status(&self, user_id: &str) -> Result<RateLimitStatus, RateLimitError> {
        let current = self.current_count(user_id).await?;
        let ttl = self.ttl(user_id).await?;
        Ok(RateLimitStatus {
            user_id: user_id.to_string(),
            limit: self.limit,
            current,
            remaining: self.limit.saturating_sub(current),
            window_seconds: self.window.as_secs(),
            reset_in_seconds: ttl.as_secs_f64().ceil() as u64,
        })
    }

    /// Check the counter store is reachable.
    pub async fn ping(&self) -> Result<(), RateLimitError> {
        self.store.ping().await
    }
}
