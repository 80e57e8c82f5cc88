//! KV store contract: string GET/SET with TTL, sets SADD/SREM/SMEMBERS/
//! SCARD, sorted sets ZADD/ZREVRANGE/ZREMRANGEBYRANK, MULTI/INCR. The store
//! process itself is external; this module is the typed client every
//! subsystem shares — owned by the KV client instance, with all subsystems
//! sharing it.
//!
//! Abstracted behind a trait so the Registry, Quota Gate and Dispatcher can
//! be exercised against an in-memory fake without a live Redis instance.

mod memory;
mod redis_store;

pub use memory::InMemoryKvStore;
pub use redis_store::RedisKvStore;

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::AppResult;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()>;
    async fn del(&self, key: &str) -> AppResult<()>;

    async fn sadd(&self, key: &str, member: &str) -> AppResult<()>;
    async fn srem(&self, key: &str, member: &str) -> AppResult<()>;
    async fn smembers(&self, key: &str) -> AppResult<HashSet<String>>;
    async fn scard(&self, key: &str) -> AppResult<usize>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> AppResult<()>;
    /// Highest-score-first range, inclusive indices (mirrors ZREVRANGE).
    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>>;
    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> AppResult<()>;
    async fn zcard(&self, key: &str) -> AppResult<usize>;

    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()>;

    /// Atomically increments `key` by 1, refreshes its TTL, and returns the
    /// new value. Used by the Quota Gate's increment-then-validate sequence —
    /// never a separate GET followed by a separate SET.
    async fn incr_with_expire(&self, key: &str, ttl: Duration) -> AppResult<i64>;

    /// Decrements `key` by 1 (the Quota Gate's rollback on over-limit).
    async fn decr(&self, key: &str) -> AppResult<i64>;
}
