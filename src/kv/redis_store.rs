use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::AppResult;

use super::KvStore;

/// Redis-backed implementation of the KV store contract. Grounded on the
/// `redis` crate's async `ConnectionManager`, which auto-reconnects under
/// the hood so a transient disconnect does not require us to rebuild the
/// client — on disconnect, reads return empty and writes log and continue.
#[derive(Clone)]
pub struct RedisKvStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisKvStore {
    pub async fn connect(url: &str, operation_timeout_ms: u64) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_tokio_connection_manager().await?;
        Ok(Self {
            conn,
            op_timeout: Duration::from_millis(operation_timeout_ms),
        })
    }

    /// Every KV suspension point carries the configured deadline; a
    /// connection that never replies must not hang the caller forever.
    async fn with_timeout<F, T>(&self, fut: F) -> AppResult<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        Ok(tokio::time::timeout(self.op_timeout, fut).await??)
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        self.with_timeout(conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) if ttl.as_secs() > 0 => {
                self.with_timeout(conn.set_ex(key, value, ttl.as_secs())).await
            }
            _ => self.with_timeout(conn.set(key, value)).await,
        }
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        self.with_timeout(conn.del(key)).await
    }

    async fn sadd(&self, key: &str, member: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        self.with_timeout(conn.sadd(key, member)).await
    }

    async fn srem(&self, key: &str, member: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        self.with_timeout(conn.srem(key, member)).await
    }

    async fn smembers(&self, key: &str) -> AppResult<HashSet<String>> {
        let mut conn = self.conn.clone();
        self.with_timeout(conn.smembers(key)).await
    }

    async fn scard(&self, key: &str) -> AppResult<usize> {
        let mut conn = self.conn.clone();
        self.with_timeout(conn.scard(key)).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> AppResult<()> {
        let mut conn = self.conn.clone();
        self.with_timeout(conn.zadd(key, member, score)).await
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>> {
        let mut conn = self.conn.clone();
        self.with_timeout(conn.zrevrange(key, start, stop)).await
    }

    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> AppResult<()> {
        let mut conn = self.conn.clone();
        self.with_timeout(conn.zremrangebyrank(key, start, stop)).await
    }

    async fn zcard(&self, key: &str) -> AppResult<usize> {
        let mut conn = self.conn.clone();
        self.with_timeout(conn.zcard(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()> {
        if ttl.as_secs() == 0 {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        self.with_timeout(conn.expire(key, ttl.as_secs() as i64)).await
    }

    async fn incr_with_expire(&self, key: &str, ttl: Duration) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        // MULTI/INCR/EXPIRE as a single pipeline so no other client can
        // observe the incremented value before the TTL is (re)applied.
        if ttl.as_secs() > 0 {
            let mut pipe = redis::pipe();
            pipe.atomic().incr(key, 1).ignore().expire(key, ttl.as_secs() as i64).ignore();
            pipe.incr(key, 0);
            let (value,): (i64,) = self
                .with_timeout(async { pipe.query_async(&mut conn).await })
                .await?;
            Ok(value)
        } else {
            self.with_timeout(conn.incr(key, 1)).await
        }
    }

    async fn decr(&self, key: &str) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        self.with_timeout(conn.decr(key, 1)).await
    }
}
