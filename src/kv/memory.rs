use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::AppResult;

use super::KvStore;

/// In-memory fake of the KV store contract, used by unit and integration
/// tests so the Registry, Quota Gate and Dispatcher can be exercised
/// without a live Redis instance. TTLs are tracked but not evicted — tests
/// assert on value/membership, not on expiry timing.
#[derive(Default)]
pub struct InMemoryKvStore {
    strings: Mutex<HashMap<String, String>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
    sorted_sets: Mutex<HashMap<String, BTreeMap<(i64, String), ()>>>,
    counters: Mutex<HashMap<String, i64>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn score_key(score: f64) -> i64 {
    // Sortable fixed-point representation; sufficient precision for
    // millisecond event-time scores used throughout this crate.
    (score * 1000.0).round() as i64
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.strings.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl: Option<Duration>) -> AppResult<()> {
        self.strings
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        self.strings.lock().unwrap().remove(key);
        self.counters.lock().unwrap().remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> AppResult<()> {
        self.sets
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> AppResult<()> {
        if let Some(set) = self.sets.lock().unwrap().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> AppResult<HashSet<String>> {
        Ok(self.sets.lock().unwrap().get(key).cloned().unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> AppResult<usize> {
        Ok(self.sets.lock().unwrap().get(key).map(|s| s.len()).unwrap_or(0))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> AppResult<()> {
        let mut sorted = self.sorted_sets.lock().unwrap();
        let zset = sorted.entry(key.to_string()).or_default();
        zset.retain(|(_, m), _| m != member);
        zset.insert((score_key(score), member.to_string()), ());
        Ok(())
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>> {
        let sorted = self.sorted_sets.lock().unwrap();
        let Some(zset) = sorted.get(key) else {
            return Ok(vec![]);
        };
        let members: Vec<String> = zset.keys().rev().map(|(_, m)| m.clone()).collect();
        Ok(slice_inclusive(&members, start, stop))
    }

    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> AppResult<()> {
        let mut sorted = self.sorted_sets.lock().unwrap();
        let Some(zset) = sorted.get_mut(key) else {
            return Ok(());
        };
        let ascending: Vec<(i64, String)> = zset.keys().cloned().collect();
        let to_remove = slice_inclusive(&ascending, start, stop);
        for k in to_remove {
            zset.remove(&k);
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> AppResult<usize> {
        Ok(self.sorted_sets.lock().unwrap().get(key).map(|z| z.len()).unwrap_or(0))
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> AppResult<()> {
        Ok(())
    }

    async fn incr_with_expire(&self, key: &str, _ttl: Duration) -> AppResult<i64> {
        let mut counters = self.counters.lock().unwrap();
        let value = counters.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn decr(&self, key: &str) -> AppResult<i64> {
        let mut counters = self.counters.lock().unwrap();
        let value = counters.entry(key.to_string()).or_insert(0);
        *value -= 1;
        Ok(*value)
    }
}

fn slice_inclusive<T: Clone>(items: &[T], start: isize, stop: isize) -> Vec<T> {
    let len = items.len() as isize;
    if len == 0 {
        return vec![];
    }
    let norm = |i: isize| -> isize {
        if i < 0 {
            (len + i).max(0)
        } else {
            i.min(len - 1).max(0)
        }
    };
    let start = norm(start);
    let stop = norm(stop);
    if start > stop || start >= len {
        return vec![];
    }
    items[start as usize..=(stop as usize).min(items.len() - 1)].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sets_are_idempotent() {
        let kv = InMemoryKvStore::new();
        kv.sadd("k", "a").await.unwrap();
        kv.sadd("k", "a").await.unwrap();
        assert_eq!(kv.scard("k").await.unwrap(), 1);
        kv.srem("k", "a").await.unwrap();
        assert_eq!(kv.scard("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn incr_then_decr_restores_value() {
        let kv = InMemoryKvStore::new();
        let v1 = kv.incr_with_expire("c", Duration::from_secs(1)).await.unwrap();
        assert_eq!(v1, 1);
        let v2 = kv.decr("c").await.unwrap();
        assert_eq!(v2, 0);
    }

    #[tokio::test]
    async fn zrevrange_orders_by_score_descending() {
        let kv = InMemoryKvStore::new();
        kv.zadd("z", "old", 1.0).await.unwrap();
        kv.zadd("z", "new", 2.0).await.unwrap();
        let top = kv.zrevrange("z", 0, -1).await.unwrap();
        assert_eq!(top, vec!["new".to_string(), "old".to_string()]);
    }

    #[tokio::test]
    async fn zremrangebyrank_trims_oldest() {
        let kv = InMemoryKvStore::new();
        for i in 0..5 {
            kv.zadd("z", &format!("m{i}"), i as f64).await.unwrap();
        }
        // Keep only the 3 highest scores: remove ranks 0..=1 (ascending).
        kv.zremrangebyrank("z", 0, 1).await.unwrap();
        assert_eq!(kv.zcard("z").await.unwrap(), 3);
    }
}
