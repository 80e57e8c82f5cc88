//! Purchase-Quota Gate: enforces "user U may buy token T at most N
//! times per window" via the KV store's atomic INCR/EXPIRE/DECR primitives.
//! No in-process counter is ever authoritative.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppResult;
use crate::kv::KvStore;
use crate::models::{CanPurchaseResult, IncrementResult, PurchaseCounter};

fn counter_key(config: &Config, user_id: &str, token_mint: &str) -> String {
    config.namespaced(&format!("token_purchases:token_buy_count:{user_id}:{token_mint}"))
}

fn record_key(config: &Config, user_id: &str, token_mint: &str) -> String {
    config.namespaced(&format!(
        "token_purchases:token_purchase_record:{user_id}:{token_mint}"
    ))
}

pub struct QuotaGate {
    kv: Arc<dyn KvStore>,
    config: Arc<Config>,
    ttl: Duration,
}

impl QuotaGate {
    pub fn new(kv: Arc<dyn KvStore>, config: Arc<Config>) -> Self {
        let ttl = Duration::from_secs(config.kv.counter_ttl_seconds);
        Self { kv, config, ttl }
    }

    /// Single-key read, never mutates. Fail-open on store unavailability:
    /// a KV error is swallowed and reported as purchasable with current=0,
    /// since a gate outage must never block trading.
    pub async fn can_purchase(&self, user_id: &str, token_mint: &str, max_count: u32) -> CanPurchaseResult {
        let key = counter_key(&self.config, user_id, token_mint);
        let current = match self.kv.get(&key).await {
            Ok(Some(raw)) => raw.parse::<u32>().unwrap_or(0),
            _ => 0,
        };
        CanPurchaseResult {
            can_purchase: current < max_count,
            current,
            max: max_count,
            remaining: max_count.saturating_sub(current),
        }
    }

    /// Atomic increment-then-validate. This is the authoritative gate:
    /// `canPurchase` is advisory and may race, but this sequence always
    /// rolls back an over-limit increment before returning.
    ///
    /// Fail-closed on store unavailability: a KV error at any step is
    /// logged and reported as `success: false` rather than propagated —
    /// callers must never see a raw store error out of this interface.
    pub async fn increment_and_validate(
        &self,
        user_id: &str,
        token_mint: &str,
        max_count: u32,
        subscription_id: Uuid,
    ) -> AppResult<IncrementResult> {
        let key = counter_key(&self.config, user_id, token_mint);

        let new_count = match self.kv.incr_with_expire(&key, self.ttl).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(user_id, token_mint, error = %err, "quota store increment failed, failing closed");
                return Ok(IncrementResult {
                    success: false,
                    new_count: 0,
                    was_at_limit: false,
                });
            }
        };

        if new_count as u32 > max_count {
            let rolled_back = match self.kv.decr(&key).await {
                Ok(v) => v.max(0) as u32,
                Err(err) => {
                    tracing::warn!(user_id, token_mint, error = %err, "quota rollback decrement failed");
                    (new_count - 1).max(0) as u32
                }
            };
            return Ok(IncrementResult {
                success: false,
                new_count: rolled_back,
                was_at_limit: true,
            });
        }

        let record = PurchaseCounter {
            user_id: user_id.to_string(),
            token_mint: token_mint.to_string(),
            current_count: new_count as u32,
            max_count,
            last_purchase: Utc::now(),
            subscription_id,
        };

        match serde_json::to_string(&record) {
            Ok(encoded) => {
                if let Err(err) = self
                    .kv
                    .set(&record_key(&self.config, user_id, token_mint), &encoded, Some(self.ttl))
                    .await
                {
                    tracing::warn!(user_id, token_mint, error = %err, "quota record persistence failed");
                }
            }
            Err(err) => {
                tracing::warn!(user_id, token_mint, error = %err, "failed to encode purchase record");
            }
        }

        Ok(IncrementResult {
            success: true,
            new_count: new_count as u32,
            was_at_limit: false,
        })
    }

    pub async fn get_record(&self, user_id: &str, token_mint: &str) -> Option<PurchaseCounter> {
        match self.kv.get(&record_key(&self.config, user_id, token_mint)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            _ => None,
        }
    }

    pub async fn reset(&self, user_id: &str, token_mint: &str) -> bool {
        let counter_deleted = self
            .kv
            .del(&counter_key(&self.config, user_id, token_mint))
            .await
            .is_ok();
        let record_deleted = self
            .kv
            .del(&record_key(&self.config, user_id, token_mint))
            .await
            .is_ok();
        counter_deleted && record_deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::kv::InMemoryKvStore;
    use async_trait::async_trait;
    use std::collections::HashSet;

    fn gate() -> QuotaGate {
        let config = Arc::new(Config::from_env().expect("default config"));
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        QuotaGate::new(kv, config)
    }

    /// A KV store whose every operation fails, used to exercise the quota
    /// gate's fail-closed contract without a live Redis outage.
    struct FailingKvStore;

    #[async_trait]
    impl KvStore for FailingKvStore {
        async fn get(&self, _key: &str) -> AppResult<Option<String>> {
            Err(AppError::KvError("unreachable".to_string()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> AppResult<()> {
            Err(AppError::KvError("unreachable".to_string()))
        }
        async fn del(&self, _key: &str) -> AppResult<()> {
            Err(AppError::KvError("unreachable".to_string()))
        }
        async fn sadd(&self, _key: &str, _member: &str) -> AppResult<()> {
            Err(AppError::KvError("unreachable".to_string()))
        }
        async fn srem(&self, _key: &str, _member: &str) -> AppResult<()> {
            Err(AppError::KvError("unreachable".to_string()))
        }
        async fn smembers(&self, _key: &str) -> AppResult<HashSet<String>> {
            Err(AppError::KvError("unreachable".to_string()))
        }
        async fn scard(&self, _key: &str) -> AppResult<usize> {
            Err(AppError::KvError("unreachable".to_string()))
        }
        async fn zadd(&self, _key: &str, _member: &str, _score: f64) -> AppResult<()> {
            Err(AppError::KvError("unreachable".to_string()))
        }
        async fn zrevrange(&self, _key: &str, _start: isize, _stop: isize) -> AppResult<Vec<String>> {
            Err(AppError::KvError("unreachable".to_string()))
        }
        async fn zremrangebyrank(&self, _key: &str, _start: isize, _stop: isize) -> AppResult<()> {
            Err(AppError::KvError("unreachable".to_string()))
        }
        async fn zcard(&self, _key: &str) -> AppResult<usize> {
            Err(AppError::KvError("unreachable".to_string()))
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> AppResult<()> {
            Err(AppError::KvError("unreachable".to_string()))
        }
        async fn incr_with_expire(&self, _key: &str, _ttl: Duration) -> AppResult<i64> {
            Err(AppError::KvError("store unavailable".to_string()))
        }
        async fn decr(&self, _key: &str) -> AppResult<i64> {
            Err(AppError::KvError("store unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn increment_and_validate_fails_closed_instead_of_throwing() {
        let config = Arc::new(Config::from_env().expect("default config"));
        let kv: Arc<dyn KvStore> = Arc::new(FailingKvStore);
        let gate = QuotaGate::new(kv, config);

        let result = gate
            .increment_and_validate("U1", "T1", 5, Uuid::new_v4())
            .await
            .expect("must never propagate a raw store error");
        assert!(!result.success);
        assert!(!result.was_at_limit);
    }

    #[tokio::test]
    async fn can_purchase_reports_zero_for_absent_key() {
        let gate = gate();
        let result = gate.can_purchase("U1", "T1", 3).await;
        assert!(result.can_purchase);
        assert_eq!(result.current, 0);
        assert_eq!(result.remaining, 3);
    }

    #[tokio::test]
    async fn increment_past_max_rolls_back() {
        let gate = gate();
        let sub_id = Uuid::new_v4();

        let first = gate.increment_and_validate("U1", "T1", 1, sub_id).await.unwrap();
        assert!(first.success);
        assert_eq!(first.new_count, 1);

        let second = gate.increment_and_validate("U1", "T1", 1, sub_id).await.unwrap();
        assert!(!second.success);
        assert!(second.was_at_limit);
        assert_eq!(second.new_count, 1);
    }

    #[tokio::test]
    async fn reset_clears_counter_and_record() {
        let gate = gate();
        let sub_id = Uuid::new_v4();
        gate.increment_and_validate("U1", "T1", 5, sub_id).await.unwrap();
        assert!(gate.get_record("U1", "T1").await.is_some());

        assert!(gate.reset("U1", "T1").await);
        assert!(gate.get_record("U1", "T1").await.is_none());
        let result = gate.can_purchase("U1", "T1", 5).await;
        assert_eq!(result.current, 0);
    }
}
