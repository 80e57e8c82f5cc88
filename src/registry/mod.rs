//! Subscription & KOL Registry: the authoritative mapping between
//! users and their subscriptions, and between KOL wallets and their
//! subscriber sets. Backed by the KV store; in-process state is limited to
//! the striped locks that serialize mutation — every read hits the KV store
//! as the source of truth, never an in-process cache.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppResult;
use crate::kv::KvStore;
use crate::models::Subscription;
use crate::provider::ProviderClient;

fn user_key(config: &Config, user_id: &str) -> String {
    config.namespaced(&format!("sub:user:{user_id}"))
}

fn active_key(config: &Config) -> String {
    config.namespaced("kol:active")
}

fn subscribers_key(config: &Config, kol_wallet: &str) -> String {
    config.namespaced(&format!("kol:subscribers:{kol_wallet}"))
}

/// Striped lock keyed by (userId, kolWallet), plus a single global lock for
/// provider-sync reconciliation. `dashmap` gives us lock-free access to the
/// stripe table itself; each stripe is a `tokio::sync::Mutex<()>` held only
/// for the duration of one mutation.
pub struct Registry {
    kv: Arc<dyn KvStore>,
    config: Arc<Config>,
    provider: Arc<ProviderClient>,
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
    sync_lock: Mutex<()>,
    ttl: std::time::Duration,
}

impl Registry {
    pub fn new(kv: Arc<dyn KvStore>, config: Arc<Config>, provider: Arc<ProviderClient>) -> Self {
        let ttl = if config.environment == "production" {
            std::time::Duration::from_secs(0)
        } else {
            std::time::Duration::from_secs(config.kv.trade_history_ttl_seconds)
        };
        Self {
            kv,
            config,
            provider,
            locks: DashMap::new(),
            sync_lock: Mutex::new(()),
            ttl,
        }
    }

    fn stripe(&self, user_id: &str, kol_wallet: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((user_id.to_string(), kol_wallet.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn ttl_opt(&self) -> Option<std::time::Duration> {
        if self.ttl.as_secs() == 0 {
            None
        } else {
            Some(self.ttl)
        }
    }

    async fn load_user_subscriptions(&self, user_id: &str) -> Vec<Subscription> {
        match self.kv.get(&user_key(&self.config, user_id)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    async fn store_user_subscriptions(
        &self,
        user_id: &str,
        subs: &[Subscription],
    ) -> AppResult<()> {
        let encoded = serde_json::to_string(subs)?;
        self.kv
            .set(&user_key(&self.config, user_id), &encoded, self.ttl_opt())
            .await
    }

    /// Never fails: on any read error returns an empty list.
    pub async fn get_user_subscriptions(&self, user_id: &str) -> Vec<Subscription> {
        self.load_user_subscriptions(user_id).await
    }

    pub async fn get_users_for_kol(&self, kol_wallet: &str) -> HashSet<String> {
        self.kv
            .smembers(&subscribers_key(&self.config, kol_wallet))
            .await
            .unwrap_or_default()
    }

    pub async fn get_watched_kol_wallets(&self) -> HashSet<String> {
        self.kv
            .smembers(&active_key(&self.config))
            .await
            .unwrap_or_default()
    }

    pub async fn get_subscriptions_for_kol(&self, kol_wallet: &str) -> Vec<Subscription> {
        let users = self.get_users_for_kol(kol_wallet).await;
        let mut out = Vec::new();
        for user_id in users {
            let subs = self.load_user_subscriptions(&user_id).await;
            out.extend(subs.into_iter().filter(|s| s.kol_wallet == kol_wallet));
        }
        out
    }

    /// Upserts by (userId, kolWallet); assigns id/timestamps on insert,
    /// refreshes updatedAt otherwise. Appends the KOL's derived sets and
    /// best-effort registers it with the provider.
    pub async fn add_subscription(&self, mut sub: Subscription) -> AppResult<Vec<Subscription>> {
        let guard = self.stripe(&sub.user_id, &sub.kol_wallet);
        let _permit = guard.lock().await;

        let mut subs = self.load_user_subscriptions(&sub.user_id).await;
        let now = Utc::now();
        if let Some(existing) = subs
            .iter()
            .find(|s| s.kol_wallet == sub.kol_wallet)
            .cloned()
        {
            sub.id = existing.id;
            sub.created_at = existing.created_at;
        } else {
            sub.id = Uuid::new_v4();
            sub.created_at = now;
        }
        sub.updated_at = now;

        subs.retain(|s| s.kol_wallet != sub.kol_wallet);
        subs.push(sub.clone());
        self.store_user_subscriptions(&sub.user_id, &subs).await?;

        let subscribers = subscribers_key(&self.config, &sub.kol_wallet);
        self.kv.sadd(&subscribers, &sub.user_id).await?;
        self.kv.expire(&subscribers, self.ttl).await.ok();

        let was_active = self
            .kv
            .smembers(&active_key(&self.config))
            .await
            .unwrap_or_default()
            .contains(&sub.kol_wallet);
        self.kv.sadd(&active_key(&self.config), &sub.kol_wallet).await?;
        self.kv.expire(&active_key(&self.config), self.ttl).await.ok();

        if !was_active {
            // Best-effort: provider registration never rolls back the
            // subscription add. The next syncWithProvider reconciles.
            if let Err(err) = self.provider.append_addresses(&[sub.kol_wallet.clone()]).await {
                tracing::warn!(kol_wallet = %sub.kol_wallet, error = %err, "provider registration failed, deferring to next sync");
            }
        }

        Ok(subs)
    }

    /// Removes the matching subscription. If the KOL's subscriber set
    /// becomes empty, removes it from the active set and from the provider.
    pub async fn remove_subscription(
        &self,
        user_id: &str,
        kol_wallet: &str,
    ) -> AppResult<Vec<Subscription>> {
        let guard = self.stripe(user_id, kol_wallet);
        let _permit = guard.lock().await;

        let mut subs = self.load_user_subscriptions(user_id).await;
        let had = subs.iter().any(|s| s.kol_wallet == kol_wallet);
        subs.retain(|s| s.kol_wallet != kol_wallet);
        self.store_user_subscriptions(user_id, &subs).await?;

        if had {
            let subscribers = subscribers_key(&self.config, kol_wallet);
            self.kv.srem(&subscribers, user_id).await?;
            let remaining = self.kv.scard(&subscribers).await.unwrap_or(0);
            if remaining == 0 {
                self.kv.srem(&active_key(&self.config), kol_wallet).await?;
                if let Err(err) = self.provider.remove_addresses(&[kol_wallet.to_string()]).await {
                    tracing::warn!(kol_wallet = %kol_wallet, error = %err, "provider deregistration failed, deferring to next sync");
                }
            }
        }

        Ok(subs)
    }

    /// Idempotent reconciliation: any active KOL unknown to the provider is
    /// appended; any provider-known KOL not active is removed.
    pub async fn sync_with_provider(&self) -> AppResult<()> {
        let _permit = self.sync_lock.lock().await;

        let active = self.get_watched_kol_wallets().await;
        let provider_known: HashSet<String> =
            self.provider.list_watched_addresses().await?.into_iter().collect();

        let to_add: Vec<String> = active.difference(&provider_known).cloned().collect();
        let to_remove: Vec<String> = provider_known.difference(&active).cloned().collect();

        if !to_add.is_empty() {
            self.provider.append_addresses(&to_add).await?;
        }
        if !to_remove.is_empty() {
            self.provider.remove_addresses(&to_remove).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use crate::models::SubscriptionType;
    use crate::provider::ProviderClient;

    fn test_config() -> Arc<Config> {
        let mut config = Config::from_env().expect("default config");
        config.environment = "test".to_string();
        Arc::new(config)
    }

    fn blank_sub(user_id: &str, kol_wallet: &str) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kol_wallet: kol_wallet.to_string(),
            wallet_address: "wallet".to_string(),
            opaque_credential: "key".to_string(),
            subscription_type: SubscriptionType::Trade,
            active: true,
            copy_percentage: 50.0,
            min_amount: None,
            max_amount: None,
            token_buy_count: None,
            watch_config: None,
            safety: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn registry() -> Registry {
        let config = test_config();
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let provider = Arc::new(ProviderClient::disabled(config.clone()));
        Registry::new(kv, config, provider)
    }

    #[tokio::test]
    async fn subscription_lifecycle_tracks_active_set() {
        let reg = registry();
        reg.add_subscription(blank_sub("U1", "K1")).await.unwrap();

        assert_eq!(reg.get_users_for_kol("K1").await, HashSet::from(["U1".to_string()]));
        assert!(reg.get_watched_kol_wallets().await.contains("K1"));

        reg.remove_subscription("U1", "K1").await.unwrap();
        assert!(reg.get_users_for_kol("K1").await.is_empty());
        assert!(!reg.get_watched_kol_wallets().await.contains("K1"));
    }

    #[tokio::test]
    async fn duplicate_add_upserts_by_user_and_kol() {
        let reg = registry();
        reg.add_subscription(blank_sub("U1", "K1")).await.unwrap();
        let mut second = blank_sub("U1", "K1");
        second.copy_percentage = 75.0;
        let subs = reg.add_subscription(second).await.unwrap();

        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].copy_percentage, 75.0);
    }

    #[tokio::test]
    async fn remove_is_noop_on_unrelated_state() {
        let reg = registry();
        reg.add_subscription(blank_sub("U1", "K1")).await.unwrap();
        reg.add_subscription(blank_sub("U1", "K2")).await.unwrap();
        reg.remove_subscription("U1", "K2").await.unwrap();

        let remaining = reg.get_user_subscriptions("U1").await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kol_wallet, "K1");
    }

    #[tokio::test]
    async fn missing_user_returns_empty_not_error() {
        let reg = registry();
        assert!(reg.get_user_subscriptions("ghost").await.is_empty());
    }
}
