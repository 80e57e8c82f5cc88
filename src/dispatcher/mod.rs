//! Event Dispatcher: the control plane. Classifies, persists, gates,
//! and fans out each inbound transaction, then emits the three downstream
//! streams (trade-detected, per-user notifications, batched copy-trade RPC).
//!
//! A per-KOL mutex (`dashmap`, same striping idiom as the Registry) enforces
//! in-order processing within one KOL wallet while distinct KOL wallets
//! proceed concurrently.

mod dex_labels;

use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::bus::{
    BusAdapter, EXCHANGE_COPY_TRADE_EVENTS, EXCHANGE_NOTIFICATIONS, ROUTING_KEY_CLIENT_NOTIFICATION,
    ROUTING_KEY_COPY_TRADE_REQUEST, ROUTING_KEY_KOL_TRADE_DETECTED,
};
use crate::classifier;
use crate::config::Config;
use crate::kv::KvStore;
use crate::ml_scorer::MlScorer;
use crate::models::{Trade, NATIVE_MINT};
use crate::quota::QuotaGate;
use crate::registry::Registry;
use crate::webhook::{InboundTransaction, TransactionKind, WebhookBatch};

const PER_KOL_RECENT_CAP: isize = 100;
const GLOBAL_RECENT_CAP: isize = 1000;

pub struct Dispatcher {
    kv: Arc<dyn KvStore>,
    config: Arc<Config>,
    bus: Arc<BusAdapter>,
    registry: Arc<Registry>,
    quota: Arc<QuotaGate>,
    ml_scorer: Arc<MlScorer>,
    kol_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Dispatcher {
    pub fn new(
        kv: Arc<dyn KvStore>,
        config: Arc<Config>,
        bus: Arc<BusAdapter>,
        registry: Arc<Registry>,
        quota: Arc<QuotaGate>,
        ml_scorer: Arc<MlScorer>,
    ) -> Self {
        Self {
            kv,
            config,
            bus,
            registry,
            quota,
            ml_scorer,
            kol_locks: DashMap::new(),
        }
    }

    fn kol_lock(&self, kol_wallet: &str) -> Arc<Mutex<()>> {
        self.kol_locks
            .entry(kol_wallet.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Processes one webhook payload's transactions in arrival order. Called
    /// from the webhook handler *after* the HTTP 200 has already been sent —
    /// failures here are logged, never surfaced to the provider.
    pub async fn process_batch(&self, batch: WebhookBatch) {
        let active = self.registry.get_watched_kol_wallets().await;

        for tx in batch {
            let TransactionKind::Swap(_) = tx.kind() else {
                continue;
            };

            let Some(kol_wallet) = tx.all_addresses().find(|addr| active.contains(*addr)).map(str::to_string)
            else {
                tracing::debug!(signature = %tx.signature, "no watched KOL in transaction, dropping");
                continue;
            };

            let lock = self.kol_lock(&kol_wallet);
            let _permit = lock.lock().await;
            if let Err(err) = self.process_one(&kol_wallet, &tx).await {
                tracing::error!(kol_wallet, signature = %tx.signature, error = %err, "dispatcher pipeline failed for transaction");
            }
        }
    }

    async fn process_one(&self, kol_wallet: &str, tx: &InboundTransaction) -> crate::error::AppResult<()> {
        let Some(classified) = classifier::classify(&tx.account_data, Some(kol_wallet)) else {
            tracing::debug!(kol_wallet, signature = %tx.signature, "transaction not classifiable, dropping");
            return Ok(());
        };

        let event_time = Utc
            .timestamp_opt(tx.timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now);

        let trade = Trade {
            id: Uuid::new_v4(),
            kol_wallet: kol_wallet.to_string(),
            signature: tx.signature.clone(),
            event_time,
            side: classified.side,
            token_mint: classified.token_mint,
            quote_mint: NATIVE_MINT.to_string(),
            token_amount: classified.token_amount,
            quote_amount: classified.quote_amount,
            dex_program: Some(
                dex_labels::infer(&tx.source, &tx.description).unwrap_or_else(|| tx.source.clone()),
            ),
            slot: tx.slot,
            fee: tx.fee,
        };

        self.persist_trade(&trade).await;

        let subscriptions = self.registry.get_subscriptions_for_kol(kol_wallet).await;
        let mut eligible_trade_subs = Vec::new();

        for sub in &subscriptions {
            if sub.is_trade_eligible() {
                let include = if sub.is_quota_gated() {
                    let max_count = sub.token_buy_count.unwrap_or(0);
                    match self
                        .quota
                        .increment_and_validate(&sub.user_id, &trade.token_mint, max_count, sub.id)
                        .await
                    {
                        Ok(result) => result.success,
                        Err(err) => {
                            tracing::error!(user_id = %sub.user_id, error = %err, "quota gate error, excluding from copy-trade batch");
                            false
                        }
                    }
                } else {
                    true
                };
                if include {
                    eligible_trade_subs.push(sub.clone());
                }
            }
        }

        if subscriptions.is_empty() {
            return Ok(());
        }

        let probability = self
            .ml_scorer
            .score(kol_wallet, &trade.token_mint, trade.event_time)
            .await;

        self.emit_trade_detected(&trade, &subscriptions, eligible_trade_subs.len(), probability)
            .await;

        for sub in &subscriptions {
            self.emit_notification(&trade, sub).await;
        }

        if !eligible_trade_subs.is_empty() {
            self.emit_copy_trade_batch(&trade, &eligible_trade_subs).await;
        }

        Ok(())
    }

    async fn persist_trade(&self, trade: &Trade) {
        let detail_key = self
            .config
            .namespaced(&format!("trade:kol:{}:{}", trade.kol_wallet, trade.id));
        let encoded = match serde_json::to_string(trade) {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode trade, skipping persistence");
                return;
            }
        };

        let ttl = std::time::Duration::from_secs(self.config.kv.trade_history_ttl_seconds);
        if let Err(err) = self.kv.set(&detail_key, &encoded, Some(ttl)).await {
            tracing::warn!(error = %err, "trade detail persistence failed");
        }

        let score = trade.event_time.timestamp_millis() as f64;

        let per_kol_key = self.config.namespaced(&format!("trade:recent:{}", trade.kol_wallet));
        self.zadd_capped(&per_kol_key, &trade.id.to_string(), score, PER_KOL_RECENT_CAP, ttl)
            .await;

        let global_key = self.config.namespaced("trade:recent");
        self.zadd_capped(&global_key, &encoded, score, GLOBAL_RECENT_CAP, ttl).await;
    }

    /// Adds `member` to the sorted set at `key`, trims it back down to `cap`
    /// entries, and refreshes its TTL so a capped-but-idle KOL's trade
    /// history doesn't outlive the configured retention window.
    async fn zadd_capped(
        &self,
        key: &str,
        member: &str,
        score: f64,
        cap: isize,
        ttl: std::time::Duration,
    ) {
        if let Err(err) = self.kv.zadd(key, member, score).await {
            tracing::warn!(key, error = %err, "zadd failed");
            return;
        }
        if let Err(err) = self.kv.expire(key, ttl).await {
            tracing::warn!(key, error = %err, "failed to refresh trade-history ttl");
        }
        let card = self.kv.zcard(key).await.unwrap_or(0) as isize;
        if card > cap {
            let _ = self.kv.zremrangebyrank(key, 0, card - cap - 1).await;
        }
    }

    async fn emit_trade_detected(
        &self,
        trade: &Trade,
        subscriptions: &[crate::models::Subscription],
        estimated_copy_count: usize,
        probability: f64,
    ) {
        let payload = json!({
            "trade": trade,
            "matchedSubscriptions": subscriptions.len(),
            "estimatedCopyCount": estimated_copy_count,
            "probability": probability,
        });
        if let Err(err) = self
            .bus
            .publish(EXCHANGE_COPY_TRADE_EVENTS, ROUTING_KEY_KOL_TRADE_DETECTED, &payload)
            .await
        {
            tracing::warn!(error = %err, "failed to publish trade-detected event");
        }
    }

    async fn emit_notification(&self, trade: &Trade, subscription: &crate::models::Subscription) {
        let estimated_copy_amount = trade.quote_amount * subscription.copy_percentage / 100.0;
        let payload = json!({
            "userId": subscription.user_id,
            "notificationType": "trade_detected",
            "trade": trade,
            "subscription": subscription,
            "estimatedCopyAmount": estimated_copy_amount,
        });
        if let Err(err) = self
            .bus
            .publish(EXCHANGE_NOTIFICATIONS, ROUTING_KEY_CLIENT_NOTIFICATION, &payload)
            .await
        {
            tracing::warn!(user_id = %subscription.user_id, error = %err, "failed to publish notification");
        }
    }

    async fn emit_copy_trade_batch(&self, trade: &Trade, subs: &[crate::models::Subscription]) {
        let elements: Vec<_> = subs
            .iter()
            .map(|sub| {
                json!({
                    "agentId": sub.user_id,
                    "tradeType": trade.side,
                    "amount": sub.min_amount,
                    "privateKey": sub.opaque_credential,
                    "mint": trade.token_mint,
                    "priority": "high",
                    "watchConfig": sub.watch_config,
                })
            })
            .collect();
        let payload = json!({ "trades": elements });

        if let Err(err) = self
            .bus
            .publish(EXCHANGE_COPY_TRADE_EVENTS, ROUTING_KEY_COPY_TRADE_REQUEST, &payload)
            .await
        {
            tracing::warn!(error = %err, "failed to publish copy-trade batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use crate::models::{SubscriptionType, Subscription};
    use crate::provider::ProviderClient;

    fn test_config() -> Arc<Config> {
        let mut config = Config::from_env().expect("default config");
        config.environment = "test".to_string();
        Arc::new(config)
    }

    fn watch_sub(user_id: &str, kol_wallet: &str) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kol_wallet: kol_wallet.to_string(),
            wallet_address: "wallet".to_string(),
            opaque_credential: "key".to_string(),
            subscription_type: SubscriptionType::Watch,
            active: true,
            copy_percentage: 25.0,
            min_amount: None,
            max_amount: None,
            token_buy_count: None,
            watch_config: None,
            safety: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_tx(kol_wallet: &str) -> InboundTransaction {
        crate::webhook::InboundTransaction {
            signature: "sig-1".to_string(),
            transaction_type: "SWAP".to_string(),
            source: "PUMP_FUN".to_string(),
            description: "pump.fun swap".to_string(),
            fee: Some(5000),
            fee_payer: Some(kol_wallet.to_string()),
            slot: Some(123),
            timestamp: 1_700_000_000,
            account_data: vec![
                crate::webhook::AccountData {
                    account: kol_wallet.to_string(),
                    native_balance_change: -50_000_000,
                    token_balance_changes: vec![crate::webhook::TokenBalanceChange {
                        user_account: kol_wallet.to_string(),
                        mint: "MintA".to_string(),
                        raw_token_amount: crate::webhook::RawTokenAmount {
                            token_amount: "1000000000".to_string(),
                            decimals: 6,
                        },
                    }],
                },
            ],
            native_transfers: vec![],
            token_transfers: vec![],
        }
    }

    async fn dispatcher_harness() -> (Dispatcher, Arc<dyn KvStore>, Arc<Registry>) {
        let config = test_config();
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let provider = Arc::new(ProviderClient::disabled(config.clone()));
        let registry = Arc::new(Registry::new(kv.clone(), config.clone(), provider));
        let quota = Arc::new(QuotaGate::new(kv.clone(), config.clone()));
        let ml_scorer = Arc::new(MlScorer::new(config.clone()));
        let bus = Arc::new(BusAdapter::connect(config.clone()).expect("producer config is valid offline"));
        let dispatcher = Dispatcher::new(kv.clone(), config, bus, registry.clone(), quota, ml_scorer);
        (dispatcher, kv, registry)
    }

    #[tokio::test]
    async fn skips_transactions_with_no_watched_kol() {
        let (dispatcher, kv, _registry) = dispatcher_harness().await;
        let batch = vec![sample_tx("UnwatchedWallet")];
        dispatcher.process_batch(batch).await;

        // Nothing watched, so nothing should have been classified or persisted.
        assert!(kv.zcard("trade:recent").await.unwrap_or(1) == 0);
    }

    #[tokio::test]
    async fn persists_trade_for_watched_kol() {
        let (dispatcher, kv, registry) = dispatcher_harness().await;
        registry
            .add_subscription(watch_sub("user-1", "KolWallet"))
            .await
            .expect("add subscription");

        let batch = vec![sample_tx("KolWallet")];
        dispatcher.process_batch(batch).await;

        let per_kol_key = format!("test_trade:recent:{}", "KolWallet");
        let count = kv.zcard(&per_kol_key).await.unwrap_or(0);
        assert_eq!(count, 1, "expected exactly one persisted trade for the watched KOL");
    }

    #[tokio::test]
    async fn unmatched_dex_label_falls_back_to_raw_source() {
        let (dispatcher, kv, registry) = dispatcher_harness().await;
        registry
            .add_subscription(watch_sub("user-1", "KolWallet"))
            .await
            .expect("add subscription");

        let mut tx = sample_tx("KolWallet");
        tx.source = "SOME_UNLISTED_VENUE".to_string();
        tx.description = "unlisted venue swap".to_string();
        dispatcher.process_batch(vec![tx]).await;

        let members = kv.zrevrange("test_trade:recent", 0, -1).await.unwrap();
        assert_eq!(members.len(), 1);
        let trade: Trade = serde_json::from_str(&members[0]).expect("stored trade decodes");
        assert_eq!(trade.dex_program.as_deref(), Some("SOME_UNLISTED_VENUE"));
    }
}
