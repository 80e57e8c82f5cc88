//! RPC Query Surface: a synchronous request/reply layer over a
//! dedicated, non-durable queue. Each request is `{method, args}`; the
//! method name selects the handler. Mutation paths return a structured
//! `{success, message, data}` reply rather than throwing.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::bus::{BusHandler, BusMessage};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::kv::KvStore;
use crate::models::{Subscription, Trade};
use crate::provider::ProviderClient;
use crate::registry::Registry;

const DEFAULT_RECENT_LIMIT: isize = 20;
const DEFAULT_HISTORY_LIMIT: isize = 50;
const DEFAULT_SWAP_LIMIT: isize = 100;

pub struct RpcSurface {
    registry: Arc<Registry>,
    provider: Arc<ProviderClient>,
    kv: Arc<dyn KvStore>,
    config: Arc<Config>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionArgs {
    user_id: String,
    kol_wallet: String,
    wallet_address: String,
    opaque_credential: String,
    #[serde(rename = "type")]
    subscription_type: crate::models::SubscriptionType,
    copy_percentage: f64,
    #[serde(default)]
    min_amount: Option<f64>,
    #[serde(default)]
    max_amount: Option<f64>,
    #[serde(default)]
    token_buy_count: Option<u32>,
    #[serde(default)]
    watch_config: Option<crate::models::WatchConfig>,
    #[serde(default)]
    safety: Option<crate::models::SafetySettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserKolArgs {
    user_id: String,
    kol_wallet: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KolArgs {
    kol_wallet: String,
    #[serde(default)]
    limit: Option<isize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserArgs {
    user_id: String,
}

impl RpcSurface {
    pub fn new(
        registry: Arc<Registry>,
        provider: Arc<ProviderClient>,
        kv: Arc<dyn KvStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            registry,
            provider,
            kv,
            config,
        }
    }

    /// Dispatches one `{method, args}` request. Unknown methods return the
    /// `{success: false, message: "Invalid method", data: null}` shape
    /// rather than an error status — the RPC transport always replies.
    pub async fn dispatch(&self, method: &str, args: Value) -> Value {
        let result = self.dispatch_inner(method, args).await;
        match result {
            Ok(data) => json!({ "success": true, "message": null, "data": data }),
            Err(err) => err.to_rpc_error(),
        }
    }

    async fn dispatch_inner(&self, method: &str, args: Value) -> AppResult<Value> {
        match method {
            "createUserSubscription" => self.create_user_subscription(args).await,
            "removeUserSubscription" => self.remove_user_subscription(args).await,
            "addKolWalletToWebhook" => self.add_kol_wallet_to_webhook(args).await,
            "removeKolWalletFromWebhook" => self.remove_kol_wallet_from_webhook(args).await,
            "getSubscriptionsForKOL" => self.get_subscriptions_for_kol(args).await,
            "getSubscriptionsForUser" => self.get_subscriptions_for_user(args).await,
            "getKolWallets" => self.get_kol_wallets().await,
            "getRecentKOLTrades" => self.get_recent_kol_trades(args).await,
            "getTradeHistory" => self.get_trade_history(args).await,
            "getKOLSwapTransactions" => self.get_kol_swap_transactions(args).await,
            other => Err(AppError::UnknownMethod(other.to_string())),
        }
    }

    async fn create_user_subscription(&self, args: Value) -> AppResult<Value> {
        let parsed: CreateSubscriptionArgs = serde_json::from_value(args)?;
        let now = chrono::Utc::now();
        let sub = Subscription {
            id: uuid::Uuid::new_v4(),
            user_id: parsed.user_id,
            kol_wallet: parsed.kol_wallet,
            wallet_address: parsed.wallet_address,
            opaque_credential: parsed.opaque_credential,
            subscription_type: parsed.subscription_type,
            active: true,
            copy_percentage: parsed.copy_percentage,
            min_amount: parsed.min_amount,
            max_amount: parsed.max_amount,
            token_buy_count: parsed.token_buy_count,
            watch_config: parsed.watch_config,
            safety: parsed.safety,
            created_at: now,
            updated_at: now,
        };
        let subs = self.registry.add_subscription(sub).await?;
        Ok(serde_json::to_value(subs)?)
    }

    async fn remove_user_subscription(&self, args: Value) -> AppResult<Value> {
        let parsed: UserKolArgs = serde_json::from_value(args)?;
        let subs = self
            .registry
            .remove_subscription(&parsed.user_id, &parsed.kol_wallet)
            .await?;
        Ok(serde_json::to_value(subs)?)
    }

    async fn add_kol_wallet_to_webhook(&self, args: Value) -> AppResult<Value> {
        let parsed: KolArgs = serde_json::from_value(args)?;
        self.provider.append_addresses(&[parsed.kol_wallet]).await?;
        Ok(Value::Null)
    }

    async fn remove_kol_wallet_from_webhook(&self, args: Value) -> AppResult<Value> {
        let parsed: KolArgs = serde_json::from_value(args)?;
        self.provider.remove_addresses(&[parsed.kol_wallet]).await?;
        Ok(Value::Null)
    }

    async fn get_subscriptions_for_kol(&self, args: Value) -> AppResult<Value> {
        let parsed: KolArgs = serde_json::from_value(args)?;
        let subs = self.registry.get_subscriptions_for_kol(&parsed.kol_wallet).await;
        Ok(serde_json::to_value(subs)?)
    }

    async fn get_subscriptions_for_user(&self, args: Value) -> AppResult<Value> {
        let parsed: UserArgs = serde_json::from_value(args)?;
        let subs = self.registry.get_user_subscriptions(&parsed.user_id).await;
        Ok(serde_json::to_value(subs)?)
    }

    async fn get_kol_wallets(&self) -> AppResult<Value> {
        let mut wallets: Vec<String> = self.registry.get_watched_kol_wallets().await.into_iter().collect();
        wallets.sort();
        Ok(serde_json::to_value(wallets)?)
    }

    /// Recent trades for one KOL, read from the capped per-KOL id-indexed
    /// sorted set (`trade:recent:{kolWallet}`) and resolved against the
    /// per-KOL detail keys.
    async fn get_recent_kol_trades(&self, args: Value) -> AppResult<Value> {
        let parsed: KolArgs = serde_json::from_value(args)?;
        let limit = parsed.limit.unwrap_or(DEFAULT_RECENT_LIMIT).max(1);
        let trades = self.fetch_kol_trades_by_id(&parsed.kol_wallet, limit).await;
        Ok(serde_json::to_value(trades)?)
    }

    /// Full recent swap history for one KOL, same source as
    /// `getRecentKOLTrades` but exposed separately for callers that want the
    /// larger default window up to the per-KOL cap (100).
    async fn get_kol_swap_transactions(&self, args: Value) -> AppResult<Value> {
        let parsed: KolArgs = serde_json::from_value(args)?;
        let limit = parsed.limit.unwrap_or(DEFAULT_SWAP_LIMIT).max(1);
        let trades = self.fetch_kol_trades_by_id(&parsed.kol_wallet, limit).await;
        Ok(serde_json::to_value(trades)?)
    }

    /// Cross-KOL trade history, read from the global capped sorted set
    /// (`trade:recent`) which stores the full trade JSON as its member, then
    /// filtered to the requested KOL.
    async fn get_trade_history(&self, args: Value) -> AppResult<Value> {
        let parsed: KolArgs = serde_json::from_value(args)?;
        let limit = parsed.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);

        let key = self.config.namespaced("trade:recent");
        let raw_members = self.kv.zrevrange(&key, 0, -1).await.unwrap_or_default();

        let trades: Vec<Trade> = raw_members
            .iter()
            .filter_map(|m| serde_json::from_str::<Trade>(m).ok())
            .filter(|t| t.kol_wallet == parsed.kol_wallet)
            .take(limit as usize)
            .collect();

        Ok(serde_json::to_value(trades)?)
    }

    async fn fetch_kol_trades_by_id(&self, kol_wallet: &str, limit: isize) -> Vec<Trade> {
        let index_key = self.config.namespaced(&format!("trade:recent:{kol_wallet}"));
        let ids = self.kv.zrevrange(&index_key, 0, limit - 1).await.unwrap_or_default();

        let mut trades = Vec::with_capacity(ids.len());
        for id in ids {
            let detail_key = self.config.namespaced(&format!("trade:kol:{kol_wallet}:{id}"));
            if let Ok(Some(raw)) = self.kv.get(&detail_key).await {
                if let Ok(trade) = serde_json::from_str::<Trade>(&raw) {
                    trades.push(trade);
                }
            }
        }
        trades
    }
}

/// Adapts the RPC surface onto the bus as a queue consumer: requests carry
/// `replyTo` and `correlationId`; replies are published back to the
/// caller-supplied queue rather than one of the four fixed exchanges.
pub struct RpcBusHandler {
    surface: Arc<RpcSurface>,
    bus: Arc<crate::bus::BusAdapter>,
}

impl RpcBusHandler {
    pub fn new(surface: Arc<RpcSurface>, bus: Arc<crate::bus::BusAdapter>) -> Self {
        Self { surface, bus }
    }
}

#[async_trait]
impl BusHandler for RpcBusHandler {
    fn can_handle(&self, _message: &BusMessage) -> bool {
        // The RPC queue carries only RPC requests; no routing-key filtering
        // is needed since it is not bound to the shared `commands` exchange.
        true
    }

    async fn handle(&self, message: &BusMessage) -> AppResult<()> {
        let method = message
            .payload
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::InvalidPayload("RPC request missing method".to_string()))?;
        let args = message.payload.get("args").cloned().unwrap_or(Value::Null);
        let reply_to = message.payload.get("replyTo").and_then(Value::as_str);
        let correlation_id = message.payload.get("correlationId").cloned().unwrap_or(Value::Null);

        let reply_body = self.surface.dispatch(method, args).await;

        if let Some(reply_to) = reply_to {
            let envelope = json!({ "correlationId": correlation_id, "reply": reply_body });
            self.bus.publish_direct(reply_to, "reply", &envelope).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;

    fn surface() -> RpcSurface {
        let config = Arc::new(Config::from_env().expect("default config"));
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let provider = Arc::new(ProviderClient::disabled(config.clone()));
        let registry = Arc::new(Registry::new(kv.clone(), config.clone(), provider.clone()));
        RpcSurface::new(registry, provider, kv, config)
    }

    #[tokio::test]
    async fn unknown_method_returns_structured_error() {
        let rpc = surface();
        let reply = rpc.dispatch("doesNotExist", json!({})).await;
        assert_eq!(reply["success"], json!(false));
        assert!(reply["data"].is_null());
    }

    #[tokio::test]
    async fn create_then_list_subscription() {
        let rpc = surface();
        let args = json!({
            "userId": "U1",
            "kolWallet": "K1",
            "walletAddress": "addr",
            "opaqueCredential": "key",
            "type": "trade",
            "copyPercentage": 50.0,
        });
        let reply = rpc.dispatch("createUserSubscription", args).await;
        assert_eq!(reply["success"], json!(true));

        let listed = rpc
            .dispatch("getSubscriptionsForUser", json!({ "userId": "U1" }))
            .await;
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    }
}
