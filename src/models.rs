use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The canonical wrapped-native mint for this chain. All classified swaps
/// use this as the counter-asset.
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";

/// Minor-unit exponent for the native token (lamports per SOL).
pub const NATIVE_DECIMALS: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Immutable trade record produced by the classifier.
///
/// Invariant: exactly one side; tokenAmount > 0 and quoteAmount > 0;
/// {tokenMint, quoteMint} is a set of size 2 and quoteMint is the canonical
/// native mint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: Uuid,
    pub kol_wallet: String,
    pub signature: String,
    pub event_time: DateTime<Utc>,
    pub side: TradeSide,
    pub token_mint: String,
    pub quote_mint: String,
    pub token_amount: f64,
    pub quote_amount: f64,
    pub dex_program: Option<String>,
    pub slot: Option<u64>,
    pub fee: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionType {
    Trade,
    Watch,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    pub take_profit_pct: Option<f64>,
    pub stop_loss_pct: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
    pub max_hold_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SafetySettings {
    pub max_slippage_bps: Option<u32>,
    pub dex_whitelist: Option<Vec<String>>,
    pub token_blacklist: Option<Vec<String>>,
    pub trading_hours_utc: Option<(u8, u8)>,
}

/// Invariant: (userId, kolWallet) is unique; adding a duplicate replaces the
/// prior record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: String,
    pub kol_wallet: String,
    pub wallet_address: String,
    /// User's private key, passed through opaquely. Never logged, never
    /// indexed, never included in serialized output beyond internal bus
    /// payloads that require it for execution.
    #[serde(skip_serializing)]
    pub opaque_credential: String,
    pub subscription_type: SubscriptionType,
    pub active: bool,
    pub copy_percentage: f64,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub token_buy_count: Option<u32>,
    pub watch_config: Option<WatchConfig>,
    pub safety: Option<SafetySettings>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// A `trade` subscription is gated by the quota if it both names a
    /// purchase-count limit and carries watch configuration.
    pub fn is_quota_gated(&self) -> bool {
        self.subscription_type == SubscriptionType::Trade
            && self.token_buy_count.is_some_and(|n| n > 0)
            && self.watch_config.is_some()
    }

    pub fn is_trade_eligible(&self) -> bool {
        self.subscription_type == SubscriptionType::Trade
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseCounter {
    pub user_id: String,
    pub token_mint: String,
    pub current_count: u32,
    pub max_count: u32,
    pub last_purchase: DateTime<Utc>,
    pub subscription_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanPurchaseResult {
    pub can_purchase: bool,
    pub current: u32,
    pub max: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementResult {
    pub success: bool,
    pub new_count: u32,
    pub was_at_limit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub components: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_sub(subscription_type: SubscriptionType) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            kol_wallet: "kol-1".to_string(),
            wallet_address: "wallet".to_string(),
            opaque_credential: "super-secret".to_string(),
            subscription_type,
            active: true,
            copy_percentage: 50.0,
            min_amount: None,
            max_amount: None,
            token_buy_count: None,
            watch_config: None,
            safety: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn watch_subscriptions_are_never_quota_gated() {
        let sub = blank_sub(SubscriptionType::Watch);
        assert!(!sub.is_quota_gated());
        assert!(!sub.is_trade_eligible());
    }

    #[test]
    fn trade_subscription_without_watch_config_is_not_quota_gated() {
        let mut sub = blank_sub(SubscriptionType::Trade);
        sub.token_buy_count = Some(3);
        assert!(!sub.is_quota_gated());
        assert!(sub.is_trade_eligible());
    }

    #[test]
    fn trade_subscription_with_count_and_watch_config_is_quota_gated() {
        let mut sub = blank_sub(SubscriptionType::Trade);
        sub.token_buy_count = Some(3);
        sub.watch_config = Some(WatchConfig::default());
        assert!(sub.is_quota_gated());
    }

    #[test]
    fn trade_subscription_with_zero_count_is_not_quota_gated() {
        let mut sub = blank_sub(SubscriptionType::Trade);
        sub.token_buy_count = Some(0);
        sub.watch_config = Some(WatchConfig::default());
        assert!(!sub.is_quota_gated());
    }

    #[test]
    fn opaque_credential_never_serializes() {
        let sub = blank_sub(SubscriptionType::Trade);
        let value = serde_json::to_value(&sub).expect("serializes");
        assert!(value.get("opaqueCredential").is_none());
        assert!(value.get("opaque_credential").is_none());
    }
}
