//! Inbound webhook payload shapes.
//!
//! Grounded on the provider's enhanced-transaction webhook shape (see the
//! sibling `arb-farm` service's `webhooks::helius` module in this monorepo),
//! trimmed to exactly the fields named in the contract: `signature`, `type`,
//! `source`, `description`, `fee`, `feePayer`, `slot`, `timestamp`,
//! `accountData[]`, `nativeTransfers[]`, `tokenTransfers[]`.
//!
//! Per the "untyped payload -> tagged variant" redesign flag, the `type`
//! discriminator is read once at the boundary and used to produce a closed
//! `TransactionKind` sum; only the `Swap` family reaches the classifier.

use serde::{Deserialize, Serialize};

/// One webhook POST body: a JSON array of transaction records.
pub type WebhookBatch = Vec<InboundTransaction>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundTransaction {
    pub signature: String,
    #[serde(rename = "type")]
    pub transaction_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fee: Option<u64>,
    #[serde(default)]
    pub fee_payer: Option<String>,
    #[serde(default)]
    pub slot: Option<u64>,
    pub timestamp: i64,
    #[serde(default)]
    pub account_data: Vec<AccountData>,
    #[serde(default)]
    pub native_transfers: Vec<NativeTransfer>,
    #[serde(default)]
    pub token_transfers: Vec<TokenTransfer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountData {
    pub account: String,
    #[serde(default)]
    pub native_balance_change: i64,
    #[serde(default)]
    pub token_balance_changes: Vec<TokenBalanceChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalanceChange {
    pub user_account: String,
    pub mint: String,
    pub raw_token_amount: RawTokenAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTokenAmount {
    pub token_amount: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeTransfer {
    pub from_user_account: String,
    pub to_user_account: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    pub from_user_account: String,
    pub to_user_account: String,
    pub mint: String,
    #[serde(default)]
    pub token_amount: f64,
}

/// The closed sum the REDESIGN FLAGS section requires in place of an
/// untyped "any" payload at the boundary: only `Swap` carries the
/// transaction on to classification.
#[derive(Debug, Clone)]
pub enum TransactionKind<'a> {
    Swap(&'a InboundTransaction),
    Other(&'a str),
}

const SWAP_TYPES: &[&str] = &["SWAP"];

impl InboundTransaction {
    pub fn kind(&self) -> TransactionKind<'_> {
        if SWAP_TYPES.contains(&self.transaction_type.as_str()) {
            TransactionKind::Swap(self)
        } else {
            TransactionKind::Other(&self.transaction_type)
        }
    }

    /// Every address mentioned anywhere in the payload: account data,
    /// native transfers, token transfers, and the fee payer. Used to find
    /// which watched KOL wallet (if any) this transaction belongs to.
    pub fn all_addresses(&self) -> impl Iterator<Item = &str> {
        self.account_data
            .iter()
            .map(|a| a.account.as_str())
            .chain(
                self.native_transfers
                    .iter()
                    .flat_map(|t| [t.from_user_account.as_str(), t.to_user_account.as_str()]),
            )
            .chain(
                self.token_transfers
                    .iter()
                    .flat_map(|t| [t.from_user_account.as_str(), t.to_user_account.as_str()]),
            )
            .chain(self.fee_payer.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_payload() {
        let json = serde_json::json!([{
            "signature": "sig1",
            "type": "SWAP",
            "source": "PUMP_FUN",
            "description": "",
            "feePayer": "W",
            "timestamp": 1700000000,
            "accountData": [{
                "account": "W",
                "nativeBalanceChange": -50000000,
                "tokenBalanceChanges": [{
                    "userAccount": "W",
                    "mint": "M",
                    "rawTokenAmount": {"tokenAmount": "1000000000", "decimals": 6}
                }]
            }]
        }]);
        let batch: WebhookBatch = serde_json::from_value(json).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(matches!(batch[0].kind(), TransactionKind::Swap(_)));
    }

    #[test]
    fn non_swap_type_is_other() {
        let tx = InboundTransaction {
            signature: "s".into(),
            transaction_type: "NFT_SALE".into(),
            source: String::new(),
            description: String::new(),
            fee: None,
            fee_payer: None,
            slot: None,
            timestamp: 0,
            account_data: vec![],
            native_transfers: vec![],
            token_transfers: vec![],
        };
        assert!(matches!(tx.kind(), TransactionKind::Other("NFT_SALE")));
    }
}
