//! Swap Classifier: a pure function over balance-delta payloads.
//!
//! Converts the native + token balance deltas on an inbound transaction into
//! a single canonical (buy/sell, tokenMint, tokenAmount, quoteAmount) record,
//! or reports the transaction as not classifiable. No I/O, no allocation
//! proportional to anything but the payload itself.

use std::collections::HashMap;

use crate::models::{TradeSide, NATIVE_DECIMALS, NATIVE_MINT};
use crate::webhook::AccountData;

/// Output of a successful classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedSwap {
    pub side: TradeSide,
    pub token_mint: String,
    pub token_amount: f64,
    pub quote_amount: f64,
}

/// Net per-account, per-mint balance change, in the order accounts first
/// appear in the input. The native-wrap mint is folded into each account's
/// map under `NATIVE_MINT` so native and token deltas are compared uniformly.
/// Kept as an ordered `Vec` rather than a `HashMap` so "the first account
/// with non-zero change" is well-defined and doesn't depend on hasher seed.
type DeltaMap = Vec<(String, HashMap<String, f64>)>;

/// Classify one transaction's account data into a trade, or `None` if the
/// transaction is not a classifiable two-leg swap.
///
/// `target_user` is the explicit user to analyze (e.g. feePayer); if absent,
/// the first account with any non-zero net change is used.
pub fn classify(account_data: &[AccountData], target_user: Option<&str>) -> Option<ClassifiedSwap> {
    let deltas = build_delta_map(account_data);

    let user = match target_user {
        Some(u) if deltas.iter().any(|(acct, _)| acct == u) => u.to_string(),
        _ => deltas
            .iter()
            .find(|(_, mints)| mints.values().any(|v| *v != 0.0))
            .map(|(acct, _)| acct.clone())?,
    };

    let mint_deltas = &deltas.iter().find(|(acct, _)| *acct == user)?.1;

    let native_delta = mint_deltas.get(NATIVE_MINT).copied().unwrap_or(0.0);
    let non_native: Vec<(&String, &f64)> = mint_deltas
        .iter()
        .filter(|(mint, _)| mint.as_str() != NATIVE_MINT)
        .collect();

    if non_native.len() != 1 {
        return None;
    }
    let (token_mint, token_delta) = non_native[0];

    if native_delta == 0.0 || *token_delta == 0.0 {
        return None;
    }

    if native_delta < 0.0 && *token_delta > 0.0 {
        Some(ClassifiedSwap {
            side: TradeSide::Buy,
            token_mint: token_mint.clone(),
            token_amount: token_delta.abs(),
            quote_amount: native_delta.abs(),
        })
    } else if *token_delta < 0.0 && native_delta > 0.0 {
        Some(ClassifiedSwap {
            side: TradeSide::Sell,
            token_mint: token_mint.clone(),
            token_amount: token_delta.abs(),
            quote_amount: native_delta.abs(),
        })
    } else {
        None
    }
}

/// Finds (or inserts) the entry for `account`, preserving the order accounts
/// first appeared in `account_data`.
fn entry_for<'a>(map: &'a mut DeltaMap, account: &str) -> &'a mut HashMap<String, f64> {
    if let Some(pos) = map.iter().position(|(acct, _)| acct == account) {
        &mut map[pos].1
    } else {
        map.push((account.to_string(), HashMap::new()));
        &mut map.last_mut().expect("just pushed").1
    }
}

fn build_delta_map(account_data: &[AccountData]) -> DeltaMap {
    let mut map: DeltaMap = Vec::new();

    for acct in account_data {
        if acct.native_balance_change != 0 {
            let entry = entry_for(&mut map, &acct.account);
            *entry.entry(NATIVE_MINT.to_string()).or_insert(0.0) +=
                acct.native_balance_change as f64 / 10f64.powi(NATIVE_DECIMALS as i32);
        }

        for change in &acct.token_balance_changes {
            let raw: f64 = change.raw_token_amount.token_amount.parse().unwrap_or(0.0);
            let scaled = raw / 10f64.powi(change.raw_token_amount.decimals as i32);
            let entry = entry_for(&mut map, &change.user_account);
            *entry.entry(change.mint.clone()).or_insert(0.0) += scaled;
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::RawTokenAmount;

    fn account(account: &str, native: i64, tokens: Vec<(&str, &str, u8, &str)>) -> AccountData {
        AccountData {
            account: account.to_string(),
            native_balance_change: native,
            token_balance_changes: tokens
                .into_iter()
                .map(|(user, mint, decimals, raw)| crate::webhook::TokenBalanceChange {
                    user_account: user.to_string(),
                    mint: mint.to_string(),
                    raw_token_amount: RawTokenAmount {
                        decimals,
                        token_amount: raw.to_string(),
                    },
                })
                .collect(),
        }
    }

    #[test]
    fn classifies_buy() {
        let payload = vec![account(
            "W",
            -50_000_000,
            vec![("W", "M", 6, "1000000000")],
        )];
        let result = classify(&payload, Some("W")).unwrap();
        assert_eq!(result.side, TradeSide::Buy);
        assert_eq!(result.token_mint, "M");
        assert!((result.token_amount - 1000.0).abs() < 1e-9);
        assert!((result.quote_amount - 0.05).abs() < 1e-9);
    }

    #[test]
    fn classifies_sell() {
        let payload = vec![account(
            "W",
            100_000_000,
            vec![("W", "M", 6, "-500000000")],
        )];
        let result = classify(&payload, Some("W")).unwrap();
        assert_eq!(result.side, TradeSide::Sell);
        assert_eq!(result.token_mint, "M");
        assert!((result.token_amount - 500.0).abs() < 1e-9);
        assert!((result.quote_amount - 0.1).abs() < 1e-9);
    }

    #[test]
    fn zero_non_native_deltas_is_unclassified() {
        let payload = vec![account("W", -50_000_000, vec![])];
        assert!(classify(&payload, Some("W")).is_none());
    }

    #[test]
    fn two_non_native_deltas_is_unclassified() {
        let payload = vec![account(
            "W",
            -50_000_000,
            vec![("W", "M1", 6, "1000000000"), ("W", "M2", 6, "500000000")],
        )];
        assert!(classify(&payload, Some("W")).is_none());
    }

    #[test]
    fn zero_native_delta_is_unclassified() {
        let payload = vec![account("W", 0, vec![("W", "M", 6, "1000000000")])];
        assert!(classify(&payload, Some("W")).is_none());
    }

    #[test]
    fn malformed_raw_amount_is_treated_as_zero() {
        let payload = vec![account("W", -50_000_000, vec![("W", "M", 6, "not-a-number")])];
        // token delta collapses to 0 -> unclassifiable, not a panic.
        assert!(classify(&payload, Some("W")).is_none());
    }

    #[test]
    fn falls_back_to_first_nonzero_account_without_explicit_target() {
        let payload = vec![
            account("Payer", 0, vec![]),
            account("W", -50_000_000, vec![("W", "M", 6, "1000000000")]),
        ];
        let result = classify(&payload, None).unwrap();
        assert_eq!(result.token_mint, "M");
    }

    #[test]
    fn fallback_picks_first_account_in_arrival_order_even_when_later_and_lexically_smaller() {
        // "A" would sort before "ZFirst" in any hash-order-independent
        // comparison; the fallback must still pick the first account that
        // actually appears in the input, not the lexically smallest one.
        let payload = vec![
            account("ZFirst", -50_000_000, vec![("ZFirst", "M", 6, "1000000000")]),
            account("A", 100_000_000, vec![("A", "M2", 6, "-500000000")]),
        ];
        let result = classify(&payload, None).unwrap();
        assert_eq!(result.token_mint, "M");
    }

    #[test]
    fn same_sign_deltas_are_unclassified() {
        // Both positive: not a swap (e.g. two incoming transfers).
        let payload = vec![account("W", 50_000_000, vec![("W", "M", 6, "1000000000")])];
        assert!(classify(&payload, Some("W")).is_none());
    }
}
