//! ML scorer client: an opaque synchronous predictor consulted for a
//! configured set of "predictable" KOL wallets, generalized from a single
//! hard-coded wallet to `config.ml_scorer`'s wallet set. Never blocks the
//! pipeline: a timeout or transport failure attaches `probability = 0`
//! rather than propagating an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScoreRequest {
    token_mint: String,
    trade_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreResponse {
    probability: f64,
}

pub struct MlScorer {
    client: reqwest::Client,
    config: Arc<Config>,
}

impl MlScorer {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn is_predictable(&self, kol_wallet: &str) -> bool {
        self.config
            .ml_scorer
            .enabled_kol_wallets
            .iter()
            .any(|w| w == kol_wallet)
    }

    /// Scores a trade if the KOL is in the configured predictable set and an
    /// endpoint is configured. Returns `0.0` on any failure or timeout — the
    /// caller never sees an error from this path.
    pub async fn score(&self, kol_wallet: &str, token_mint: &str, trade_time: DateTime<Utc>) -> f64 {
        if !self.is_predictable(kol_wallet) {
            return 0.0;
        }
        let Some(endpoint) = self.config.ml_scorer.endpoint.as_ref() else {
            return 0.0;
        };

        let request = ScoreRequest {
            token_mint: token_mint.to_string(),
            trade_time,
        };
        let timeout = Duration::from_millis(self.config.ml_scorer.timeout_ms);

        let call = self.client.post(endpoint).json(&request).send();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(response)) => match response.json::<ScoreResponse>().await {
                Ok(parsed) => parsed.probability,
                Err(err) => {
                    tracing::warn!(kol_wallet, error = %err, "ml scorer response undecodable, defaulting to 0");
                    0.0
                }
            },
            Ok(Err(err)) => {
                tracing::warn!(kol_wallet, error = %err, "ml scorer call failed, defaulting to 0");
                0.0
            }
            Err(_) => {
                tracing::warn!(kol_wallet, "ml scorer call timed out, defaulting to 0");
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_wallet_skips_network_call() {
        let mut config = Config::from_env().expect("default config");
        config.ml_scorer.enabled_kol_wallets = vec!["OTHER".to_string()];
        let scorer = MlScorer::new(Arc::new(config));

        assert_eq!(scorer.score("K1", "M", Utc::now()).await, 0.0);
    }

    #[tokio::test]
    async fn no_endpoint_defaults_to_zero_even_when_enabled() {
        let mut config = Config::from_env().expect("default config");
        config.ml_scorer.enabled_kol_wallets = vec!["K1".to_string()];
        config.ml_scorer.endpoint = None;
        let scorer = MlScorer::new(Arc::new(config));

        assert_eq!(scorer.score("K1", "M", Utc::now()).await, 0.0);
    }
}
