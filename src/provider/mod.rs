//! External blockchain-index provider client: the third-party service
//! that supplies inbound webhook payloads and exposes a simple
//! address-registration API. Same `reqwest` client shape, "configured vs
//! not" gate, and error-on-non-2xx handling as a Helius webhook client.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
struct GetAllWebhooksResponse {
    #[serde(default, rename = "accountAddresses")]
    account_addresses: Vec<String>,
}

/// Thin wrapper over the provider's webhook-address-registration API. When
/// no API key is configured the client is inert: registration calls are
/// no-ops rather than errors, so local/dev environments without provider
/// credentials still run the rest of the broker.
pub struct ProviderClient {
    client: reqwest::Client,
    api_base_url: String,
    api_key: Option<String>,
    webhook_id: String,
}

impl ProviderClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build provider HTTP client"),
            api_base_url: config.provider.api_base_url.clone(),
            api_key: config.provider.api_key.clone(),
            webhook_id: config.provider.webhook_id.clone(),
        }
    }

    /// A client with no credentials configured; `syncWithProvider` and the
    /// registration calls become no-ops. Used by tests and by deployments
    /// that have not yet provisioned provider credentials.
    pub fn disabled(config: Arc<Config>) -> Self {
        Self::new(&config)
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && !self.webhook_id.is_empty()
    }

    pub async fn append_addresses(&self, addresses: &[String]) -> AppResult<()> {
        if !self.is_configured() || addresses.is_empty() {
            return Ok(());
        }
        let api_key = self.api_key.as_ref().unwrap();
        let url = format!(
            "{}/webhooks/{}?api-key={}",
            self.api_base_url, self.webhook_id, api_key
        );
        let response = self
            .client
            .put(&url)
            .json(&serde_json::json!({ "accountAddresses": addresses }))
            .send()
            .await?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderError(format!(
                "append addresses failed: {body}"
            )));
        }
        Ok(())
    }

    pub async fn remove_addresses(&self, addresses: &[String]) -> AppResult<()> {
        if !self.is_configured() || addresses.is_empty() {
            return Ok(());
        }
        let api_key = self.api_key.as_ref().unwrap();
        let url = format!(
            "{}/webhooks/{}/remove?api-key={}",
            self.api_base_url, self.webhook_id, api_key
        );
        let response = self
            .client
            .put(&url)
            .json(&serde_json::json!({ "accountAddresses": addresses }))
            .send()
            .await?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderError(format!(
                "remove addresses failed: {body}"
            )));
        }
        Ok(())
    }

    /// Returns the addresses currently registered against the configured
    /// webhook. Used by `syncWithProvider` for reconciliation; returns an
    /// empty list rather than erroring when no credentials are configured.
    pub async fn list_watched_addresses(&self) -> AppResult<Vec<String>> {
        if !self.is_configured() {
            return Ok(Vec::new());
        }
        let api_key = self.api_key.as_ref().unwrap();
        let url = format!(
            "{}/webhooks/{}?api-key={}",
            self.api_base_url, self.webhook_id, api_key
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderError(format!(
                "list webhook failed: {body}"
            )));
        }
        let parsed: GetAllWebhooksResponse = response.json().await?;
        Ok(parsed.account_addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_is_inert() {
        let mut config = Config::from_env().expect("default config");
        config.provider.api_key = None;
        let client = ProviderClient::new(&config);

        assert!(!client.is_configured());
        client.append_addresses(&["K1".to_string()]).await.unwrap();
        client.remove_addresses(&["K1".to_string()]).await.unwrap();
        assert!(client.list_watched_addresses().await.unwrap().is_empty());
    }
}
