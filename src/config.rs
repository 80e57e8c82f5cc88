use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment variable error: {0}")]
    EnvVar(#[from] env::VarError),
    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service_name: String,
    pub version: String,
    pub environment: String,
    pub server: ServerConfig,
    pub bus: BusConfig,
    pub kv: KvConfig,
    pub provider: ProviderConfig,
    pub rpc: RpcConfig,
    pub ml_scorer: MlScorerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub request_timeout_ms: u64,
    pub max_request_body_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub bootstrap_servers: String,
    pub consumer_group_id: String,
    pub prefetch: u32,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub processing_timeout_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    pub url: String,
    pub trade_history_ttl_seconds: u64,
    pub counter_ttl_seconds: u64,
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub webhook_id: String,
    pub api_base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub queue_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlScorerConfig {
    pub endpoint: Option<String>,
    pub enabled_kol_wallets: Vec<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "copy-trade-broker".to_string()),
            version: env::var("SERVICE_VERSION").unwrap_or_else(|_| "0.1.0".to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),

            server: ServerConfig {
                host: env::var("WEBHOOK_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env("WEBHOOK_PORT", "3001")?,
                cors_origins: env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "*".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
                request_timeout_ms: parse_env("REQUEST_TIMEOUT_MS", "30000")?,
                max_request_body_size: parse_env("MAX_REQUEST_BODY_SIZE", "5242880")?,
            },

            bus: BusConfig {
                bootstrap_servers: env::var("BUS_URL")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                consumer_group_id: env::var("BUS_CONSUMER_GROUP")
                    .unwrap_or_else(|_| "copy-trade-broker".to_string()),
                prefetch: parse_env("MAX_CONCURRENT_TRADES", "10")?,
                retry_attempts: parse_env("RETRY_ATTEMPTS", "5")?,
                retry_base_delay_ms: parse_env("RETRY_BASE_DELAY_MS", "1000")?,
                processing_timeout_ms: parse_env("PROCESSING_TIMEOUT_MS", "30000")?,
                reconnect_base_delay_ms: parse_env("RECONNECT_BASE_DELAY_MS", "1000")?,
                reconnect_max_delay_ms: parse_env("RECONNECT_MAX_DELAY_MS", "30000")?,
                reconnect_max_attempts: parse_env("RECONNECT_MAX_ATTEMPTS", "10")?,
            },

            kv: KvConfig {
                url: env::var("KV_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                trade_history_ttl_seconds: parse_env("TRADE_HISTORY_TTL_SECONDS", "604800")?,
                counter_ttl_seconds: parse_env("COUNTER_TTL_SECONDS", "86400")?,
                operation_timeout_ms: parse_env("KV_OPERATION_TIMEOUT_MS", "30000")?,
            },

            provider: ProviderConfig {
                webhook_id: env::var("PROVIDER_WEBHOOK_ID").unwrap_or_default(),
                api_base_url: env::var("PROVIDER_API_BASE_URL")
                    .unwrap_or_else(|_| "https://api.helius.xyz/v0".to_string()),
                api_key: env::var("PROVIDER_API_KEY").ok(),
            },

            rpc: RpcConfig {
                queue_name: env::var("RPC_QUEUE_NAME")
                    .unwrap_or_else(|_| "copy_trader_rpc_queue".to_string()),
            },

            ml_scorer: MlScorerConfig {
                endpoint: env::var("ML_SCORER_ENDPOINT").ok(),
                enabled_kol_wallets: env::var("ML_SCORER_KOL_WALLETS")
                    .unwrap_or_default()
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(|s| s.trim().to_string())
                    .collect(),
                timeout_ms: parse_env("ML_SCORER_TIMEOUT_MS", "2000")?,
            },

            logging: LoggingConfig {
                level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
                format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            },
        })
    }

    /// Prefixes a KV key, exchange or queue name with `{environment}_` in
    /// every non-production environment.
    pub fn namespaced(&self, name: &str) -> String {
        if self.environment == "production" {
            name.to_string()
        } else {
            format!("{}_{}", self.environment, name)
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e: T::Err| ConfigError::Parse(format!("{}: {}", key, e)))
}
