use std::sync::Arc;

use tracing::{info, warn};

use crate::bus::BusAdapter;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::AppResult;
use crate::kv::{KvStore, RedisKvStore};
use crate::ml_scorer::MlScorer;
use crate::provider::ProviderClient;
use crate::quota::QuotaGate;
use crate::registry::Registry;
use crate::rpc::RpcSurface;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub kv: Arc<dyn KvStore>,
    pub bus: Arc<BusAdapter>,
    pub registry: Arc<Registry>,
    pub quota: Arc<QuotaGate>,
    pub provider: Arc<ProviderClient>,
    pub ml_scorer: Arc<MlScorer>,
    pub dispatcher: Arc<Dispatcher>,
    pub rpc: Arc<RpcSurface>,
}

impl AppState {
    pub async fn new(config: Config) -> AppResult<Self> {
        let config = Arc::new(config);

        info!(url = %config.kv.url, "connecting to kv store");
        let kv: Arc<dyn KvStore> = Arc::new(
            RedisKvStore::connect(&config.kv.url, config.kv.operation_timeout_ms).await?,
        );

        info!(bootstrap_servers = %config.bus.bootstrap_servers, "connecting to bus");
        let bus = Arc::new(BusAdapter::connect(config.clone())?);

        let provider = if config.provider.api_key.is_some() {
            Arc::new(ProviderClient::new(&config))
        } else {
            warn!("PROVIDER_API_KEY not set, running with provider registration disabled");
            Arc::new(ProviderClient::disabled(config.clone()))
        };

        let registry = Arc::new(Registry::new(kv.clone(), config.clone(), provider.clone()));
        let quota = Arc::new(QuotaGate::new(kv.clone(), config.clone()));
        let ml_scorer = Arc::new(MlScorer::new(config.clone()));

        let dispatcher = Arc::new(Dispatcher::new(
            kv.clone(),
            config.clone(),
            bus.clone(),
            registry.clone(),
            quota.clone(),
            ml_scorer.clone(),
        ));

        let rpc = Arc::new(RpcSurface::new(
            registry.clone(),
            provider.clone(),
            kv.clone(),
            config.clone(),
        ));

        Ok(Self {
            config,
            kv,
            bus,
            registry,
            quota,
            provider,
            ml_scorer,
            dispatcher,
            rpc,
        })
    }
}
