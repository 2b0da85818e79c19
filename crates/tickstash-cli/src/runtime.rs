use std::sync::Arc;

use tickstash_core::{
    AlphaVantageAdapter, AppConfig, BackendKind, CacheBackend, CacheError, CacheStore, Credentials,
    DataOrchestrator, DataSource, HttpClient, LocalBackend, MemoryBackend, ProviderChain,
    ProviderId, RemoteBackend, ReqwestHttpClient, YahooAdapter,
};
use tickstash_warehouse::{resolve_tickstash_home, Warehouse, WarehouseConfig};
use tracing::warn;

use crate::error::CliError;

/// Everything a data command needs, assembled once per invocation.
pub struct Runtime {
    pub config: AppConfig,
    pub orchestrator: Arc<DataOrchestrator>,
}

impl Runtime {
    pub async fn build(config: AppConfig, credentials: &Credentials) -> Result<Self, CliError> {
        let http_client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());

        let cache = match CacheStore::connect(cache_candidates(&config, &http_client)).await {
            Ok(cache) => cache,
            Err(CacheError::NoBackend) => {
                warn!("no cache backend is reachable; using a process-local cache");
                CacheStore::new(Arc::new(MemoryBackend::new()), None)
            }
            Err(error) => return Err(error.into()),
        };
        let chain = ProviderChain::new(
            sources(&config.providers()?, &http_client, credentials),
            config.concurrency.provider_calls,
        );
        let orchestrator = DataOrchestrator::new(cache, chain)
            .with_policy(config.freshness_policy()?)
            .with_calendar(config.market.clone());

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
        })
    }
}

pub fn open_local_warehouse(config: &AppConfig) -> Result<Warehouse, CliError> {
    let mut warehouse_config = WarehouseConfig::under_home(resolve_tickstash_home());
    if let Some(path) = &config.cache.local_path {
        warehouse_config.db_path = path.clone();
    }
    Ok(Warehouse::open(warehouse_config)?)
}

/// Backends in preference order: the configured primary first, then the other
/// persistent store.
fn cache_candidates(
    config: &AppConfig,
    http_client: &Arc<dyn HttpClient>,
) -> Vec<Arc<dyn CacheBackend>> {
    let local = match open_local_warehouse(config) {
        Ok(warehouse) => Some(Arc::new(LocalBackend::new(warehouse)) as Arc<dyn CacheBackend>),
        Err(error) => {
            warn!(error = %error, "local cache could not be opened");
            None
        }
    };
    let remote = config.cache.remote.as_ref().map(|remote| {
        Arc::new(
            RemoteBackend::new(Arc::clone(http_client), &remote.url, remote.api_key.clone())
                .with_timeout_ms(remote.timeout_ms),
        ) as Arc<dyn CacheBackend>
    });

    let ordered = match config.cache.primary {
        BackendKind::Remote => [remote, local],
        BackendKind::Local | BackendKind::Memory => [local, remote],
    };
    let mut candidates: Vec<Arc<dyn CacheBackend>> = ordered.into_iter().flatten().collect();
    if config.cache.primary == BackendKind::Memory {
        candidates.insert(0, Arc::new(MemoryBackend::new()));
    }
    candidates
}

fn sources(
    priority: &[ProviderId],
    http_client: &Arc<dyn HttpClient>,
    credentials: &Credentials,
) -> Vec<Arc<dyn DataSource>> {
    priority
        .iter()
        .map(|provider| -> Arc<dyn DataSource> {
            match provider {
                ProviderId::Yahoo => Arc::new(YahooAdapter::new(Arc::clone(http_client))),
                ProviderId::Alphavantage => Arc::new(AlphaVantageAdapter::new(
                    Arc::clone(http_client),
                    credentials.alphavantage_api_key.clone().unwrap_or_default(),
                )),
            }
        })
        .collect()
}
