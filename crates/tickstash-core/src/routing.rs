use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::cache::Payload;
use crate::data_source::{DataSource, RawContext, RawResponse, SourceError, SourceErrorKind};
use crate::normalize::{normalize_fundamentals, normalize_metadata, normalize_price};
use crate::ProviderId;

/// Why one provider did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub kind: SourceErrorKind,
    pub code: &'static str,
    pub message: String,
    pub attempts: u32,
}

impl ProviderFailure {
    fn from_source(provider: ProviderId, error: &SourceError) -> Self {
        Self {
            provider,
            kind: error.kind(),
            code: error.code(),
            message: error.message().to_owned(),
            attempts: error.attempts(),
        }
    }
}

impl Display for ProviderFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.provider, self.message, self.code)
    }
}

/// First successful, normalized provider result.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSuccess {
    pub payload: Payload,
    pub provider: ProviderId,
    /// Providers tried and failed before `provider` succeeded.
    pub failures: Vec<ProviderFailure>,
    pub latency_ms: u64,
}

/// Providers in priority order. The only place provider fallback happens.
pub struct ProviderChain {
    sources: Vec<Arc<dyn DataSource>>,
    permits: Arc<Semaphore>,
}

impl ProviderChain {
    /// `max_in_flight` bounds concurrent provider calls across every caller of this chain.
    pub fn new(sources: Vec<Arc<dyn DataSource>>, max_in_flight: usize) -> Self {
        Self {
            sources,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        self.sources.iter().map(|source| source.id()).collect()
    }

    pub fn sources(&self) -> &[Arc<dyn DataSource>] {
        &self.sources
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Tries each provider in order; the first that fetches and normalizes wins.
    /// On exhaustion returns exactly one failure per configured provider.
    pub async fn resolve(&self, call: &RawContext) -> Result<ChainSuccess, Vec<ProviderFailure>> {
        let started = Instant::now();
        let endpoint = call.endpoint();
        let mut failures = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let provider = source.id();
            if !source.capabilities().supports(endpoint) {
                failures.push(ProviderFailure::from_source(
                    provider,
                    &SourceError::unsupported(endpoint),
                ));
                continue;
            }

            let outcome = match self.permits.acquire().await {
                Ok(_permit) => fetch(source.as_ref(), call).await,
                Err(_) => Err(SourceError::transient("provider call pool is closed")),
            };
            let result = outcome.and_then(|raw| {
                normalize(&raw).map_err(|error| SourceError::malformed(error.to_string()))
            });

            match result {
                Ok(payload) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    info!(
                        ticker = %call.ticker(),
                        endpoint = %endpoint,
                        provider = %provider,
                        latency_ms,
                        "provider fetch succeeded"
                    );
                    return Ok(ChainSuccess {
                        payload,
                        provider,
                        failures,
                        latency_ms,
                    });
                }
                Err(error) => {
                    warn!(
                        ticker = %call.ticker(),
                        endpoint = %endpoint,
                        provider = %provider,
                        code = error.code(),
                        error = error.message(),
                        "provider failed; trying next"
                    );
                    failures.push(ProviderFailure::from_source(provider, &error));
                }
            }
        }

        Err(failures)
    }
}

async fn fetch(source: &dyn DataSource, call: &RawContext) -> Result<RawResponse, SourceError> {
    match call {
        RawContext::Price(request) => source.fetch_price_series(request).await,
        RawContext::Fundamentals(ticker) => source.fetch_fundamentals(ticker).await,
        RawContext::Metadata(ticker) => source.fetch_metadata(ticker).await,
    }
}

fn normalize(raw: &RawResponse) -> Result<Payload, crate::normalize::NormalizeError> {
    match raw.context {
        RawContext::Price(_) => normalize_price(raw).map(Payload::Price),
        RawContext::Fundamentals(_) => normalize_fundamentals(raw).map(Payload::Fundamentals),
        RawContext::Metadata(_) => normalize_metadata(raw).map(Payload::Metadata),
    }
}
