//! Cache-first resolution of one ticker and data type.
//!
//! `get` reads the cache, returns a fresh entry without touching any provider,
//! and otherwise walks the provider chain. A provider result is written back
//! through the cache; when every provider fails a stale entry is served with
//! `stale = true` unless the caller asked for strict freshness.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{
    AuditOutcome, BackendKind, CacheEntry, CacheKey, CacheStore, CallScope, FetchAuditRecord,
    Payload,
};
use crate::data_source::{PriceRequest, RawContext};
use crate::domain::{CompanyMetadata, FundamentalsSnapshot};
use crate::freshness::{is_fresh, DataType, FreshnessPolicy};
use crate::routing::{ProviderChain, ProviderFailure};
use crate::session::{Clock, MarketCalendar, SystemClock};
use crate::{Interval, LookbackWindow, PriceSeries, ProviderId, Ticker, UtcDateTime};

/// What to resolve for a ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataRequest {
    Price {
        interval: Interval,
        window: LookbackWindow,
    },
    Fundamentals,
    Metadata,
}

impl DataRequest {
    pub fn cache_key(&self, ticker: &Ticker) -> CacheKey {
        match *self {
            Self::Price { interval, window } => CacheKey::Price {
                ticker: ticker.clone(),
                interval,
                window,
            },
            Self::Fundamentals => CacheKey::Fundamentals(ticker.clone()),
            Self::Metadata => CacheKey::Metadata(ticker.clone()),
        }
    }

    pub fn data_type(&self) -> DataType {
        match *self {
            Self::Price { interval, .. } => DataType::for_interval(interval),
            Self::Fundamentals => DataType::Fundamentals,
            Self::Metadata => DataType::Metadata,
        }
    }

    fn provider_call(&self, ticker: &Ticker) -> RawContext {
        match *self {
            Self::Price { interval, window } => {
                RawContext::Price(PriceRequest::new(ticker.clone(), interval, window))
            }
            Self::Fundamentals => RawContext::Fundamentals(ticker.clone()),
            Self::Metadata => RawContext::Metadata(ticker.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Fail instead of serving a stale entry when every provider fails.
    pub strict_freshness: bool,
}

impl GetOptions {
    pub const fn strict() -> Self {
        Self {
            strict_freshness: true,
        }
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum Origin {
    Cache { backend: BackendKind },
    Provider,
}

/// A value handed to the caller, fresh or explicitly marked stale.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T = Payload> {
    pub value: T,
    /// Provider that originally produced the value.
    pub source: ProviderId,
    pub fetched_at: UtcDateTime,
    pub origin: Origin,
    pub stale: bool,
    /// Providers that failed during this call, in the order tried.
    pub failures: Vec<ProviderFailure>,
}

impl<T> Resolved<T> {
    pub fn cache_hit(&self) -> bool {
        matches!(self.origin, Origin::Cache { .. })
    }

    /// Same provenance, transformed value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        let Self {
            value,
            source,
            fetched_at,
            origin,
            stale,
            failures,
        } = self;
        Resolved {
            value: f(value),
            source,
            fetched_at,
            origin,
            stale,
            failures,
        }
    }

    fn with_value<U>(self, value: U) -> Resolved<U> {
        self.map(|_| value)
    }
}

impl Resolved<Payload> {
    fn from_entry(entry: CacheEntry, stale: bool, failures: Vec<ProviderFailure>) -> Self {
        Self {
            value: entry.payload,
            source: entry.provider,
            fetched_at: entry.fetched_at,
            origin: Origin::Cache {
                backend: entry.backend,
            },
            stale,
            failures,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    #[error("all sources exhausted for {ticker} {data_type}: {}", FailureSummary(.failures))]
    AllSourcesExhausted {
        ticker: Ticker,
        data_type: DataType,
        /// One entry per configured provider, in priority order.
        failures: Vec<ProviderFailure>,
        /// A stale entry existed but strict freshness was requested.
        stale_available: bool,
    },

    #[error("resolved {found} payload where {expected} was requested")]
    PayloadMismatch {
        expected: DataType,
        found: &'static str,
    },
}

impl FetchError {
    pub fn failures(&self) -> &[ProviderFailure] {
        match self {
            Self::AllSourcesExhausted { failures, .. } => failures,
            Self::PayloadMismatch { .. } => &[],
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::AllSourcesExhausted { .. } => "fetch.all_sources_exhausted",
            Self::PayloadMismatch { .. } => "fetch.payload_mismatch",
        }
    }
}

struct FailureSummary<'a>(&'a [ProviderFailure]);

impl Display for FailureSummary<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no providers configured");
        }
        for (index, failure) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Entry point for data requests. Owns no global state; everything it needs is injected.
pub struct DataOrchestrator {
    cache: CacheStore,
    chain: ProviderChain,
    policy: FreshnessPolicy,
    calendar: MarketCalendar,
    clock: Arc<dyn Clock>,
}

impl DataOrchestrator {
    pub fn new(cache: CacheStore, chain: ProviderChain) -> Self {
        Self {
            cache,
            chain,
            policy: FreshnessPolicy::default(),
            calendar: MarketCalendar::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_policy(mut self, policy: FreshnessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_calendar(mut self, calendar: MarketCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub async fn get(
        &self,
        ticker: &Ticker,
        request: &DataRequest,
        options: GetOptions,
    ) -> Result<Resolved, FetchError> {
        let started = Instant::now();
        let now = self.clock.now();
        let key = request.cache_key(ticker);
        let data_type = key.data_type();
        let threshold = self.policy.threshold(data_type, now, &self.calendar);
        let mut scope = CallScope::new();

        let cached = self.cache.read(&key, &mut scope).await;
        if let Some(entry) = cached.as_ref() {
            if is_fresh(entry.fetched_at, now, threshold) {
                debug!(key = %key, backend = %entry.backend, "serving fresh cache entry");
                let audit = served_from(
                    self.audit(&key, now, started, AuditOutcome::CacheHit),
                    entry,
                );
                self.cache.append_audit(&audit, &scope).await;
                return Ok(Resolved::from_entry(entry.clone(), false, Vec::new()));
            }
            debug!(
                key = %key,
                fetched_at = %entry.fetched_at,
                threshold_secs = threshold.whole_seconds(),
                "cache entry is stale"
            );
        }

        match self.chain.resolve(&request.provider_call(ticker)).await {
            Ok(success) => {
                let fetched_at = self.clock.now();
                let written = match self
                    .cache
                    .write(&key, &success.payload, success.provider, fetched_at, &mut scope)
                    .await
                {
                    Ok(stored) => {
                        info!(
                            key = %key,
                            provider = %success.provider,
                            stored = ?stored,
                            "cache write-back complete"
                        );
                        stored.first().copied()
                    }
                    Err(error) => {
                        warn!(key = %key, error = %error, "cache write-back failed");
                        None
                    }
                };

                let mut audit = self.audit(&key, fetched_at, started, AuditOutcome::Fetched);
                audit.backend = written;
                audit.provider = Some(success.provider);
                self.cache.append_audit(&audit, &scope).await;

                Ok(Resolved {
                    value: success.payload,
                    source: success.provider,
                    fetched_at,
                    origin: Origin::Provider,
                    stale: false,
                    failures: success.failures,
                })
            }
            Err(failures) => match cached {
                Some(entry) if !options.strict_freshness => {
                    warn!(
                        key = %key,
                        fetched_at = %entry.fetched_at,
                        failed = failures.len(),
                        "all providers failed; serving stale cache entry"
                    );
                    let audit = served_from(
                        self.audit(&key, now, started, AuditOutcome::StaleFallback),
                        &entry,
                    );
                    self.cache.append_audit(&audit, &scope).await;
                    Ok(Resolved::from_entry(entry, true, failures))
                }
                cached => {
                    warn!(key = %key, failed = failures.len(), "all sources exhausted");
                    let audit = self.audit(&key, now, started, AuditOutcome::Exhausted);
                    self.cache.append_audit(&audit, &scope).await;
                    Err(FetchError::AllSourcesExhausted {
                        ticker: ticker.clone(),
                        data_type,
                        failures,
                        stale_available: cached.is_some(),
                    })
                }
            },
        }
    }

    pub async fn get_price(
        &self,
        ticker: &Ticker,
        interval: Interval,
        window: LookbackWindow,
        options: GetOptions,
    ) -> Result<Resolved<PriceSeries>, FetchError> {
        let request = DataRequest::Price { interval, window };
        let resolved = self.get(ticker, &request, options).await?;
        match resolved.value.clone() {
            Payload::Price(series) => Ok(resolved.with_value(series)),
            other => Err(mismatch(request.data_type(), &other)),
        }
    }

    pub async fn get_fundamentals(
        &self,
        ticker: &Ticker,
        options: GetOptions,
    ) -> Result<Resolved<FundamentalsSnapshot>, FetchError> {
        let resolved = self.get(ticker, &DataRequest::Fundamentals, options).await?;
        match resolved.value.clone() {
            Payload::Fundamentals(snapshot) => Ok(resolved.with_value(snapshot)),
            other => Err(mismatch(DataType::Fundamentals, &other)),
        }
    }

    pub async fn get_metadata(
        &self,
        ticker: &Ticker,
        options: GetOptions,
    ) -> Result<Resolved<CompanyMetadata>, FetchError> {
        let resolved = self.get(ticker, &DataRequest::Metadata, options).await?;
        match resolved.value.clone() {
            Payload::Metadata(metadata) => Ok(resolved.with_value(metadata)),
            other => Err(mismatch(DataType::Metadata, &other)),
        }
    }

    fn audit(
        &self,
        key: &CacheKey,
        at: UtcDateTime,
        started: Instant,
        outcome: AuditOutcome,
    ) -> FetchAuditRecord {
        FetchAuditRecord {
            ticker: key.ticker().clone(),
            data_type: key.data_type(),
            fetched_at: at,
            hit: false,
            duration_ms: started.elapsed().as_millis() as u64,
            backend: None,
            provider: None,
            outcome,
        }
    }
}

fn served_from(mut audit: FetchAuditRecord, entry: &CacheEntry) -> FetchAuditRecord {
    audit.hit = true;
    audit.backend = Some(entry.backend);
    audit.provider = Some(entry.provider);
    audit
}

fn mismatch(expected: DataType, found: &Payload) -> FetchError {
    let found = match found {
        Payload::Price(_) => "price",
        Payload::Fundamentals(_) => "fundamentals",
        Payload::Metadata(_) => "metadata",
    };
    FetchError::PayloadMismatch { expected, found }
}
