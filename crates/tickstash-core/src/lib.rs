//! Core of tickstash: cache-first market data reconciliation.
//!
//! This crate contains:
//! - Canonical domain models and validation
//! - Freshness rules and the market session calendar
//! - The dual-backend cache store and the fetch audit log
//! - Provider adapters with pacing, retries and circuit breaking
//! - Normalization into typed records
//! - The orchestrator, its provider chain and the batch runner

pub mod adapters;
pub mod batch;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod freshness;
pub mod http_client;
pub mod normalize;
pub mod orchestrator;
pub mod provider_policy;
pub mod retry;
pub mod routing;
pub mod session;
pub mod source;
pub mod throttling;

pub use adapters::{AlphaVantageAdapter, YahooAdapter};
pub use batch::{BatchError, BatchItem, BatchRunner, BatchSummary, CancellationFlag};
pub use cache::{
    AuditOutcome, BackendError, BackendKind, CacheBackend, CacheEntry, CacheError, CacheKey,
    CacheStore, CallScope, FetchAuditRecord, LocalBackend, MemoryBackend, Payload, RemoteBackend,
};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{AppConfig, CacheConfig, ConcurrencyConfig, Credentials, RemoteConfig};
pub use data_source::{
    CapabilitySet, DataSource, Endpoint, PriceRequest, RawContext, RawResponse, SourceError,
    SourceErrorKind, SourceFuture,
};
pub use domain::{
    Bar, CompanyMetadata, DerivedMetrics, FundamentalsSnapshot, Interval, LookbackWindow, Metric,
    PriceSeries, Ticker, UtcDateTime,
};
pub use envelope::{Envelope, EnvelopeError, EnvelopeMeta};
pub use error::{ConfigError, ValidationError};
pub use freshness::{is_fresh, DataType, FreshnessPolicy, MaxAge, SessionState};
pub use http_client::{
    HttpClient, HttpError, HttpFuture, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};
pub use normalize::NormalizeError;
pub use orchestrator::{DataOrchestrator, DataRequest, FetchError, GetOptions, Origin, Resolved};
pub use provider_policy::ProviderPolicy;
pub use retry::{Backoff, RetryConfig};
pub use routing::{ChainSuccess, ProviderChain, ProviderFailure};
pub use session::{Clock, FixedClock, MarketCalendar, SystemClock};
pub use source::ProviderId;
pub use throttling::RatePacer;
pub use tickstash_warehouse::{
    QueryGuardrails, QueryResult, Warehouse, WarehouseConfig, WarehouseError,
};
