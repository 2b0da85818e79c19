//! Dual-backend cache store.
//!
//! Reads go to the primary backend and fall through to the secondary on a
//! miss, an unreadable row, or a backend failure; the first hit wins and
//! results are never merged. Writes go through to every reachable backend but
//! only the primary's outcome is reported. A backend that fails during a call
//! is recorded in that call's [`CallScope`] and not touched again until the
//! next call.

mod local;
mod memory;
mod remote;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tickstash_warehouse::{CacheRow, FetchLogRecord};
use tracing::{debug, info, warn};

use crate::domain::{CompanyMetadata, FundamentalsSnapshot};
use crate::freshness::DataType;
use crate::{Interval, LookbackWindow, PriceSeries, ProviderId, Ticker, UtcDateTime};

pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use remote::RemoteBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Remote,
    Memory,
}

impl BackendKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Memory => "memory",
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one cached value: ticker, data type and request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Price {
        ticker: Ticker,
        interval: Interval,
        window: LookbackWindow,
    },
    Fundamentals(Ticker),
    Metadata(Ticker),
}

impl CacheKey {
    pub fn ticker(&self) -> &Ticker {
        match self {
            Self::Price { ticker, .. } | Self::Fundamentals(ticker) | Self::Metadata(ticker) => {
                ticker
            }
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::Price { interval, .. } => DataType::for_interval(*interval),
            Self::Fundamentals(_) => DataType::Fundamentals,
            Self::Metadata(_) => DataType::Metadata,
        }
    }

    /// Flat string form used by key-value backends.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Price {
                ticker,
                interval,
                window,
            } => format!("price:{ticker}:{interval}:{window}"),
            Self::Fundamentals(ticker) => format!("fundamentals:{ticker}"),
            Self::Metadata(ticker) => format!("metadata:{ticker}"),
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Normalized value that can be cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Price(PriceSeries),
    Fundamentals(FundamentalsSnapshot),
    Metadata(CompanyMetadata),
}

impl Payload {
    pub fn ticker(&self) -> &Ticker {
        match self {
            Self::Price(series) => series.ticker(),
            Self::Fundamentals(snapshot) => &snapshot.ticker,
            Self::Metadata(metadata) => &metadata.ticker,
        }
    }

    /// Whether this payload is the value for `key`.
    pub fn matches(&self, key: &CacheKey) -> bool {
        match (self, key) {
            (
                Self::Price(series),
                CacheKey::Price {
                    ticker,
                    interval,
                    window,
                },
            ) => {
                series.ticker() == ticker
                    && series.interval() == *interval
                    && series.window() == *window
            }
            (Self::Fundamentals(snapshot), CacheKey::Fundamentals(ticker)) => {
                &snapshot.ticker == ticker
            }
            (Self::Metadata(metadata), CacheKey::Metadata(ticker)) => &metadata.ticker == ticker,
            _ => false,
        }
    }

    fn decode(key: &CacheKey, text: &str) -> Result<Self, serde_json::Error> {
        Ok(match key {
            CacheKey::Price { .. } => Self::Price(serde_json::from_str(text)?),
            CacheKey::Fundamentals(_) => Self::Fundamentals(serde_json::from_str(text)?),
            CacheKey::Metadata(_) => Self::Metadata(serde_json::from_str(text)?),
        })
    }
}

/// A decoded cache hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: Payload,
    pub provider: ProviderId,
    pub fetched_at: UtcDateTime,
    pub backend: BackendKind,
}

/// How one orchestrator call ended, as recorded in the fetch log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    CacheHit,
    Fetched,
    StaleFallback,
    Exhausted,
}

impl AuditOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CacheHit => "cache_hit",
            Self::Fetched => "fetched",
            Self::StaleFallback => "stale_fallback",
            Self::Exhausted => "exhausted",
        }
    }
}

/// Append-only diagnostic record; never read back for decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAuditRecord {
    pub ticker: Ticker,
    pub data_type: DataType,
    pub fetched_at: UtcDateTime,
    pub hit: bool,
    pub duration_ms: u64,
    pub backend: Option<BackendKind>,
    pub provider: Option<ProviderId>,
    pub outcome: AuditOutcome,
}

impl FetchAuditRecord {
    pub fn to_log_record(&self) -> FetchLogRecord {
        FetchLogRecord {
            ticker: self.ticker.as_str().to_owned(),
            data_type: self.data_type.as_str().to_owned(),
            fetched_at: self.fetched_at.format_rfc3339(),
            hit: self.hit,
            duration_ms: self.duration_ms,
            backend: self.backend.map(|backend| backend.as_str().to_owned()),
            provider: self.provider.map(|provider| provider.as_str().to_owned()),
            outcome: self.outcome.as_str().to_owned(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{backend} backend unavailable: {message}")]
    Unavailable {
        backend: BackendKind,
        message: String,
    },

    #[error("{backend} backend returned an unreadable row: {message}")]
    Serialization {
        backend: BackendKind,
        message: String,
    },
}

impl BackendError {
    pub fn unavailable(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Unavailable {
            backend,
            message: message.into(),
        }
    }

    pub fn serialization(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Serialization {
            backend,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to encode cache payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{backend} backend was skipped after an earlier failure in this call")]
    Skipped { backend: BackendKind },

    #[error("payload for {payload_ticker} does not belong to cache key {key}")]
    KeyMismatch {
        key: String,
        payload_ticker: Ticker,
    },

    #[error("no cache backend is reachable")]
    NoBackend,
}

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Storage technology behind the cache. Rows are stored as opaque JSON text;
/// decoding is the store's job.
pub trait CacheBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn read<'a>(&'a self, key: &'a CacheKey) -> BackendFuture<'a, Option<CacheRow>>;

    /// Replaces any existing row for `key`.
    fn write<'a>(&'a self, key: &'a CacheKey, row: &'a CacheRow) -> BackendFuture<'a, ()>;

    fn append_audit<'a>(&'a self, record: &'a FetchLogRecord) -> BackendFuture<'a, ()>;

    /// One-off reachability check made while the store is assembled.
    fn probe<'a>(&'a self) -> BackendFuture<'a, ()>;
}

/// Backends that failed earlier in the current call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallScope {
    skipped: Vec<BackendKind>,
}

impl CallScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(&mut self, backend: BackendKind) {
        if !self.skipped.contains(&backend) {
            self.skipped.push(backend);
        }
    }

    pub fn is_skipped(&self, backend: BackendKind) -> bool {
        self.skipped.contains(&backend)
    }

    pub fn skipped(&self) -> &[BackendKind] {
        &self.skipped
    }
}

/// Cache over a primary and an optional secondary backend.
#[derive(Clone)]
pub struct CacheStore {
    primary: Arc<dyn CacheBackend>,
    secondary: Option<Arc<dyn CacheBackend>>,
}

impl CacheStore {
    pub fn new(primary: Arc<dyn CacheBackend>, secondary: Option<Arc<dyn CacheBackend>>) -> Self {
        Self { primary, secondary }
    }

    /// Probes `candidates` in preference order once and keeps the first two
    /// reachable ones as primary and secondary.
    pub async fn connect(candidates: Vec<Arc<dyn CacheBackend>>) -> Result<Self, CacheError> {
        let mut reachable = Vec::with_capacity(2);
        for backend in candidates {
            if reachable.len() == 2 {
                break;
            }
            match backend.probe().await {
                Ok(()) => reachable.push(backend),
                Err(error) => warn!(
                    backend = %backend.kind(),
                    error = %error,
                    "excluding unreachable cache backend"
                ),
            }
        }

        let mut reachable = reachable.into_iter();
        let primary = reachable.next().ok_or(CacheError::NoBackend)?;
        let secondary = reachable.next();
        info!(
            primary = %primary.kind(),
            secondary = secondary.as_ref().map(|backend| backend.kind().as_str()),
            "cache backends selected"
        );
        Ok(Self::new(primary, secondary))
    }

    pub fn primary_kind(&self) -> BackendKind {
        self.primary.kind()
    }

    pub fn secondary_kind(&self) -> Option<BackendKind> {
        self.secondary.as_ref().map(|backend| backend.kind())
    }

    fn backends(&self) -> impl Iterator<Item = &Arc<dyn CacheBackend>> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }

    /// First readable entry for `key`, primary first. Unreadable rows count as a miss.
    pub async fn read(&self, key: &CacheKey, scope: &mut CallScope) -> Option<CacheEntry> {
        for backend in self.backends() {
            let kind = backend.kind();
            if scope.is_skipped(kind) {
                continue;
            }

            match backend.read(key).await {
                Ok(Some(row)) => match decode_row(kind, key, &row) {
                    Ok(entry) => {
                        debug!(key = %key, backend = %kind, "cache entry found");
                        return Some(entry);
                    }
                    Err(error) => {
                        warn!(key = %key, error = %error, "discarding corrupt cache entry");
                    }
                },
                Ok(None) => debug!(key = %key, backend = %kind, "cache miss"),
                Err(error) => {
                    warn!(key = %key, error = %error, "cache read failed; skipping backend");
                    scope.skip(kind);
                }
            }
        }
        None
    }

    /// Writes through to every backend not skipped in this call and returns
    /// the backends that accepted the row, primary first. Fails only when none
    /// did, with the primary's error.
    pub async fn write(
        &self,
        key: &CacheKey,
        payload: &Payload,
        provider: ProviderId,
        fetched_at: UtcDateTime,
        scope: &mut CallScope,
    ) -> Result<Vec<BackendKind>, CacheError> {
        if !payload.matches(key) {
            return Err(CacheError::KeyMismatch {
                key: key.storage_key(),
                payload_ticker: payload.ticker().clone(),
            });
        }

        let row = CacheRow {
            provider: provider.as_str().to_owned(),
            payload: serde_json::to_string(payload)?,
            fetched_at: fetched_at.format_rfc3339(),
        };

        let mut stored = Vec::with_capacity(2);
        let mut first_error = None;
        for backend in self.backends() {
            let kind = backend.kind();
            if scope.is_skipped(kind) {
                first_error.get_or_insert(CacheError::Skipped { backend: kind });
                continue;
            }
            match backend.write(key, &row).await {
                Ok(()) => stored.push(kind),
                Err(error) => {
                    warn!(key = %key, backend = %kind, error = %error, "cache write failed");
                    scope.skip(kind);
                    first_error.get_or_insert(CacheError::from(error));
                }
            }
        }

        match first_error {
            Some(error) if stored.is_empty() => Err(error),
            _ => {
                debug!(key = %key, stored = ?stored, provider = %provider, "cache written");
                Ok(stored)
            }
        }
    }

    /// Appends `record` to every backend not skipped in this call. Failures are logged only.
    pub async fn append_audit(&self, record: &FetchAuditRecord, scope: &CallScope) {
        let row = record.to_log_record();
        for backend in self.backends() {
            let kind = backend.kind();
            if scope.is_skipped(kind) {
                continue;
            }
            if let Err(error) = backend.append_audit(&row).await {
                warn!(
                    ticker = %record.ticker,
                    backend = %kind,
                    error = %error,
                    "fetch audit append failed"
                );
            }
        }
    }
}

fn decode_row(
    backend: BackendKind,
    key: &CacheKey,
    row: &CacheRow,
) -> Result<CacheEntry, BackendError> {
    let fetched_at = UtcDateTime::parse(&row.fetched_at).map_err(|error| {
        BackendError::serialization(backend, format!("fetched_at: {error}"))
    })?;
    let provider = row.provider.parse::<ProviderId>().map_err(|error| {
        BackendError::serialization(backend, format!("provider: {error}"))
    })?;
    let payload = Payload::decode(key, &row.payload)
        .map_err(|error| BackendError::serialization(backend, format!("payload: {error}")))?;
    if !payload.matches(key) {
        return Err(BackendError::serialization(
            backend,
            format!("payload belongs to a different key than {key}"),
        ));
    }

    Ok(CacheEntry {
        payload,
        provider,
        fetched_at,
        backend,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(value: &str) -> Ticker {
        Ticker::parse(value).expect("ticker")
    }

    #[test]
    fn storage_keys_include_request_parameters() {
        let key = CacheKey::Price {
            ticker: ticker("VOLV-B.ST"),
            interval: Interval::Daily,
            window: LookbackWindow::OneYear,
        };

        assert_eq!(key.storage_key(), "price:VOLV-B.ST:1d:1y");
        assert_eq!(key.data_type(), DataType::PriceDaily);
        assert_eq!(
            CacheKey::Fundamentals(ticker("HM-B.ST")).storage_key(),
            "fundamentals:HM-B.ST"
        );
    }

    #[test]
    fn corrupt_timestamp_is_a_serialization_error() {
        let key = CacheKey::Metadata(ticker("ERIC-B.ST"));
        let row = CacheRow {
            provider: String::from("yahoo"),
            payload: String::from(r#"{"ticker":"ERIC-B.ST","name":"Ericsson"}"#),
            fetched_at: String::from("yesterday"),
        };

        assert!(matches!(
            decode_row(BackendKind::Local, &key, &row),
            Err(BackendError::Serialization { .. })
        ));
    }

    #[test]
    fn payload_for_another_ticker_is_rejected() {
        let key = CacheKey::Metadata(ticker("ERIC-B.ST"));
        let row = CacheRow {
            provider: String::from("yahoo"),
            payload: String::from(r#"{"ticker":"VOLV-B.ST"}"#),
            fetched_at: String::from("2024-03-06T09:00:00Z"),
        };

        assert!(matches!(
            decode_row(BackendKind::Local, &key, &row),
            Err(BackendError::Serialization { .. })
        ));
    }

    #[test]
    fn call_scope_records_each_backend_once() {
        let mut scope = CallScope::new();
        scope.skip(BackendKind::Remote);
        scope.skip(BackendKind::Remote);

        assert!(scope.is_skipped(BackendKind::Remote));
        assert!(!scope.is_skipped(BackendKind::Local));
        assert_eq!(scope.skipped(), &[BackendKind::Remote]);
    }
}
