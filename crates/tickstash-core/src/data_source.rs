use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Interval, LookbackWindow, ProviderId, Ticker};

/// Kind of data a provider call returns; used for capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Price,
    Fundamentals,
    Metadata,
}

impl Endpoint {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Fundamentals => "fundamentals",
            Self::Metadata => "metadata",
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoints a provider serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub price: bool,
    pub fundamentals: bool,
    pub metadata: bool,
}

impl CapabilitySet {
    pub const fn new(price: bool, fundamentals: bool, metadata: bool) -> Self {
        Self {
            price,
            fundamentals,
            metadata,
        }
    }

    pub const fn full() -> Self {
        Self::new(true, true, true)
    }

    pub const fn supports(self, endpoint: Endpoint) -> bool {
        match endpoint {
            Endpoint::Price => self.price,
            Endpoint::Fundamentals => self.fundamentals,
            Endpoint::Metadata => self.metadata,
        }
    }
}

/// Provider failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    RateLimited,
    TransientNetwork,
    NotFound,
    MalformedResponse,
    Unauthorized,
    Unsupported,
}

/// Structured provider error carried into `AllSourcesExhausted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    attempts: u32,
}

impl SourceError {
    fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: 1,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::TransientNetwork, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::NotFound, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::MalformedResponse, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Unauthorized, message)
    }

    pub fn unsupported(endpoint: Endpoint) -> Self {
        Self::new(
            SourceErrorKind::Unsupported,
            format!("endpoint '{endpoint}' is not offered by this provider"),
        )
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Rate limits and transient network errors may succeed on a later attempt.
    pub const fn retryable(&self) -> bool {
        matches!(
            self.kind,
            SourceErrorKind::RateLimited | SourceErrorKind::TransientNetwork
        )
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::TransientNetwork => "source.transient_network",
            SourceErrorKind::NotFound => "source.not_found",
            SourceErrorKind::MalformedResponse => "source.malformed_response",
            SourceErrorKind::Unauthorized => "source.unauthorized",
            SourceErrorKind::Unsupported => "source.unsupported",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Parameters of a price-history request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceRequest {
    pub ticker: Ticker,
    pub interval: Interval,
    pub window: LookbackWindow,
}

impl PriceRequest {
    pub fn new(ticker: Ticker, interval: Interval, window: LookbackWindow) -> Self {
        Self {
            ticker,
            interval,
            window,
        }
    }
}

/// What a raw response was fetched for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawContext {
    Price(PriceRequest),
    Fundamentals(Ticker),
    Metadata(Ticker),
}

impl RawContext {
    pub fn ticker(&self) -> &Ticker {
        match self {
            Self::Price(request) => &request.ticker,
            Self::Fundamentals(ticker) | Self::Metadata(ticker) => ticker,
        }
    }

    pub const fn endpoint(&self) -> Endpoint {
        match self {
            Self::Price(_) => Endpoint::Price,
            Self::Fundamentals(_) => Endpoint::Fundamentals,
            Self::Metadata(_) => Endpoint::Metadata,
        }
    }
}

/// Provider-shaped payload, decoded as JSON but otherwise untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub provider: ProviderId,
    pub context: RawContext,
    pub body: Value,
}

impl RawResponse {
    pub fn new(provider: ProviderId, context: RawContext, body: Value) -> Self {
        Self {
            provider,
            context,
            body,
        }
    }
}

pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<RawResponse, SourceError>> + Send + 'a>>;

/// One external data provider.
///
/// Implementations own their pacing, retries and timeouts: a returned
/// `RateLimited` or `TransientNetwork` error means retries are already exhausted.
pub trait DataSource: Send + Sync {
    fn id(&self) -> ProviderId;

    fn capabilities(&self) -> CapabilitySet;

    fn fetch_price_series<'a>(&'a self, request: &'a PriceRequest) -> SourceFuture<'a>;

    fn fetch_fundamentals<'a>(&'a self, ticker: &'a Ticker) -> SourceFuture<'a>;

    fn fetch_metadata<'a>(&'a self, ticker: &'a Ticker) -> SourceFuture<'a> {
        let _ = ticker;
        Box::pin(async { Err(SourceError::unsupported(Endpoint::Metadata)) })
    }
}
