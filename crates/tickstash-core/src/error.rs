use thiserror::Error;

/// Validation and contract errors exposed by `tickstash-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("ticker cannot be empty")]
    EmptyTicker,

    #[error("invalid interval '{value}', expected one of 1d, 1wk, 1mo")]
    InvalidInterval { value: String },
    #[error("invalid lookback window '{value}', expected one of 1mo, 3mo, 6mo, 1y, 2y, 5y, max")]
    InvalidWindow { value: String },
    #[error("invalid provider '{value}', expected one of yahoo, alphavantage")]
    InvalidProvider { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },

    #[error("bar high must be >= low")]
    InvalidBarRange,
    #[error("bar timestamps must be strictly increasing (violated at index {index})")]
    BarsNotIncreasing { index: usize },

    #[error("request_id must be at least 8 characters")]
    InvalidRequestId,
}

/// Configuration errors. Raised while building policies, never at request time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown data type '{value}', expected one of price_daily, price_weekly, fundamentals, metadata")]
    UnknownDataType { value: String },

    #[error("cache duration for '{data_type}' must be a positive number of hours, got {hours}")]
    NonPositiveDuration { data_type: String, hours: f64 },

    #[error("provider priority list must not be empty")]
    EmptyProviderPriority,
    #[error("provider '{provider}' appears more than once in the priority list")]
    DuplicateProvider { provider: String },

    #[error("{field} must be greater than zero")]
    ZeroLimit { field: &'static str },

    #[error("market calendar: {0}")]
    InvalidCalendar(String),

    #[error("remote backend: {0}")]
    InvalidRemote(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
