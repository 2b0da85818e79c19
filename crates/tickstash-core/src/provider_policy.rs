use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::{Backoff, RetryConfig};
use crate::ProviderId;

/// Rate-limit, retry and timeout discipline for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    pub quota_window: Duration,
    pub quota_limit: u32,
    /// Longest a call waits locally for rate budget before reporting `RateLimited`.
    pub max_pacing_wait: Duration,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub circuit: CircuitBreakerConfig,
}

impl ProviderPolicy {
    pub fn yahoo_default() -> Self {
        Self {
            provider_id: ProviderId::Yahoo,
            quota_window: Duration::from_secs(60),
            quota_limit: 60,
            max_pacing_wait: Duration::from_secs(5),
            request_timeout_ms: 8_000,
            retry: RetryConfig::default(),
            circuit: CircuitBreakerConfig::default(),
        }
    }

    /// Free tier: 5 requests per minute.
    pub fn alphavantage_default() -> Self {
        Self {
            provider_id: ProviderId::Alphavantage,
            quota_window: Duration::from_secs(60),
            quota_limit: 5,
            max_pacing_wait: Duration::from_secs(15),
            request_timeout_ms: 10_000,
            retry: RetryConfig {
                max_attempts: 3,
                backoff: Backoff::Exponential {
                    base: Duration::from_secs(2),
                    factor: 2.0,
                    max: Duration::from_secs(20),
                    jitter: true,
                },
            },
            circuit: CircuitBreakerConfig::default(),
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Yahoo => Self::yahoo_default(),
            ProviderId::Alphavantage => Self::alphavantage_default(),
        }
    }

    /// Same limits with near-zero waits, for exercising retry paths quickly.
    pub fn with_fast_retries(mut self) -> Self {
        self.retry = RetryConfig::fixed(Duration::from_millis(1), self.retry.max_attempts);
        self.max_pacing_wait = Duration::from_millis(5);
        self
    }
}
