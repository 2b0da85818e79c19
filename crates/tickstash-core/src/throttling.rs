use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::provider_policy::ProviderPolicy;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Local request pacing for one provider.
///
/// Callers wait for budget up to `max_wait`; beyond that the pacer gives up so
/// the client can surface `RateLimited` instead of stalling a batch.
#[derive(Clone)]
pub struct RatePacer {
    limiter: Arc<DirectRateLimiter>,
    max_wait: Duration,
}

impl RatePacer {
    pub fn new(quota_window: Duration, quota_limit: u32, max_wait: Duration) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(quota_from_window(
                quota_window,
                quota_limit,
            ))),
            max_wait,
        }
    }

    pub fn from_policy(policy: &ProviderPolicy) -> Self {
        Self::new(policy.quota_window, policy.quota_limit, policy.max_pacing_wait)
    }

    /// Takes one unit of budget without waiting.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Waits for one unit of budget. Returns `Err(max_wait)` when none frees up in time.
    pub async fn acquire(&self) -> Result<(), Duration> {
        if self.try_acquire() {
            return Ok(());
        }

        tokio::time::timeout(self.max_wait, self.limiter.until_ready())
            .await
            .map_err(|_| self.max_wait)
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
