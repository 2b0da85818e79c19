//! Provider adapters and the resilient transport they share.

pub mod alphavantage;
pub mod yahoo;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::data_source::SourceError;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::provider_policy::ProviderPolicy;
use crate::throttling::RatePacer;
use crate::ProviderId;

pub use alphavantage::AlphaVantageAdapter;
pub use yahoo::YahooAdapter;

/// Checks a decoded body for provider-level errors reported with a 200 status.
pub(crate) type BodyInspector = fn(&Value) -> Result<(), SourceError>;

/// HTTP plumbing owned by one provider client: pacing, retries, timeouts and
/// circuit breaking around a JSON GET.
#[derive(Clone)]
pub(crate) struct ProviderTransport {
    http_client: Arc<dyn HttpClient>,
    policy: ProviderPolicy,
    pacer: RatePacer,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl ProviderTransport {
    pub(crate) fn new(http_client: Arc<dyn HttpClient>, policy: ProviderPolicy) -> Self {
        let pacer = RatePacer::from_policy(&policy);
        let circuit_breaker = Arc::new(CircuitBreaker::new(policy.provider_id, policy.circuit));
        Self {
            http_client,
            policy,
            pacer,
            circuit_breaker,
        }
    }

    pub(crate) fn policy(&self) -> &ProviderPolicy {
        &self.policy
    }

    pub(crate) fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub(crate) fn http_client(&self) -> &Arc<dyn HttpClient> {
        &self.http_client
    }

    /// GETs `request` and decodes the body as JSON, retrying rate limits and
    /// transient failures up to the policy's attempt budget.
    pub(crate) async fn get_json(
        &self,
        request: HttpRequest,
        inspect: BodyInspector,
    ) -> Result<Value, SourceError> {
        let provider = self.policy.provider_id;
        let retry = &self.policy.retry;
        let request = request.with_timeout_ms(self.policy.request_timeout_ms);
        let mut attempts = 0_u32;

        loop {
            if !self.circuit_breaker.allow_request() {
                return Err(SourceError::transient(format!(
                    "{provider} circuit breaker is open; skipping upstream call"
                ))
                .with_attempts(attempts));
            }

            attempts += 1;
            let outcome = match self.pacer.acquire().await {
                Ok(()) => self.attempt(request.clone(), inspect).await,
                Err(waited) => Err(SourceError::rate_limited(format!(
                    "{provider} local rate budget exhausted after waiting {}ms",
                    waited.as_millis()
                ))),
            };

            match outcome {
                Ok(body) => {
                    self.circuit_breaker.record_success();
                    return Ok(body);
                }
                Err(error) if error.retryable() && retry.allows_another(attempts) => {
                    let delay = retry.delay_after(attempts);
                    debug!(
                        provider = %provider,
                        attempt = attempts,
                        code = error.code(),
                        delay_ms = delay.as_millis() as u64,
                        "retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    if error.retryable() {
                        self.circuit_breaker.record_failure();
                    }
                    warn!(
                        provider = %provider,
                        attempts,
                        code = error.code(),
                        error = error.message(),
                        "provider call failed"
                    );
                    return Err(error.with_attempts(attempts));
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: HttpRequest,
        inspect: BodyInspector,
    ) -> Result<Value, SourceError> {
        let provider = self.policy.provider_id;
        let response = self.http_client.execute(request).await.map_err(|error| {
            SourceError::transient(format!("{provider} transport error: {}", error.message()))
        })?;

        classify_status(provider, &response)?;

        let body: Value = serde_json::from_str(&response.body).map_err(|error| {
            SourceError::malformed(format!("{provider} returned invalid JSON: {error}"))
        })?;
        inspect(&body)?;
        Ok(body)
    }
}

/// Maps a non-success HTTP status onto the provider error taxonomy.
pub(crate) fn classify_status(
    provider: ProviderId,
    response: &HttpResponse,
) -> Result<(), SourceError> {
    if response.is_success() {
        return Ok(());
    }

    let status = response.status;
    let message = format!("{provider} upstream returned status {status}");
    Err(match status {
        429 => SourceError::rate_limited(message),
        404 => SourceError::not_found(message),
        401 | 403 => SourceError::unauthorized(message),
        408 | 500..=599 => SourceError::transient(message),
        _ => SourceError::malformed(message),
    })
}
