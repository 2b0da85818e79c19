use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::adapters::ProviderTransport;
use crate::circuit_breaker::CircuitState;
use crate::data_source::{
    CapabilitySet, DataSource, PriceRequest, RawContext, RawResponse, SourceError,
    SourceErrorKind, SourceFuture,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::{ProviderId, Ticker};

const CHART_BASE: &str = "https://query2.finance.yahoo.com/v8/finance/chart";
const SUMMARY_BASE: &str = "https://query2.finance.yahoo.com/v10/finance/quoteSummary";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URL: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";
const REFERER: &str = "https://finance.yahoo.com/";
const CRUMB_TTL: Duration = Duration::from_secs(3600);

const FUNDAMENTALS_MODULES: &str =
    "summaryDetail,defaultKeyStatistics,financialData,incomeStatementHistory";
const METADATA_MODULES: &str = "assetProfile,price";

/// Cached Yahoo crumb. Session cookies live in the HTTP client's jar.
#[derive(Default)]
struct CrumbCache {
    slot: Mutex<Option<(String, Instant)>>,
}

impl CrumbCache {
    /// Returns a crumb, refreshing it when missing or expired. `None` when
    /// Yahoo refuses to issue one; quoteSummary is then tried without it.
    async fn get(&self, http_client: &Arc<dyn HttpClient>) -> Option<String> {
        let mut slot = self.slot.lock().await;
        if let Some((crumb, fetched)) = slot.as_ref() {
            if fetched.elapsed() < CRUMB_TTL {
                return Some(crumb.clone());
            }
        }

        let crumb = fetch_crumb(http_client).await?;
        *slot = Some((crumb.clone(), Instant::now()));
        Some(crumb)
    }

    async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

async fn fetch_crumb(http_client: &Arc<dyn HttpClient>) -> Option<String> {
    // Only the Set-Cookie side effect matters here.
    let _ = http_client
        .execute(HttpRequest::get(COOKIE_URL).with_header("referer", REFERER))
        .await;

    let response = http_client
        .execute(HttpRequest::get(CRUMB_URL).with_header("referer", REFERER))
        .await
        .ok()?;
    let body = response.body.trim();

    let looks_valid = response.is_success()
        && !body.is_empty()
        && body.len() < 100
        && !body.contains(char::is_whitespace)
        && !body.contains('<');
    if !looks_valid {
        debug!(status = response.status, "yahoo refused to issue a crumb");
        return None;
    }
    Some(body.to_owned())
}

/// Yahoo Finance: v8 chart for prices, v10 quoteSummary for fundamentals and metadata.
#[derive(Clone)]
pub struct YahooAdapter {
    transport: ProviderTransport,
    crumb: Arc<CrumbCache>,
}

impl YahooAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_policy(http_client, ProviderPolicy::yahoo_default())
    }

    pub fn with_policy(http_client: Arc<dyn HttpClient>, policy: ProviderPolicy) -> Self {
        Self {
            transport: ProviderTransport::new(http_client, policy),
            crumb: Arc::new(CrumbCache::default()),
        }
    }

    pub fn policy(&self) -> &ProviderPolicy {
        self.transport.policy()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.transport.circuit_breaker().state()
    }

    async fn quote_summary(&self, ticker: &Ticker, modules: &str) -> Result<Value, SourceError> {
        let crumb = self.crumb.get(self.transport.http_client()).await;
        let mut url = format!(
            "{SUMMARY_BASE}/{}?modules={}",
            urlencoding::encode(ticker.as_str()),
            urlencoding::encode(modules)
        );
        if let Some(crumb) = crumb {
            url.push_str("&crumb=");
            url.push_str(&urlencoding::encode(&crumb));
        }

        let request = HttpRequest::get(url).with_header("referer", REFERER);
        let result = self.transport.get_json(request, inspect_summary).await;
        if matches!(&result, Err(error) if error.kind() == SourceErrorKind::Unauthorized) {
            self.crumb.invalidate().await;
        }
        result
    }
}

impl DataSource for YahooAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Yahoo
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::full()
    }

    fn fetch_price_series<'a>(&'a self, request: &'a PriceRequest) -> SourceFuture<'a> {
        Box::pin(async move {
            let url = format!(
                "{CHART_BASE}/{}?range={}&interval={}&includePrePost=false&events=div%2Csplit",
                urlencoding::encode(request.ticker.as_str()),
                request.window.as_str(),
                request.interval.as_str()
            );
            let http_request = HttpRequest::get(url).with_header("referer", REFERER);
            let body = self.transport.get_json(http_request, inspect_chart).await?;
            Ok(RawResponse::new(
                ProviderId::Yahoo,
                RawContext::Price(request.clone()),
                body,
            ))
        })
    }

    fn fetch_fundamentals<'a>(&'a self, ticker: &'a Ticker) -> SourceFuture<'a> {
        Box::pin(async move {
            let body = self.quote_summary(ticker, FUNDAMENTALS_MODULES).await?;
            Ok(RawResponse::new(
                ProviderId::Yahoo,
                RawContext::Fundamentals(ticker.clone()),
                body,
            ))
        })
    }

    fn fetch_metadata<'a>(&'a self, ticker: &'a Ticker) -> SourceFuture<'a> {
        Box::pin(async move {
            let body = self.quote_summary(ticker, METADATA_MODULES).await?;
            Ok(RawResponse::new(
                ProviderId::Yahoo,
                RawContext::Metadata(ticker.clone()),
                body,
            ))
        })
    }
}

fn inspect_chart(body: &Value) -> Result<(), SourceError> {
    let chart = body
        .get("chart")
        .ok_or_else(|| SourceError::malformed("yahoo chart response has no 'chart' object"))?;
    check_yahoo_error(chart.get("error"))?;

    let has_result = chart
        .get("result")
        .and_then(Value::as_array)
        .is_some_and(|result| !result.is_empty());
    if !has_result {
        return Err(SourceError::not_found("yahoo chart returned no result"));
    }
    Ok(())
}

fn inspect_summary(body: &Value) -> Result<(), SourceError> {
    let summary = body.get("quoteSummary").ok_or_else(|| {
        SourceError::malformed("yahoo quoteSummary response has no 'quoteSummary' object")
    })?;
    check_yahoo_error(summary.get("error"))?;

    let has_result = summary
        .get("result")
        .and_then(Value::as_array)
        .is_some_and(|result| !result.is_empty());
    if !has_result {
        return Err(SourceError::not_found("yahoo quoteSummary returned no result"));
    }
    Ok(())
}

fn check_yahoo_error(error: Option<&Value>) -> Result<(), SourceError> {
    let Some(error) = error.filter(|error| !error.is_null()) else {
        return Ok(());
    };

    let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
    let description = error
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or(code);
    let message = format!("yahoo error: {description}");

    Err(match code {
        "Not Found" => SourceError::not_found(message),
        "Unauthorized" => SourceError::unauthorized(message),
        "Too Many Requests" => SourceError::rate_limited(message),
        _ => SourceError::malformed(message),
    })
}
