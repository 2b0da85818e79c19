use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::adapters::ProviderTransport;
use crate::circuit_breaker::CircuitState;
use crate::data_source::{
    CapabilitySet, DataSource, PriceRequest, RawContext, RawResponse, SourceError, SourceFuture,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::{Interval, LookbackWindow, ProviderId, Ticker};

const QUERY_BASE: &str = "https://www.alphavantage.co/query";

/// Alpha Vantage adapter. Free-tier keys allow 5 calls per minute, which the
/// transport's pacer enforces locally.
#[derive(Clone)]
pub struct AlphaVantageAdapter {
    transport: ProviderTransport,
    api_key: String,
}

impl AlphaVantageAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self::with_policy(http_client, api_key, ProviderPolicy::alphavantage_default())
    }

    pub fn with_policy(
        http_client: Arc<dyn HttpClient>,
        api_key: impl Into<String>,
        policy: ProviderPolicy,
    ) -> Self {
        Self {
            transport: ProviderTransport::new(http_client, policy),
            api_key: api_key.into(),
        }
    }

    pub fn policy(&self) -> &ProviderPolicy {
        self.transport.policy()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.transport.circuit_breaker().state()
    }

    fn query_url(&self, function: &str, symbol: &str, extra: &str) -> String {
        format!(
            "{QUERY_BASE}?function={function}&symbol={}{extra}&apikey={}",
            urlencoding::encode(symbol),
            urlencoding::encode(&self.api_key)
        )
    }

    async fn query(&self, function: &str, ticker: &Ticker, extra: &str) -> Result<Value, SourceError> {
        if self.api_key.trim().is_empty() {
            return Err(SourceError::unauthorized(
                "alphavantage api key is not configured",
            ));
        }

        let url = self.query_url(function, &provider_symbol(ticker), extra);
        self.transport
            .get_json(HttpRequest::get(url), inspect_body)
            .await
    }

    async fn overview(&self, ticker: &Ticker) -> Result<Value, SourceError> {
        let overview = self.query("OVERVIEW", ticker, "").await?;
        let is_empty = overview.as_object().map_or(true, Map::is_empty);
        if is_empty {
            return Err(SourceError::not_found(format!(
                "alphavantage has no company overview for {ticker}"
            )));
        }
        Ok(overview)
    }
}

impl DataSource for AlphaVantageAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Alphavantage
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::full()
    }

    fn fetch_price_series<'a>(&'a self, request: &'a PriceRequest) -> SourceFuture<'a> {
        Box::pin(async move {
            let function = match request.interval {
                Interval::Daily => "TIME_SERIES_DAILY",
                Interval::Weekly => "TIME_SERIES_WEEKLY",
                Interval::Monthly => "TIME_SERIES_MONTHLY",
            };
            // Compact responses hold the last 100 points; enough for up to ~3 months of dailies.
            let extra = match (request.interval, request.window) {
                (Interval::Daily, LookbackWindow::OneMonth | LookbackWindow::ThreeMonths) => {
                    "&outputsize=compact"
                }
                (Interval::Daily, _) => "&outputsize=full",
                _ => "",
            };

            let body = self.query(function, &request.ticker, extra).await?;
            Ok(RawResponse::new(
                ProviderId::Alphavantage,
                RawContext::Price(request.clone()),
                body,
            ))
        })
    }

    fn fetch_fundamentals<'a>(&'a self, ticker: &'a Ticker) -> SourceFuture<'a> {
        Box::pin(async move {
            let overview = self.overview(ticker).await?;

            // Statements only feed the derived metrics; the snapshot stands without them.
            let statements = match self.query("INCOME_STATEMENT", ticker, "").await {
                Ok(statements) => statements,
                Err(error) => {
                    debug!(
                        ticker = %ticker,
                        code = error.code(),
                        "alphavantage income statement unavailable; skipping derived metrics"
                    );
                    Value::Null
                }
            };

            let mut body = Map::new();
            body.insert(String::from("overview"), overview);
            body.insert(String::from("incomeStatement"), statements);
            Ok(RawResponse::new(
                ProviderId::Alphavantage,
                RawContext::Fundamentals(ticker.clone()),
                Value::Object(body),
            ))
        })
    }

    fn fetch_metadata<'a>(&'a self, ticker: &'a Ticker) -> SourceFuture<'a> {
        Box::pin(async move {
            let overview = self.overview(ticker).await?;
            Ok(RawResponse::new(
                ProviderId::Alphavantage,
                RawContext::Metadata(ticker.clone()),
                overview,
            ))
        })
    }
}

/// Alpha Vantage lists Stockholm shares under `.STO` rather than `.ST`.
pub fn provider_symbol(ticker: &Ticker) -> String {
    let symbol = ticker.as_str();
    match symbol.strip_suffix(".ST") {
        Some(base) => format!("{base}.STO"),
        None => symbol.to_owned(),
    }
}

/// Alpha Vantage reports throttling and unknown symbols with HTTP 200.
fn inspect_body(body: &Value) -> Result<(), SourceError> {
    let text = |key: &str| body.get(key).and_then(Value::as_str);

    if let Some(note) = text("Note").or_else(|| text("Information")) {
        return Err(SourceError::rate_limited(format!("alphavantage: {note}")));
    }
    if let Some(message) = text("Error Message") {
        return Err(SourceError::not_found(format!("alphavantage: {message}")));
    }
    if !body.is_object() {
        return Err(SourceError::malformed(
            "alphavantage response is not a JSON object",
        ));
    }
    Ok(())
}
