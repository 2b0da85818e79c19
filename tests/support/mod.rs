//! Shared doubles and fixtures for the tickstash behavior tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tickstash_core::{
    BackendKind, CacheBackend, CacheKey, CacheStore, CapabilitySet, DataOrchestrator, DataSource,
    FixedClock, HttpClient, HttpError, HttpFuture, HttpRequest, HttpResponse, Payload,
    PriceRequest, ProviderChain, ProviderId, RawContext, RawResponse, SourceError, SourceFuture,
    Ticker, UtcDateTime,
};
use tickstash_core::MemoryBackend;
use tickstash_warehouse::CacheRow;

pub fn ticker(value: &str) -> Ticker {
    Ticker::parse(value).expect("valid ticker")
}

pub fn at(value: &str) -> UtcDateTime {
    UtcDateTime::parse(value).expect("valid timestamp")
}

// =============================================================================
// Scripted data source
// =============================================================================

/// Provider double that replays scripted outcomes per endpoint. The last
/// scripted outcome repeats once the script runs out.
pub struct ScriptedSource {
    id: ProviderId,
    capabilities: CapabilitySet,
    price: Mutex<VecDeque<Result<Value, SourceError>>>,
    fundamentals: Mutex<VecDeque<Result<Value, SourceError>>>,
    metadata: Mutex<VecDeque<Result<Value, SourceError>>>,
    calls: Mutex<Vec<RawContext>>,
}

impl ScriptedSource {
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            capabilities: CapabilitySet::full(),
            price: Mutex::new(VecDeque::new()),
            fundamentals: Mutex::new(VecDeque::new()),
            metadata: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn price(self, outcome: Result<Value, SourceError>) -> Self {
        self.price.lock().expect("lock").push_back(outcome);
        self
    }

    pub fn fundamentals(self, outcome: Result<Value, SourceError>) -> Self {
        self.fundamentals.lock().expect("lock").push_back(outcome);
        self
    }

    pub fn metadata(self, outcome: Result<Value, SourceError>) -> Self {
        self.metadata.lock().expect("lock").push_back(outcome);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }

    fn replay(
        &self,
        script: &Mutex<VecDeque<Result<Value, SourceError>>>,
        context: RawContext,
    ) -> Result<RawResponse, SourceError> {
        self.calls.lock().expect("lock").push(context.clone());
        let mut script = script.lock().expect("lock");
        let outcome = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        let body = outcome.unwrap_or_else(|| Err(SourceError::not_found("nothing scripted")))?;
        Ok(RawResponse::new(self.id, context, body))
    }
}

impl DataSource for ScriptedSource {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn fetch_price_series<'a>(&'a self, request: &'a PriceRequest) -> SourceFuture<'a> {
        Box::pin(async move { self.replay(&self.price, RawContext::Price(request.clone())) })
    }

    fn fetch_fundamentals<'a>(&'a self, ticker: &'a Ticker) -> SourceFuture<'a> {
        Box::pin(async move {
            self.replay(&self.fundamentals, RawContext::Fundamentals(ticker.clone()))
        })
    }

    fn fetch_metadata<'a>(&'a self, ticker: &'a Ticker) -> SourceFuture<'a> {
        Box::pin(async move { self.replay(&self.metadata, RawContext::Metadata(ticker.clone())) })
    }
}

// =============================================================================
// Scripted HTTP client
// =============================================================================

type Outcome = Result<HttpResponse, HttpError>;

/// HTTP double routed by URL substring. Each route replays its outcomes in
/// order and repeats the last one. Unrouted requests fail at the transport level.
#[derive(Default)]
pub struct ScriptedHttpClient {
    routes: Mutex<Vec<(String, VecDeque<Outcome>)>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url_contains: &str, outcomes: Vec<Outcome>) -> Self {
        self.routes
            .lock()
            .expect("lock")
            .push((url_contains.to_owned(), outcomes.into()));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("lock").clone()
    }

    pub fn count_matching(&self, url_contains: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.url.contains(url_contains))
            .count()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let url = request.url.clone();
            self.requests.lock().expect("lock").push(request);

            let mut routes = self.routes.lock().expect("lock");
            let Some((_, outcomes)) = routes
                .iter_mut()
                .find(|(pattern, _)| url.contains(pattern.as_str()))
            else {
                return Err(HttpError::new(format!("no scripted route for {url}")));
            };
            let outcome = if outcomes.len() > 1 {
                outcomes.pop_front()
            } else {
                outcomes.front().cloned()
            };
            outcome.unwrap_or_else(|| Err(HttpError::new("route has no outcomes")))
        })
    }
}

pub fn ok(body: &Value) -> Outcome {
    Ok(HttpResponse::new(200, body.to_string()))
}

pub fn status(code: u16) -> Outcome {
    Ok(HttpResponse::new(code, "{}"))
}

// =============================================================================
// Provider payload fixtures
// =============================================================================

/// Yahoo chart body with one bar per calendar day, stamped 08:00Z (09:00 in
/// Stockholm winter time).
pub fn yahoo_chart(first_day_unix: i64, days: usize) -> Value {
    let timestamps: Vec<i64> = (0..days)
        .map(|day| first_day_unix + day as i64 * 86_400 + 8 * 3_600)
        .collect();
    let closes: Vec<f64> = (0..days).map(|day| 200.0 + day as f64).collect();
    json!({
        "chart": {
            "result": [{
                "meta": {"symbol": "VOLV-B.ST", "currency": "SEK", "gmtoffset": 3600},
                "timestamp": timestamps,
                "indicators": {"quote": [{
                    "open": closes,
                    "high": closes.iter().map(|close| close + 2.0).collect::<Vec<_>>(),
                    "low": closes.iter().map(|close| close - 2.0).collect::<Vec<_>>(),
                    "close": closes,
                    "volume": vec![1_000_000_u64; days],
                }]}
            }],
            "error": null
        }
    })
}

/// Alpha Vantage TIME_SERIES_DAILY body with one bar per `YYYY-MM-DD` date.
pub fn alphavantage_daily(dates: &[&str]) -> Value {
    let series: serde_json::Map<String, Value> = dates
        .iter()
        .enumerate()
        .map(|(index, date)| {
            let close = 150.0 + index as f64;
            (
                (*date).to_owned(),
                json!({
                    "1. open": format!("{close:.4}"),
                    "2. high": format!("{:.4}", close + 1.5),
                    "3. low": format!("{:.4}", close - 1.5),
                    "4. close": format!("{close:.4}"),
                    "5. volume": "2500000"
                }),
            )
        })
        .collect();
    json!({
        "Meta Data": {"1. Information": "Daily Prices", "2. Symbol": "ERIC-B.STO"},
        "Time Series (Daily)": series
    })
}

pub fn yahoo_summary(fields: Value) -> Value {
    json!({"quoteSummary": {"result": [fields], "error": null}})
}

pub fn yahoo_metadata(name: &str) -> Value {
    yahoo_summary(json!({
        "assetProfile": {"sector": "Industrials", "industry": "Farm & Heavy Machinery", "country": "Sweden"},
        "price": {"longName": name, "currency": "SEK", "exchangeName": "Stockholm"}
    }))
}

// =============================================================================
// Cache fixtures and orchestrator wiring
// =============================================================================

pub async fn seed(backend: &MemoryBackend, key: &CacheKey, payload: &Payload, fetched_at: &str) {
    backend
        .insert_row(
            key,
            CacheRow {
                provider: String::from("yahoo"),
                payload: serde_json::to_string(payload).expect("encode payload"),
                fetched_at: fetched_at.to_owned(),
            },
        )
        .await;
}

pub struct Harness {
    pub orchestrator: DataOrchestrator,
    pub local: MemoryBackend,
    pub remote: MemoryBackend,
    pub clock: Arc<FixedClock>,
}

/// Orchestrator over two in-memory backends posing as local and remote, with
/// the given providers in priority order and a clock fixed at `now`.
pub fn harness(sources: Vec<Arc<dyn DataSource>>, now: &str) -> Harness {
    let local = MemoryBackend::posing_as(BackendKind::Local);
    let remote = MemoryBackend::posing_as(BackendKind::Remote);
    let clock = Arc::new(FixedClock::new(at(now)));

    let cache = CacheStore::new(
        Arc::new(local.clone()) as Arc<dyn CacheBackend>,
        Some(Arc::new(remote.clone()) as Arc<dyn CacheBackend>),
    );
    let orchestrator = DataOrchestrator::new(cache, ProviderChain::new(sources, 4))
        .with_clock(clock.clone());

    Harness {
        orchestrator,
        local,
        remote,
        clock,
    }
}
