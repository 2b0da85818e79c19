//! Behavior-driven tests for multi-ticker batches.
//!
//! These tests verify HOW a batch isolates per-ticker failures, honours its
//! concurrency bounds and reacts to cooperative cancellation.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tickstash_core::{
    BackendKind, BatchError, BatchRunner, BatchSummary, CacheBackend, CacheKey, CacheStore,
    CancellationFlag, CapabilitySet, DataOrchestrator, DataRequest, DataSource, FetchError,
    FixedClock, FundamentalsSnapshot, GetOptions, Interval, LookbackWindow, MemoryBackend, Metric,
    Payload, PriceRequest, ProviderChain, ProviderId, RawContext, RawResponse, SourceError,
    SourceFuture, Ticker,
};

use support::{at, harness, seed, ticker, yahoo_chart, ScriptedSource};

const WEDNESDAY_NOON: &str = "2024-03-06T12:00:00Z";

fn daily() -> DataRequest {
    DataRequest::Price {
        interval: Interval::Daily,
        window: LookbackWindow::OneYear,
    }
}

fn tickers(symbols: &[&str]) -> Vec<Ticker> {
    symbols.iter().map(|symbol| ticker(symbol)).collect()
}

/// Price source that holds each call open for a while and records the
/// highest number of overlapping calls. Optionally raises a cancellation
/// flag from inside its first call.
struct SlowSource {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    cancel_on_first_call: Option<CancellationFlag>,
}

impl SlowSource {
    fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            cancel_on_first_call: None,
        }
    }

    fn cancelling(flag: CancellationFlag) -> Self {
        Self {
            cancel_on_first_call: Some(flag),
            ..Self::new()
        }
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DataSource for SlowSource {
    fn id(&self) -> ProviderId {
        ProviderId::Yahoo
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(true, false, false)
    }

    fn fetch_price_series<'a>(&'a self, request: &'a PriceRequest) -> SourceFuture<'a> {
        Box::pin(async move {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Some(flag) = &self.cancel_on_first_call {
                    flag.cancel();
                }
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(RawResponse::new(
                ProviderId::Yahoo,
                RawContext::Price(request.clone()),
                yahoo_chart(1_709_510_400, 2),
            ))
        })
    }

    fn fetch_fundamentals<'a>(&'a self, _ticker: &'a Ticker) -> SourceFuture<'a> {
        Box::pin(async move { Err(SourceError::unsupported(tickstash_core::Endpoint::Fundamentals)) })
    }

    fn fetch_metadata<'a>(&'a self, _ticker: &'a Ticker) -> SourceFuture<'a> {
        Box::pin(async move { Err(SourceError::unsupported(tickstash_core::Endpoint::Metadata)) })
    }
}

fn orchestrator_over(source: Arc<SlowSource>, provider_calls: usize) -> Arc<DataOrchestrator> {
    let cache = CacheStore::new(
        Arc::new(MemoryBackend::posing_as(BackendKind::Local)) as Arc<dyn CacheBackend>,
        None,
    );
    let chain = ProviderChain::new(vec![source as Arc<dyn DataSource>], provider_calls);
    Arc::new(
        DataOrchestrator::new(cache, chain)
            .with_clock(Arc::new(FixedClock::new(at(WEDNESDAY_NOON)))),
    )
}

// =============================================================================
// Batch: Per-ticker isolation
// =============================================================================

#[tokio::test]
async fn when_one_ticker_fails_system_still_returns_the_others_in_input_order() {
    // Given: One fresh entry, one stale entry and one unknown ticker, with every provider failing
    let yahoo = Arc::new(
        ScriptedSource::new(ProviderId::Yahoo)
            .fundamentals(Err(SourceError::not_found("unknown symbol"))),
    );
    let h = harness(vec![yahoo.clone() as Arc<dyn DataSource>], WEDNESDAY_NOON);
    let snapshot = |symbol: &str| {
        let mut snapshot = FundamentalsSnapshot::empty(ticker(symbol));
        snapshot.set(Metric::ReturnOnEquity, Some(0.18));
        Payload::Fundamentals(snapshot)
    };
    seed(
        &h.local,
        &CacheKey::Fundamentals(ticker("VOLV-B.ST")),
        &snapshot("VOLV-B.ST"),
        "2024-03-06T08:00:00Z",
    )
    .await;
    seed(
        &h.local,
        &CacheKey::Fundamentals(ticker("HM-B.ST")),
        &snapshot("HM-B.ST"),
        "2024-03-04T08:00:00Z",
    )
    .await;
    let runner = BatchRunner::with_concurrency(Arc::new(h.orchestrator), 2);

    // When: All three are requested in one batch
    let items = runner
        .run(
            tickers(&["FAKE.ST", "VOLV-B.ST", "HM-B.ST"]),
            DataRequest::Fundamentals,
            GetOptions::default(),
        )
        .await;

    // Then: Each ticker has its own outcome, in input order
    let order: Vec<&str> = items.iter().map(|item| item.ticker.as_str()).collect();
    assert_eq!(order, vec!["FAKE.ST", "VOLV-B.ST", "HM-B.ST"]);
    assert!(matches!(
        &items[0].outcome,
        Err(BatchError::Fetch(FetchError::AllSourcesExhausted { .. }))
    ));
    let fresh = items[1].outcome.as_ref().expect("fresh hit");
    assert!(fresh.cache_hit() && !fresh.stale);
    let stale = items[2].outcome.as_ref().expect("stale fallback");
    assert!(stale.stale);

    assert_eq!(
        BatchSummary::of(&items),
        BatchSummary {
            resolved: 1,
            stale: 1,
            failed: 1,
            cancelled: 0,
        }
    );
    assert_eq!(yahoo.call_count(), 2);
}

// =============================================================================
// Batch: Concurrency bounds
// =============================================================================

#[tokio::test]
async fn when_batch_is_larger_than_the_ticker_pool_system_caps_parallel_tickers() {
    // Given: Six tickers, a pool of two tickers and a roomy provider-call limit
    let source = Arc::new(SlowSource::new());
    let runner = BatchRunner::with_concurrency(orchestrator_over(source.clone(), 8), 2);

    // When: The batch runs
    let items = runner
        .run(
            tickers(&["A.ST", "B.ST", "C.ST", "D.ST", "E.ST", "F.ST"]),
            daily(),
            GetOptions::default(),
        )
        .await;

    // Then: Every ticker resolved and no more than two ran at once
    assert!(items.iter().all(|item| item.outcome.is_ok()));
    assert_eq!(source.calls(), 6);
    assert!(source.peak() <= 2, "peak was {}", source.peak());
}

#[tokio::test]
async fn when_provider_call_limit_is_tighter_system_caps_parallel_provider_calls() {
    // Given: A wide ticker pool but a single provider-call permit
    let source = Arc::new(SlowSource::new());
    let runner = BatchRunner::with_concurrency(orchestrator_over(source.clone(), 1), 8);

    // When: Four tickers run
    let items = runner
        .run(
            tickers(&["A.ST", "B.ST", "C.ST", "D.ST"]),
            daily(),
            GetOptions::default(),
        )
        .await;

    // Then: Provider calls never overlapped
    assert_eq!(items.len(), 4);
    assert_eq!(source.peak(), 1);
}

// =============================================================================
// Batch: Cancellation
// =============================================================================

#[tokio::test]
async fn when_batch_is_cancelled_before_start_system_skips_every_ticker() {
    // Given: A runner whose flag is already raised
    let source = Arc::new(SlowSource::new());
    let runner = BatchRunner::with_concurrency(orchestrator_over(source.clone(), 4), 4);
    runner.cancellation().cancel();

    // When: The batch runs
    let items = runner
        .run(tickers(&["A.ST", "B.ST"]), daily(), GetOptions::default())
        .await;

    // Then: Nothing was fetched and every ticker reports cancellation
    assert_eq!(source.calls(), 0);
    assert!(items
        .iter()
        .all(|item| item.outcome == Err(BatchError::Cancelled)));
}

#[tokio::test]
async fn when_batch_is_cancelled_mid_run_system_finishes_in_flight_work_only() {
    // Given: A one-ticker pool and a source that cancels during its first call
    let flag = CancellationFlag::new();
    let source = Arc::new(SlowSource::cancelling(flag.clone()));
    let runner =
        BatchRunner::with_concurrency(orchestrator_over(source.clone(), 4), 1).with_cancellation(flag);

    // When: Three tickers run
    let items = runner
        .run(
            tickers(&["A.ST", "B.ST", "C.ST"]),
            daily(),
            GetOptions::default(),
        )
        .await;

    // Then: The in-flight ticker completed and the waiting ones were skipped
    assert_eq!(source.calls(), 1);
    let summary = BatchSummary::of(&items);
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.cancelled, 2);
}
