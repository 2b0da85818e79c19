//! Behavior-driven tests for cache-first resolution.
//!
//! These tests verify HOW the orchestrator decides between cache and
//! providers: fresh hits, provider fallback, write-back, stale fallback and
//! exhaustion reporting.

mod support;

use std::sync::Arc;

use serde_json::json;
use tickstash_core::{
    Bar, BackendKind, CacheKey, CapabilitySet, DataRequest, DataSource, FetchError,
    FundamentalsSnapshot, GetOptions, Interval, LookbackWindow, Metric, Origin, Payload,
    PriceSeries, ProviderId, SourceError, SourceErrorKind,
};

use support::{
    alphavantage_daily, at, harness, seed, ticker, yahoo_chart, yahoo_metadata, yahoo_summary,
    ScriptedSource,
};

// Wednesday 2024-03-06, 13:00 in Stockholm: the market is open.
const WEDNESDAY_NOON: &str = "2024-03-06T12:00:00Z";

fn daily_series(symbol: &str, closes: &[f64]) -> PriceSeries {
    let bars = closes
        .iter()
        .enumerate()
        .map(|(day, close)| {
            let ts = at(&format!("2024-03-0{}T00:00:00Z", day + 1));
            Bar::new(ts, *close, close + 1.0, close - 1.0, *close, Some(1_000)).expect("bar")
        })
        .collect();
    PriceSeries::new(ticker(symbol), Interval::Daily, LookbackWindow::OneYear, bars)
        .expect("series")
}

fn daily_key(symbol: &str) -> CacheKey {
    CacheKey::Price {
        ticker: ticker(symbol),
        interval: Interval::Daily,
        window: LookbackWindow::OneYear,
    }
}

fn fundamentals(symbol: &str, pe: f64) -> FundamentalsSnapshot {
    let mut snapshot = FundamentalsSnapshot::empty(ticker(symbol));
    snapshot.set(Metric::PriceToEarnings, Some(pe));
    snapshot
}

// =============================================================================
// Orchestrator: Fresh cache hits
// =============================================================================

#[tokio::test]
async fn when_cached_price_is_younger_than_threshold_system_makes_no_provider_call() {
    // Given: VOLV-B.ST daily prices cached two hours ago while the market is open (5h threshold)
    let yahoo = Arc::new(ScriptedSource::new(ProviderId::Yahoo));
    let alphavantage = Arc::new(ScriptedSource::new(ProviderId::Alphavantage));
    let h = harness(vec![yahoo.clone(), alphavantage.clone()], WEDNESDAY_NOON);
    let cached = daily_series("VOLV-B.ST", &[250.0, 251.5, 252.0]);
    seed(
        &h.local,
        &daily_key("VOLV-B.ST"),
        &Payload::Price(cached.clone()),
        "2024-03-06T10:00:00Z",
    )
    .await;

    // When: The price is requested
    let resolved = h
        .orchestrator
        .get_price(
            &ticker("VOLV-B.ST"),
            Interval::Daily,
            LookbackWindow::OneYear,
            GetOptions::default(),
        )
        .await
        .expect("fresh hit");

    // Then: The cached series is returned and no provider was contacted
    assert_eq!(resolved.value, cached);
    assert!(!resolved.stale);
    assert_eq!(
        resolved.origin,
        Origin::Cache {
            backend: BackendKind::Local
        }
    );
    assert_eq!(yahoo.call_count(), 0);
    assert_eq!(alphavantage.call_count(), 0);

    let audit = h.local.audit_log().await;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].outcome, "cache_hit");
    assert!(audit[0].hit);
}

#[tokio::test]
async fn when_entry_age_equals_threshold_system_treats_it_as_stale() {
    // Given: Fundamentals fetched exactly 24 hours ago (threshold 24h)
    let yahoo = Arc::new(
        ScriptedSource::new(ProviderId::Yahoo)
            .fundamentals(Ok(yahoo_summary(json!({"summaryDetail": {"trailingPE": 14.2}})))),
    );
    let h = harness(vec![yahoo.clone()], WEDNESDAY_NOON);
    let key = CacheKey::Fundamentals(ticker("VOLV-B.ST"));
    seed(
        &h.local,
        &key,
        &Payload::Fundamentals(fundamentals("VOLV-B.ST", 12.0)),
        "2024-03-05T12:00:00Z",
    )
    .await;

    // When: Fundamentals are requested
    let resolved = h
        .orchestrator
        .get_fundamentals(&ticker("VOLV-B.ST"), GetOptions::default())
        .await
        .expect("refetched");

    // Then: The boundary counts as stale and the provider is asked
    assert_eq!(yahoo.call_count(), 1);
    assert_eq!(resolved.origin, Origin::Provider);
    assert_eq!(resolved.value.price_to_earnings, Some(14.2));
}

#[tokio::test]
async fn when_market_opens_on_summer_time_system_refetches_yesterdays_prices() {
    // Given: Daily prices cached Tuesday after the close, and Wednesday 09:30 CEST (07:30Z)
    let yahoo = Arc::new(ScriptedSource::new(ProviderId::Yahoo).price(Ok(yahoo_chart(
        1_719_792_000,
        3,
    ))));
    let h = harness(vec![yahoo.clone()], "2024-07-03T07:30:00Z");
    seed(
        &h.local,
        &daily_key("VOLV-B.ST"),
        &Payload::Price(daily_series("VOLV-B.ST", &[250.0, 251.5])),
        "2024-07-02T16:40:00Z",
    )
    .await;

    // When: The price is requested during the first trading hour
    let resolved = h
        .orchestrator
        .get_price(
            &ticker("VOLV-B.ST"),
            Interval::Daily,
            LookbackWindow::OneYear,
            GetOptions::default(),
        )
        .await
        .expect("refetched");

    // Then: The open-market limit applies and the provider is asked
    assert_eq!(yahoo.call_count(), 1);
    assert_eq!(resolved.origin, Origin::Provider);
    assert_eq!(resolved.value.len(), 3);
}

#[tokio::test]
async fn when_primary_backend_fails_system_reads_from_secondary() {
    // Given: A failing local backend and metadata cached in the remote backend
    let yahoo = Arc::new(ScriptedSource::new(ProviderId::Yahoo));
    let h = harness(vec![yahoo.clone()], WEDNESDAY_NOON);
    h.local.fail_reads(true);
    let key = CacheKey::Metadata(ticker("ERIC-B.ST"));
    let metadata = tickstash_core::CompanyMetadata {
        ticker: ticker("ERIC-B.ST"),
        name: Some(String::from("Telefonaktiebolaget LM Ericsson")),
        sector: Some(String::from("Technology")),
        industry: None,
        currency: Some(String::from("SEK")),
        exchange: None,
        country: Some(String::from("Sweden")),
    };
    seed(
        &h.remote,
        &key,
        &Payload::Metadata(metadata.clone()),
        "2024-03-06T08:00:00Z",
    )
    .await;

    // When: Metadata is requested
    let resolved = h
        .orchestrator
        .get_metadata(&ticker("ERIC-B.ST"), GetOptions::default())
        .await
        .expect("remote hit");

    // Then: The remote entry is served and no provider is called
    assert_eq!(resolved.value, metadata);
    assert_eq!(
        resolved.origin,
        Origin::Cache {
            backend: BackendKind::Remote
        }
    );
    assert_eq!(yahoo.call_count(), 0);
}

#[tokio::test]
async fn when_cached_row_is_corrupt_system_treats_it_as_a_miss() {
    // Given: An undecodable cache row and a working provider
    let yahoo = Arc::new(
        ScriptedSource::new(ProviderId::Yahoo).metadata(Ok(yahoo_metadata("Volvo AB"))),
    );
    let h = harness(vec![yahoo.clone()], WEDNESDAY_NOON);
    let key = CacheKey::Metadata(ticker("VOLV-B.ST"));
    h.local
        .insert_row(
            &key,
            tickstash_warehouse::CacheRow {
                provider: String::from("yahoo"),
                payload: String::from("{not json"),
                fetched_at: String::from("2024-03-06T11:00:00Z"),
            },
        )
        .await;

    // When: Metadata is requested
    let resolved = h
        .orchestrator
        .get_metadata(&ticker("VOLV-B.ST"), GetOptions::default())
        .await
        .expect("provider result");

    // Then: The provider is used and the corrupt row is overwritten
    assert_eq!(yahoo.call_count(), 1);
    assert_eq!(resolved.value.name.as_deref(), Some("Volvo AB"));
    let row = h.local.row(&key).await.expect("row rewritten");
    assert!(row.payload.contains("Volvo AB"));
}

// =============================================================================
// Orchestrator: Provider fallback and write-back
// =============================================================================

#[tokio::test]
async fn when_first_provider_is_rate_limited_system_uses_second_and_caches_it() {
    // Given: Yahoo rate-limited after three attempts and Alpha Vantage returning daily bars
    let yahoo = Arc::new(ScriptedSource::new(ProviderId::Yahoo).price(Err(
        SourceError::rate_limited("429 Too Many Requests").with_attempts(3),
    )));
    let alphavantage = Arc::new(ScriptedSource::new(ProviderId::Alphavantage).price(Ok(
        alphavantage_daily(&["2024-03-01", "2024-03-04", "2024-03-05"]),
    )));
    let h = harness(vec![yahoo.clone(), alphavantage.clone()], WEDNESDAY_NOON);

    // When: ERIC-B.ST one-year daily prices are requested
    let resolved = h
        .orchestrator
        .get_price(
            &ticker("ERIC-B.ST"),
            Interval::Daily,
            LookbackWindow::OneYear,
            GetOptions::default(),
        )
        .await
        .expect("fallback result");

    // Then: The result comes from Alpha Vantage and the Yahoo failure is reported
    assert_eq!(resolved.source, ProviderId::Alphavantage);
    assert_eq!(resolved.origin, Origin::Provider);
    assert_eq!(resolved.value.len(), 3);
    assert_eq!(resolved.failures.len(), 1);
    assert_eq!(resolved.failures[0].provider, ProviderId::Yahoo);
    assert_eq!(resolved.failures[0].kind, SourceErrorKind::RateLimited);
    assert_eq!(resolved.failures[0].attempts, 3);

    // And: The result is written through to both backends
    for backend in [&h.local, &h.remote] {
        let row = backend.row(&daily_key("ERIC-B.ST")).await.expect("written back");
        assert_eq!(row.provider, "alphavantage");
        assert_eq!(row.fetched_at, "2024-03-06T12:00:00Z");
    }

    // And: A second request is served from cache
    h.orchestrator
        .get_price(
            &ticker("ERIC-B.ST"),
            Interval::Daily,
            LookbackWindow::OneYear,
            GetOptions::default(),
        )
        .await
        .expect("cache hit");
    assert_eq!(alphavantage.call_count(), 1);
}

#[tokio::test]
async fn when_value_is_refetched_system_replaces_the_cached_row() {
    // Given: A provider and an orchestrator whose clock can move
    let yahoo = Arc::new(
        ScriptedSource::new(ProviderId::Yahoo)
            .fundamentals(Ok(yahoo_summary(json!({"summaryDetail": {"trailingPE": 11.0}}))))
            .fundamentals(Ok(yahoo_summary(json!({"summaryDetail": {"trailingPE": 12.5}})))),
    );
    let h = harness(vec![yahoo.clone()], WEDNESDAY_NOON);

    // When: The same key is fetched twice, 25 hours apart
    h.orchestrator
        .get_fundamentals(&ticker("SAND.ST"), GetOptions::default())
        .await
        .expect("first fetch");
    h.clock.advance(time::Duration::hours(25));
    let second = h
        .orchestrator
        .get_fundamentals(&ticker("SAND.ST"), GetOptions::default())
        .await
        .expect("second fetch");

    // Then: Each backend holds exactly one row with the newest value
    assert_eq!(yahoo.call_count(), 2);
    assert_eq!(second.value.price_to_earnings, Some(12.5));
    assert_eq!(h.local.len().await, 1);
    assert_eq!(h.remote.len().await, 1);
    let row = h
        .local
        .row(&CacheKey::Fundamentals(ticker("SAND.ST")))
        .await
        .expect("row");
    assert_eq!(row.fetched_at, "2024-03-07T13:00:00Z");
}

#[tokio::test]
async fn when_write_back_fails_system_still_returns_the_provider_result() {
    // Given: A local backend that rejects writes
    let yahoo = Arc::new(ScriptedSource::new(ProviderId::Yahoo).price(Ok(yahoo_chart(
        1_709_510_400,
        3,
    ))));
    let h = harness(vec![yahoo], WEDNESDAY_NOON);
    h.local.fail_writes(true);

    // When: Prices are requested
    let resolved = h
        .orchestrator
        .get_price(
            &ticker("VOLV-B.ST"),
            Interval::Daily,
            LookbackWindow::OneYear,
            GetOptions::default(),
        )
        .await;

    // Then: The get succeeds and the secondary still receives the row
    let resolved = resolved.expect("write failure must not fail the get");
    assert_eq!(resolved.value.len(), 3);
    assert!(h.local.is_empty().await);
    assert!(h.remote.row(&daily_key("VOLV-B.ST")).await.is_some());
}

#[tokio::test]
async fn when_primary_is_unreadable_system_audits_the_backend_that_stored_the_value() {
    // Given: A local backend that fails reads, and Yahoo returning bars
    let yahoo = Arc::new(ScriptedSource::new(ProviderId::Yahoo).price(Ok(yahoo_chart(
        1_709_510_400,
        3,
    ))));
    let h = harness(vec![yahoo], WEDNESDAY_NOON);
    h.local.fail_reads(true);

    // When: Prices are requested
    h.orchestrator
        .get_price(
            &ticker("VOLV-B.ST"),
            Interval::Daily,
            LookbackWindow::OneYear,
            GetOptions::default(),
        )
        .await
        .expect("fetched");

    // Then: Only the remote holds the row, and the fetch log says so
    assert!(h.local.is_empty().await);
    assert!(h.remote.row(&daily_key("VOLV-B.ST")).await.is_some());
    let audit = h.remote.audit_log().await;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].outcome, "fetched");
    assert_eq!(audit[0].backend.as_deref(), Some("remote"));
    assert_eq!(audit[0].provider.as_deref(), Some("yahoo"));
}

#[tokio::test]
async fn when_audit_append_fails_system_still_serves_the_entry() {
    // Given: A fresh cached entry and a local backend that rejects audit rows
    let yahoo = Arc::new(ScriptedSource::new(ProviderId::Yahoo));
    let h = harness(vec![yahoo.clone()], WEDNESDAY_NOON);
    let key = CacheKey::Fundamentals(ticker("VOLV-B.ST"));
    seed(
        &h.local,
        &key,
        &Payload::Fundamentals(fundamentals("VOLV-B.ST", 12.0)),
        "2024-03-06T08:00:00Z",
    )
    .await;
    h.local.fail_audits(true);

    // When: Fundamentals are requested
    let resolved = h
        .orchestrator
        .get_fundamentals(&ticker("VOLV-B.ST"), GetOptions::default())
        .await
        .expect("fresh hit");

    // Then: The hit is served and the remote still records it
    assert!(resolved.cache_hit());
    assert_eq!(yahoo.call_count(), 0);
    assert!(h.local.audit_log().await.is_empty());
    assert_eq!(h.remote.audit_log().await.len(), 1);
}

#[tokio::test]
async fn when_provider_payload_is_unusable_system_tries_the_next_provider() {
    // Given: Yahoo returns a chart with no timestamps, Alpha Vantage returns bars
    let empty_chart = json!({"chart": {"result": [{"meta": {}, "indicators": {"quote": [{}]}}], "error": null}});
    let yahoo = Arc::new(ScriptedSource::new(ProviderId::Yahoo).price(Ok(empty_chart)));
    let alphavantage = Arc::new(
        ScriptedSource::new(ProviderId::Alphavantage)
            .price(Ok(alphavantage_daily(&["2024-03-04", "2024-03-05"]))),
    );
    let h = harness(vec![yahoo, alphavantage], WEDNESDAY_NOON);

    // When: Prices are requested
    let resolved = h
        .orchestrator
        .get_price(
            &ticker("VOLV-B.ST"),
            Interval::Daily,
            LookbackWindow::OneYear,
            GetOptions::default(),
        )
        .await
        .expect("second provider result");

    // Then: Yahoo's payload counts as malformed
    assert_eq!(resolved.source, ProviderId::Alphavantage);
    assert_eq!(
        resolved.failures[0].kind,
        SourceErrorKind::MalformedResponse
    );
}

#[tokio::test]
async fn when_provider_lacks_the_endpoint_system_records_it_and_moves_on() {
    // Given: A first provider without metadata support
    let price_only = Arc::new(
        ScriptedSource::new(ProviderId::Alphavantage)
            .with_capabilities(CapabilitySet::new(true, true, false)),
    );
    let yahoo = Arc::new(ScriptedSource::new(ProviderId::Yahoo).metadata(Ok(yahoo_metadata("Sandvik AB"))));
    let h = harness(vec![price_only.clone(), yahoo], WEDNESDAY_NOON);

    // When: Metadata is requested
    let resolved = h
        .orchestrator
        .get_metadata(&ticker("SAND.ST"), GetOptions::default())
        .await
        .expect("metadata");

    // Then: The unsupported provider is never called but is listed as a failure
    assert_eq!(price_only.call_count(), 0);
    assert_eq!(resolved.source, ProviderId::Yahoo);
    assert_eq!(resolved.failures[0].kind, SourceErrorKind::Unsupported);
}

// =============================================================================
// Orchestrator: Stale fallback and exhaustion
// =============================================================================

#[tokio::test]
async fn when_all_providers_fail_system_serves_stale_entry_marked_stale() {
    // Given: HM-B.ST fundamentals cached 30 hours ago and every provider down
    let yahoo = Arc::new(
        ScriptedSource::new(ProviderId::Yahoo)
            .fundamentals(Err(SourceError::transient("connection reset").with_attempts(3))),
    );
    let alphavantage = Arc::new(
        ScriptedSource::new(ProviderId::Alphavantage)
            .fundamentals(Err(SourceError::rate_limited("daily quota").with_attempts(3))),
    );
    let h = harness(vec![yahoo, alphavantage], WEDNESDAY_NOON);
    let cached = fundamentals("HM-B.ST", 25.3);
    seed(
        &h.local,
        &CacheKey::Fundamentals(ticker("HM-B.ST")),
        &Payload::Fundamentals(cached.clone()),
        "2024-03-05T06:00:00Z",
    )
    .await;

    // When: Fundamentals are requested
    let resolved = h
        .orchestrator
        .get_fundamentals(&ticker("HM-B.ST"), GetOptions::default())
        .await
        .expect("stale fallback");

    // Then: The stale entry is returned, flagged, with both failures attached
    assert!(resolved.stale);
    assert_eq!(resolved.value, cached);
    assert_eq!(resolved.fetched_at, at("2024-03-05T06:00:00Z"));
    assert_eq!(resolved.failures.len(), 2);

    let audit = h.local.audit_log().await;
    assert_eq!(audit.last().map(|record| record.outcome.as_str()), Some("stale_fallback"));
}

#[tokio::test]
async fn when_strict_freshness_is_requested_system_refuses_stale_entry() {
    // Given: A stale entry and a failing provider
    let yahoo = Arc::new(
        ScriptedSource::new(ProviderId::Yahoo)
            .fundamentals(Err(SourceError::transient("timeout"))),
    );
    let h = harness(vec![yahoo], WEDNESDAY_NOON);
    seed(
        &h.local,
        &CacheKey::Fundamentals(ticker("HM-B.ST")),
        &Payload::Fundamentals(fundamentals("HM-B.ST", 25.3)),
        "2024-03-05T06:00:00Z",
    )
    .await;

    // When: Fundamentals are requested with strict freshness
    let error = h
        .orchestrator
        .get_fundamentals(&ticker("HM-B.ST"), GetOptions::strict())
        .await
        .expect_err("strict mode must fail");

    // Then: The exhaustion error notes that stale data existed
    assert!(matches!(
        error,
        FetchError::AllSourcesExhausted {
            stale_available: true,
            ..
        }
    ));
}

#[tokio::test]
async fn when_no_provider_knows_the_ticker_system_reports_one_reason_per_provider() {
    // Given: Both providers answer NotFound and nothing is cached
    let yahoo = Arc::new(
        ScriptedSource::new(ProviderId::Yahoo)
            .price(Err(SourceError::not_found("No data found, symbol may be delisted"))),
    );
    let alphavantage = Arc::new(
        ScriptedSource::new(ProviderId::Alphavantage)
            .price(Err(SourceError::not_found("Invalid API call"))),
    );
    let h = harness(vec![yahoo, alphavantage], WEDNESDAY_NOON);

    // When: FAKE.ST prices are requested
    let error = h
        .orchestrator
        .get(
            &ticker("FAKE.ST"),
            &DataRequest::Price {
                interval: Interval::Daily,
                window: LookbackWindow::OneYear,
            },
            GetOptions::default(),
        )
        .await
        .expect_err("must be exhausted");

    // Then: The error carries exactly two NotFound reasons in priority order
    let FetchError::AllSourcesExhausted {
        ticker: failed_ticker,
        failures,
        stale_available,
        ..
    } = &error
    else {
        panic!("unexpected error: {error}");
    };
    assert_eq!(failed_ticker.as_str(), "FAKE.ST");
    assert!(!stale_available);
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].provider, ProviderId::Yahoo);
    assert_eq!(failures[1].provider, ProviderId::Alphavantage);
    assert!(failures
        .iter()
        .all(|failure| failure.kind == SourceErrorKind::NotFound));

    // And: Nothing was cached, but the attempt was audited
    assert!(h.local.is_empty().await);
    let audit = h.local.audit_log().await;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].outcome, "exhausted");
    assert_eq!(audit[0].data_type, "price_daily");
}

// =============================================================================
// Orchestrator: Normalization through the full path
// =============================================================================

#[tokio::test]
async fn when_one_field_is_malformed_system_keeps_the_rest_of_the_snapshot() {
    // Given: A quoteSummary with trailingPE "N/A" and a valid profit margin
    let yahoo = Arc::new(ScriptedSource::new(ProviderId::Yahoo).fundamentals(Ok(yahoo_summary(
        json!({
            "summaryDetail": {"trailingPE": "N/A", "marketCap": {"raw": 412_000_000_000_u64, "fmt": "412B"}},
            "financialData": {"profitMargins": 0.234}
        }),
    ))));
    let h = harness(vec![yahoo as Arc<dyn DataSource>], WEDNESDAY_NOON);

    // When: Fundamentals are requested
    let resolved = h
        .orchestrator
        .get_fundamentals(&ticker("VOLV-B.ST"), GetOptions::default())
        .await
        .expect("snapshot");

    // Then: Only the malformed field is absent
    assert_eq!(resolved.value.price_to_earnings, None);
    assert_eq!(resolved.value.profit_margin, Some(0.234));
    assert_eq!(resolved.value.market_cap, Some(412_000_000_000.0));
}
