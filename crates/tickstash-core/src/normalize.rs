//! Converts provider-shaped payloads into canonical records.
//!
//! Every provider quirk is handled here and nowhere else: key spelling,
//! numeric strings, `{raw: x}` wrappers and provider timestamp conventions.
//! Field-level problems leave that field absent; only a payload with no usable
//! structure fails as a whole.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::data_source::{RawContext, RawResponse};
use crate::domain::{Bar, CompanyMetadata, DerivedMetrics, FundamentalsSnapshot, Metric};
use crate::{PriceSeries, ProviderId, Ticker, UtcDateTime, ValidationError};

/// Record-level normalization failure. The orchestrator reports it as a
/// malformed response from the provider that produced the payload.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("{provider} payload was fetched for a different data type than requested")]
    ContextMismatch { provider: ProviderId },

    #[error("{provider} payload has no {expected}")]
    MissingStructure {
        provider: ProviderId,
        expected: &'static str,
    },

    #[error("{provider} payload for {ticker} contains no usable {what}")]
    NoUsableData {
        provider: ProviderId,
        ticker: Ticker,
        what: &'static str,
    },

    #[error("{provider} price series rejected: {source}")]
    InvalidSeries {
        provider: ProviderId,
        source: ValidationError,
    },
}

pub fn normalize_price(raw: &RawResponse) -> Result<PriceSeries, NormalizeError> {
    let RawContext::Price(request) = &raw.context else {
        return Err(NormalizeError::ContextMismatch {
            provider: raw.provider,
        });
    };

    let bars = match raw.provider {
        ProviderId::Yahoo => yahoo_bars(raw.provider, &raw.body)?,
        ProviderId::Alphavantage => alphavantage_bars(raw.provider, &raw.body)?,
    };
    let bars = trim_to_window(dedupe_sorted(bars), request.window.span());

    if bars.is_empty() {
        return Err(NormalizeError::NoUsableData {
            provider: raw.provider,
            ticker: request.ticker.clone(),
            what: "bars",
        });
    }

    PriceSeries::new(request.ticker.clone(), request.interval, request.window, bars).map_err(
        |source| NormalizeError::InvalidSeries {
            provider: raw.provider,
            source,
        },
    )
}

pub fn normalize_fundamentals(raw: &RawResponse) -> Result<FundamentalsSnapshot, NormalizeError> {
    let RawContext::Fundamentals(ticker) = &raw.context else {
        return Err(NormalizeError::ContextMismatch {
            provider: raw.provider,
        });
    };

    let (fields, statements) = match raw.provider {
        ProviderId::Yahoo => {
            let result = yahoo_summary_result(raw.provider, &raw.body)?;
            let statements = result
                .get("incomeStatementHistory")
                .and_then(|history| history.get("incomeStatementHistory"))
                .and_then(Value::as_array);
            (flatten_fields(result), statements)
        }
        ProviderId::Alphavantage => {
            let overview = raw.body.get("overview").unwrap_or(&raw.body);
            let object = overview
                .as_object()
                .ok_or(NormalizeError::MissingStructure {
                    provider: raw.provider,
                    expected: "company overview object",
                })?;
            let statements = raw
                .body
                .get("incomeStatement")
                .and_then(|statement| statement.get("annualReports"))
                .and_then(Value::as_array);
            (flatten_fields(object), statements)
        }
    };

    let mut snapshot = FundamentalsSnapshot::empty(ticker.clone());
    for metric in Metric::ALL {
        let value = metric_synonyms(metric)
            .iter()
            .filter_map(|key| fields.get(*key))
            .find_map(coerce_number);
        snapshot.set(metric, value);
    }
    snapshot.derived = statements.and_then(|statements| derive_metrics(statements.as_slice()));

    if snapshot.present_count() == 0 && snapshot.derived.is_none() {
        return Err(NormalizeError::NoUsableData {
            provider: raw.provider,
            ticker: ticker.clone(),
            what: "fundamentals fields",
        });
    }
    Ok(snapshot)
}

pub fn normalize_metadata(raw: &RawResponse) -> Result<CompanyMetadata, NormalizeError> {
    let RawContext::Metadata(ticker) = &raw.context else {
        return Err(NormalizeError::ContextMismatch {
            provider: raw.provider,
        });
    };

    let fields = match raw.provider {
        ProviderId::Yahoo => flatten_fields(yahoo_summary_result(raw.provider, &raw.body)?),
        ProviderId::Alphavantage => {
            let object = raw
                .body
                .as_object()
                .ok_or(NormalizeError::MissingStructure {
                    provider: raw.provider,
                    expected: "company overview object",
                })?;
            flatten_fields(object)
        }
    };
    let text = |synonyms: &[&str]| {
        synonyms
            .iter()
            .filter_map(|key| fields.get(*key))
            .find_map(coerce_text)
    };

    let metadata = CompanyMetadata {
        ticker: ticker.clone(),
        name: text(&["longname", "name", "shortname"]),
        sector: text(&["sector"]),
        industry: text(&["industry"]),
        currency: text(&["currency", "financialcurrency"]),
        exchange: text(&["exchangename", "fullexchangename", "exchange"]),
        country: text(&["country"]),
    };

    let has_any = [
        &metadata.name,
        &metadata.sector,
        &metadata.industry,
        &metadata.currency,
        &metadata.exchange,
        &metadata.country,
    ]
    .iter()
    .any(|field| field.is_some());
    if !has_any {
        return Err(NormalizeError::NoUsableData {
            provider: raw.provider,
            ticker: ticker.clone(),
            what: "metadata fields",
        });
    }
    Ok(metadata)
}

/// Canonical form of a provider field name: lowercase, with `_`, `-`, spaces
/// and a leading "N. " ordinal removed. `"4. close"` and `"Close"` both become `"close"`.
pub fn normalize_key(key: &str) -> String {
    let trimmed = key.trim();
    let without_ordinal = match trimmed.split_once(". ") {
        Some((prefix, rest))
            if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) =>
        {
            rest
        }
        _ => trimmed,
    };

    without_ordinal
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Reads a provider number. Numeric strings may carry `,` thousands separators
/// or a trailing `%` (divided by 100). Placeholders and non-finite values are `None`.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => parse_numeric_text(text)?,
        Value::Object(object) => return object.get("raw").and_then(coerce_number),
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn parse_numeric_text(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if is_placeholder(trimmed) {
        return None;
    }

    let (digits, scale) = match trimmed.strip_suffix('%') {
        Some(percent) => (percent.trim(), 100.0),
        None => (trimmed, 1.0),
    };
    strip_thousands_separators(digits)?
        .parse::<f64>()
        .ok()
        .map(|value| value / scale)
}

/// Drops `,` only where it separates groups of three integer digits. Any
/// other comma, such as the decimal comma in `1,5`, rejects the text.
fn strip_thousands_separators(text: &str) -> Option<String> {
    if !text.contains(',') {
        return Some(text.to_owned());
    }

    let (integer, fraction) = match text.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (text, None),
    };
    if fraction.is_some_and(|fraction| fraction.contains(',')) {
        return None;
    }

    let all_digits = |group: &str| group.bytes().all(|byte| byte.is_ascii_digit());
    let mut groups = integer.split(',');
    let lead = groups.next()?.trim_start_matches(['-', '+']);
    if lead.is_empty() || lead.len() > 3 || !all_digits(lead) {
        return None;
    }
    if !groups.all(|group| group.len() == 3 && all_digits(group)) {
        return None;
    }

    let mut cleaned = integer.replace(',', "");
    if let Some(fraction) = fraction {
        cleaned.push('.');
        cleaned.push_str(fraction);
    }
    Some(cleaned)
}

fn coerce_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim(),
        Value::Object(object) => return object.get("raw").and_then(coerce_text),
        _ => return None,
    };
    (!is_placeholder(text)).then(|| text.to_owned())
}

fn is_placeholder(text: &str) -> bool {
    text.is_empty()
        || text == "-"
        || ["n/a", "na", "none", "null", "nan"]
            .iter()
            .any(|placeholder| text.eq_ignore_ascii_case(placeholder))
}

fn metric_synonyms(metric: Metric) -> &'static [&'static str] {
    match metric {
        Metric::PriceToEarnings => &["trailingpe", "peratio", "pe", "trailingperatio"],
        Metric::ForwardPriceToEarnings => &["forwardpe", "forwardperatio"],
        Metric::PriceToBook => &["pricetobook", "pricetobookratio", "pb"],
        Metric::ProfitMargin => &["profitmargins", "profitmargin", "netprofitmargin"],
        Metric::OperatingMargin => &["operatingmargins", "operatingmarginttm", "operatingmargin"],
        Metric::ReturnOnAssets => &["returnonassets", "returnonassetsttm", "roa"],
        Metric::ReturnOnEquity => &["returnonequity", "returnonequityttm", "roe"],
        Metric::RevenueGrowth => &["revenuegrowth", "quarterlyrevenuegrowthyoy"],
        Metric::EarningsGrowth => &["earningsgrowth", "quarterlyearningsgrowthyoy"],
        Metric::BookValue => &["bookvalue", "bookvaluepershare"],
        Metric::MarketCap => &["marketcap", "marketcapitalization"],
        Metric::DividendYield => &["dividendyield", "trailingannualdividendyield"],
        Metric::DebtToEquity => &["debttoequity", "debttoequityratio"],
        Metric::CurrentRatio => &["currentratio"],
    }
}

/// Collects leaf fields from nested objects under their normalized key.
/// `{raw: x}` wrappers count as leaves; arrays are skipped. The first
/// occurrence of a key wins.
fn flatten_fields(object: &Map<String, Value>) -> BTreeMap<String, Value> {
    let mut fields = BTreeMap::new();
    collect_fields(object, &mut fields, 0);
    fields
}

fn collect_fields(object: &Map<String, Value>, fields: &mut BTreeMap<String, Value>, depth: usize) {
    const MAX_DEPTH: usize = 4;

    for (key, value) in object {
        match value {
            Value::Object(inner) if inner.contains_key("raw") => {
                fields.entry(normalize_key(key)).or_insert_with(|| value.clone());
            }
            Value::Object(inner) => {
                if depth < MAX_DEPTH {
                    collect_fields(inner, fields, depth + 1);
                }
            }
            Value::Array(_) => {}
            _ => {
                fields.entry(normalize_key(key)).or_insert_with(|| value.clone());
            }
        }
    }
}

fn yahoo_summary_result(
    provider: ProviderId,
    body: &Value,
) -> Result<&Map<String, Value>, NormalizeError> {
    body.get("quoteSummary")
        .and_then(|summary| summary.get("result"))
        .and_then(Value::as_array)
        .and_then(|result| result.first())
        .and_then(Value::as_object)
        .ok_or(NormalizeError::MissingStructure {
            provider,
            expected: "quoteSummary result",
        })
}

fn yahoo_bars(provider: ProviderId, body: &Value) -> Result<Vec<Bar>, NormalizeError> {
    let result = body
        .get("chart")
        .and_then(|chart| chart.get("result"))
        .and_then(Value::as_array)
        .and_then(|result| result.first())
        .ok_or(NormalizeError::MissingStructure {
            provider,
            expected: "chart result",
        })?;

    let quote = result
        .get("indicators")
        .and_then(|indicators| indicators.get("quote"))
        .and_then(Value::as_array)
        .and_then(|quote| quote.first())
        .ok_or(NormalizeError::MissingStructure {
            provider,
            expected: "chart quote indicators",
        })?;

    let Some(timestamps) = result.get("timestamp").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let gmt_offset = result
        .get("meta")
        .and_then(|meta| meta.get("gmtoffset"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let column = |name: &str| {
        quote
            .get(name)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    };
    let (opens, highs, lows, closes, volumes) = (
        column("open"),
        column("high"),
        column("low"),
        column("close"),
        column("volume"),
    );
    let at = |values: &[Value], index: usize| values.get(index).and_then(coerce_number);

    let bars = timestamps
        .iter()
        .enumerate()
        .filter_map(|(index, ts)| {
            let ts = trading_date_from_unix(ts.as_i64()?, gmt_offset)?;
            build_bar(
                ts,
                at(opens, index),
                at(highs, index),
                at(lows, index),
                at(closes, index),
                at(volumes, index),
            )
        })
        .collect();
    Ok(bars)
}

fn alphavantage_bars(provider: ProviderId, body: &Value) -> Result<Vec<Bar>, NormalizeError> {
    let series = body
        .as_object()
        .and_then(|object| {
            object
                .iter()
                .find(|(key, _)| normalize_key(key).contains("timeseries"))
        })
        .and_then(|(_, series)| series.as_object())
        .ok_or(NormalizeError::MissingStructure {
            provider,
            expected: "time series object",
        })?;

    let bars = series
        .iter()
        .filter_map(|(date, values)| {
            let ts = trading_date_from_text(date)?;
            let fields = flatten_fields(values.as_object()?);
            let get = |key: &str| fields.get(key).and_then(coerce_number);
            build_bar(
                ts,
                get("open"),
                get("high"),
                get("low"),
                get("close"),
                get("volume"),
            )
        })
        .collect();
    Ok(bars)
}

fn build_bar(
    ts: UtcDateTime,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
) -> Option<Bar> {
    let volume = volume
        .filter(|volume| *volume >= 0.0)
        .map(|volume| volume.round() as u64);
    Bar::new(ts, open?, high?, low?, close?, volume).ok()
}

/// 00:00:00Z of the exchange-local calendar date of a Yahoo bar.
fn trading_date_from_unix(seconds: i64, gmt_offset: i64) -> Option<UtcDateTime> {
    let local = OffsetDateTime::from_unix_timestamp(seconds.checked_add(gmt_offset)?).ok()?;
    Some(UtcDateTime::from_any_offset(
        local.date().midnight().assume_utc(),
    ))
}

fn trading_date_from_text(text: &str) -> Option<UtcDateTime> {
    let date_part = text.get(..10)?;
    let date = Date::parse(date_part, format_description!("[year]-[month]-[day]")).ok()?;
    Some(UtcDateTime::from_any_offset(date.midnight().assume_utc()))
}

/// Sorts by timestamp; for duplicate timestamps the later occurrence wins.
fn dedupe_sorted(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|bar| bar.ts);

    let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match deduped.last_mut() {
            Some(previous) if previous.ts == bar.ts => *previous = bar,
            _ => deduped.push(bar),
        }
    }
    deduped
}

fn trim_to_window(bars: Vec<Bar>, span: Option<time::Duration>) -> Vec<Bar> {
    let (Some(span), Some(newest)) = (span, bars.last().map(|bar| bar.ts)) else {
        return bars;
    };
    let cutoff = newest.saturating_sub(span);
    bars.into_iter().filter(|bar| bar.ts >= cutoff).collect()
}

struct Statement {
    period_end: String,
    revenue: Option<f64>,
    net_income: Option<f64>,
}

fn derive_metrics(statements: &[Value]) -> Option<DerivedMetrics> {
    let mut parsed: Vec<Statement> = statements
        .iter()
        .filter_map(|statement| {
            let fields = flatten_fields(statement.as_object()?);
            let period_end = ["enddate", "fiscaldateending"]
                .iter()
                .filter_map(|key| fields.get(*key))
                .find_map(period_label)?;
            Some(Statement {
                period_end,
                revenue: fields.get("totalrevenue").and_then(coerce_number),
                net_income: fields.get("netincome").and_then(coerce_number),
            })
        })
        .collect();
    parsed.sort_by(|a, b| b.period_end.cmp(&a.period_end));

    let [latest, prior, ..] = parsed.as_slice() else {
        return None;
    };

    let ratio = |numerator: Option<f64>, denominator: Option<f64>| {
        let denominator = denominator.filter(|value| *value != 0.0)?;
        Some(numerator? / denominator).filter(|value| value.is_finite())
    };
    let growth = |current: Option<f64>, previous: Option<f64>| {
        let previous = previous.filter(|value| *value != 0.0)?;
        Some((current? - previous) / previous.abs()).filter(|value| value.is_finite())
    };

    let net_margin = ratio(latest.net_income, latest.revenue);
    let prior_margin = ratio(prior.net_income, prior.revenue);

    Some(DerivedMetrics {
        period_end: Some(latest.period_end.clone()),
        prior_period_end: Some(prior.period_end.clone()),
        revenue_growth_yoy: growth(latest.revenue, prior.revenue),
        net_income_growth_yoy: growth(latest.net_income, prior.net_income),
        net_margin,
        net_margin_change: net_margin
            .zip(prior_margin)
            .map(|(current, previous)| current - previous),
    })
}

/// `YYYY-MM-DD` label from a statement date: a plain string, a Yahoo
/// `{raw, fmt}` wrapper, or epoch seconds.
fn period_label(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => trading_date_from_text(text).map(|_| text[..10].to_owned()),
        Value::Object(object) => object
            .get("fmt")
            .and_then(period_label)
            .or_else(|| object.get("raw").and_then(period_label)),
        Value::Number(number) => {
            let date = OffsetDateTime::from_unix_timestamp(number.as_i64()?).ok()?.date();
            let format = format_description!("[year]-[month]-[day]");
            date.format(format).ok()
        }
        _ => None,
    }
}
