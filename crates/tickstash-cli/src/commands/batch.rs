use serde::Serialize;
use serde_json::Value;
use tickstash_core::{
    BatchError, BatchRunner, BatchSummary, DataRequest, EnvelopeError, GetOptions, Interval,
    LookbackWindow, ProviderId, Ticker, UtcDateTime,
};

use crate::cli::{BatchArgs, BatchDataType};
use crate::error::CliError;
use crate::runtime::Runtime;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct BatchRow {
    ticker: Ticker,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<ProviderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fetched_at: Option<UtcDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

#[derive(Debug, Serialize)]
struct BatchResponseData {
    results: Vec<BatchRow>,
    resolved: usize,
    stale: usize,
    failed: usize,
    cancelled: usize,
}

pub async fn run(
    args: &BatchArgs,
    runtime: &Runtime,
    options: GetOptions,
) -> Result<CommandResult, CliError> {
    let tickers = args
        .tickers
        .iter()
        .map(|raw| Ticker::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let request = match args.data_type {
        BatchDataType::Price => DataRequest::Price {
            interval: args.interval.parse::<Interval>()?,
            window: args.window.parse::<LookbackWindow>()?,
        },
        BatchDataType::Fundamentals => DataRequest::Fundamentals,
        BatchDataType::Metadata => DataRequest::Metadata,
    };

    let runner = BatchRunner::with_concurrency(
        runtime.orchestrator.clone(),
        runtime.config.concurrency.tickers,
    );
    let items = runner.run(tickers, request, options).await;
    let summary = BatchSummary::of(&items);

    let mut errors = Vec::new();
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let row = match item.outcome {
            Ok(resolved) => BatchRow {
                ticker: item.ticker,
                status: if resolved.stale { "stale" } else { "ok" },
                source: Some(resolved.source),
                fetched_at: Some(resolved.fetched_at),
                data: Some(serde_json::to_value(&resolved.value)?),
            },
            Err(error) => {
                match &error {
                    BatchError::Fetch(fetch) => errors.extend(EnvelopeError::from_fetch(fetch)),
                    other => errors.push(EnvelopeError::new(
                        "batch.ticker_failed",
                        format!("{}: {other}", item.ticker),
                    )),
                }
                BatchRow {
                    ticker: item.ticker,
                    status: match error {
                        BatchError::Cancelled => "cancelled",
                        _ => "failed",
                    },
                    source: None,
                    fetched_at: None,
                    data: None,
                }
            }
        };
        results.push(row);
    }

    let data = serde_json::to_value(BatchResponseData {
        results,
        resolved: summary.resolved,
        stale: summary.stale,
        failed: summary.failed,
        cancelled: summary.cancelled,
    })?;
    let mut command_result = CommandResult::ok(data).with_errors(errors);
    if summary.stale > 0 {
        command_result =
            command_result.with_warning(format!("{} tickers served from stale cache", summary.stale));
    }
    Ok(command_result)
}
