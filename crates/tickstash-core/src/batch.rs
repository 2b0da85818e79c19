use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::orchestrator::{DataOrchestrator, DataRequest, FetchError, GetOptions, Resolved};
use crate::Ticker;

pub const DEFAULT_TICKER_CONCURRENCY: usize = 32;

/// Cooperative stop signal. Tickers that have not started yet are skipped;
/// tickers already in flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BatchError {
    #[error("cancelled before start")]
    Cancelled,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("ticker task aborted: {0}")]
    Aborted(String),
}

/// Outcome for one ticker of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub ticker: Ticker,
    pub outcome: Result<Resolved, BatchError>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub resolved: usize,
    pub stale: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchSummary {
    pub fn of(items: &[BatchItem]) -> Self {
        items.iter().fold(Self::default(), |mut summary, item| {
            match &item.outcome {
                Ok(resolved) if resolved.stale => summary.stale += 1,
                Ok(_) => summary.resolved += 1,
                Err(BatchError::Cancelled) => summary.cancelled += 1,
                Err(_) => summary.failed += 1,
            }
            summary
        })
    }
}

/// Resolves many tickers concurrently. Provider calls are additionally bounded
/// by the orchestrator's provider chain.
pub struct BatchRunner {
    orchestrator: Arc<DataOrchestrator>,
    ticker_permits: Arc<Semaphore>,
    cancel: CancellationFlag,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<DataOrchestrator>) -> Self {
        Self::with_concurrency(orchestrator, DEFAULT_TICKER_CONCURRENCY)
    }

    pub fn with_concurrency(orchestrator: Arc<DataOrchestrator>, max_tickers: usize) -> Self {
        Self {
            orchestrator,
            ticker_permits: Arc::new(Semaphore::new(max_tickers.max(1))),
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Runs `request` for every ticker. Results come back in input order, one per ticker.
    pub async fn run(
        &self,
        tickers: Vec<Ticker>,
        request: DataRequest,
        options: GetOptions,
    ) -> Vec<BatchItem> {
        let total = tickers.len();
        let mut tasks = JoinSet::new();

        for (index, ticker) in tickers.iter().cloned().enumerate() {
            let orchestrator = Arc::clone(&self.orchestrator);
            let permits = Arc::clone(&self.ticker_permits);
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) if cancel.is_cancelled() => Err(BatchError::Cancelled),
                    Ok(_permit) => orchestrator
                        .get(&ticker, &request, options)
                        .await
                        .map_err(BatchError::from),
                    Err(_) => Err(BatchError::Aborted(String::from("ticker pool closed"))),
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<Result<Resolved, BatchError>>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Err(error) = &outcome {
                        debug!(ticker = %tickers[index], error = %error, "batch ticker failed");
                    }
                    slots[index] = Some(outcome);
                }
                Err(error) => warn!(error = %error, "batch ticker task did not complete"),
            }
        }

        let items: Vec<BatchItem> = tickers
            .into_iter()
            .zip(slots)
            .map(|(ticker, slot)| BatchItem {
                ticker,
                outcome: slot
                    .unwrap_or_else(|| Err(BatchError::Aborted(String::from("task panicked")))),
            })
            .collect();

        let summary = BatchSummary::of(&items);
        info!(
            total,
            resolved = summary.resolved,
            stale = summary.stale,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "batch finished"
        );
        items
    }
}
