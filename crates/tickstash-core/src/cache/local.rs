use tickstash_warehouse::{
    CacheRow, FetchLogRecord, PriceKey, QueryGuardrails, SnapshotTable, Warehouse, WarehouseError,
};
use tokio::task;

use crate::cache::{BackendError, BackendFuture, BackendKind, CacheBackend, CacheKey};

/// Embedded DuckDB backend. DuckDB calls block, so each runs on the blocking pool.
#[derive(Clone)]
pub struct LocalBackend {
    warehouse: Warehouse,
}

impl LocalBackend {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    async fn run<T, F>(&self, operation: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&Warehouse) -> Result<T, WarehouseError> + Send + 'static,
    {
        let warehouse = self.warehouse.clone();
        task::spawn_blocking(move || operation(&warehouse))
            .await
            .map_err(|error| BackendError::unavailable(BackendKind::Local, error.to_string()))?
            .map_err(|error| BackendError::unavailable(BackendKind::Local, error.to_string()))
    }
}

impl CacheBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn read<'a>(&'a self, key: &'a CacheKey) -> BackendFuture<'a, Option<CacheRow>> {
        let key = key.clone();
        Box::pin(self.run(move |warehouse| match &key {
            CacheKey::Price {
                ticker,
                interval,
                window,
            } => warehouse.get_price(PriceKey {
                ticker: ticker.as_str(),
                bar_interval: interval.as_str(),
                lookback: window.as_str(),
            }),
            CacheKey::Fundamentals(ticker) => {
                warehouse.get_snapshot(SnapshotTable::Fundamentals, ticker.as_str())
            }
            CacheKey::Metadata(ticker) => {
                warehouse.get_snapshot(SnapshotTable::Metadata, ticker.as_str())
            }
        }))
    }

    fn write<'a>(&'a self, key: &'a CacheKey, row: &'a CacheRow) -> BackendFuture<'a, ()> {
        let key = key.clone();
        let row = row.clone();
        Box::pin(self.run(move |warehouse| match &key {
            CacheKey::Price {
                ticker,
                interval,
                window,
            } => warehouse.upsert_price(
                PriceKey {
                    ticker: ticker.as_str(),
                    bar_interval: interval.as_str(),
                    lookback: window.as_str(),
                },
                &row,
            ),
            CacheKey::Fundamentals(ticker) => {
                warehouse.upsert_snapshot(SnapshotTable::Fundamentals, ticker.as_str(), &row)
            }
            CacheKey::Metadata(ticker) => {
                warehouse.upsert_snapshot(SnapshotTable::Metadata, ticker.as_str(), &row)
            }
        }))
    }

    fn append_audit<'a>(&'a self, record: &'a FetchLogRecord) -> BackendFuture<'a, ()> {
        let record = record.clone();
        Box::pin(self.run(move |warehouse| warehouse.append_fetch_log(&record)))
    }

    fn probe<'a>(&'a self) -> BackendFuture<'a, ()> {
        Box::pin(self.run(|warehouse| {
            warehouse
                .execute_query("SELECT 1", QueryGuardrails::default())
                .map(|_| ())
        }))
    }
}
