//! Local DuckDB store for tickstash.
//!
//! Holds one row per cache key in `price_cache`, `fundamentals_cache` and
//! `metadata_cache`, plus the append-only `fetch_log`. Payloads are stored as
//! opaque JSON text; decoding them is the caller's concern.

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ::duckdb::types::Value as DuckValue;
use ::duckdb::{params, Connection, OptionalExt};
use serde::Serialize;
use serde_json::{Number, Value};
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("query rejected: {0}")]
    QueryRejected(String),

    #[error("query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub tickstash_home: PathBuf,
    pub db_path: PathBuf,
    pub max_pool_size: usize,
}

impl WarehouseConfig {
    pub fn under_home(tickstash_home: PathBuf) -> Self {
        let db_path = tickstash_home.join("cache").join("tickstash.duckdb");
        Self {
            tickstash_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryGuardrails {
    pub max_rows: usize,
    pub query_timeout_ms: u64,
}

impl Default for QueryGuardrails {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            query_timeout_ms: 5_000,
        }
    }
}

impl QueryGuardrails {
    fn timeout(self) -> Duration {
        Duration::from_millis(self.query_timeout_ms.max(1))
    }

    fn validate(self) -> Result<(), WarehouseError> {
        if self.max_rows == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "--max-rows must be greater than zero",
            )));
        }
        if self.query_timeout_ms == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "--query-timeout-ms must be greater than zero",
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SqlColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<SqlColumn>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub truncated: bool,
}

/// One cached payload as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRow {
    pub provider: String,
    pub payload: String,
    /// RFC3339 UTC retrieval timestamp.
    pub fetched_at: String,
}

/// Key columns of `price_cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceKey<'a> {
    pub ticker: &'a str,
    pub bar_interval: &'a str,
    pub lookback: &'a str,
}

/// Which single-key table a snapshot row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTable {
    Fundamentals,
    Metadata,
}

impl SnapshotTable {
    const fn table_name(self) -> &'static str {
        match self {
            Self::Fundamentals => "fundamentals_cache",
            Self::Metadata => "metadata_cache",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchLogRecord {
    pub ticker: String,
    pub data_type: String,
    pub fetched_at: String,
    pub hit: bool,
    pub duration_ms: u64,
    pub backend: Option<String>,
    pub provider: Option<String>,
    pub outcome: String,
}

#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    pub fn get_price(&self, key: PriceKey<'_>) -> Result<Option<CacheRow>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let row = connection
            .query_row(
                "SELECT provider, payload, fetched_at FROM price_cache \
                 WHERE ticker = ? AND bar_interval = ? AND lookback = ?",
                params![key.ticker, key.bar_interval, key.lookback],
                read_cache_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn upsert_price(&self, key: PriceKey<'_>, row: &CacheRow) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        connection.execute(
            "INSERT OR REPLACE INTO price_cache \
             (ticker, bar_interval, lookback, provider, payload, fetched_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                key.ticker,
                key.bar_interval,
                key.lookback,
                row.provider,
                row.payload,
                row.fetched_at
            ],
        )?;
        Ok(())
    }

    pub fn get_snapshot(
        &self,
        table: SnapshotTable,
        ticker: &str,
    ) -> Result<Option<CacheRow>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let sql = format!(
            "SELECT provider, payload, fetched_at FROM {} WHERE ticker = ?",
            table.table_name()
        );
        let row = connection
            .query_row(sql.as_str(), params![ticker], read_cache_row)
            .optional()?;
        Ok(row)
    }

    pub fn upsert_snapshot(
        &self,
        table: SnapshotTable,
        ticker: &str,
        row: &CacheRow,
    ) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let sql = format!(
            "INSERT OR REPLACE INTO {} (ticker, provider, payload, fetched_at) VALUES (?, ?, ?, ?)",
            table.table_name()
        );
        connection.execute(
            sql.as_str(),
            params![ticker, row.provider, row.payload, row.fetched_at],
        )?;
        Ok(())
    }

    pub fn append_fetch_log(&self, record: &FetchLogRecord) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let duration_ms = i64::try_from(record.duration_ms).unwrap_or(i64::MAX);
        connection.execute(
            "INSERT INTO fetch_log \
             (ticker, data_type, fetched_at, hit, duration_ms, backend, provider, outcome) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.ticker,
                record.data_type,
                record.fetched_at,
                record.hit,
                duration_ms,
                record.backend,
                record.provider,
                record.outcome
            ],
        )?;
        Ok(())
    }

    pub fn execute_query(
        &self,
        sql: &str,
        guardrails: QueryGuardrails,
    ) -> Result<QueryResult, WarehouseError> {
        guardrails.validate()?;
        let sql = normalize_sql(sql)?;
        enforce_read_only_query(sql)?;

        let connection = self.manager.acquire()?;
        execute_select_query(&connection, sql, guardrails, Instant::now())
    }
}

fn read_cache_row(row: &::duckdb::Row<'_>) -> Result<CacheRow, ::duckdb::Error> {
    Ok(CacheRow {
        provider: row.get(0)?,
        payload: row.get(1)?,
        fetched_at: row.get(2)?,
    })
}

fn execute_select_query(
    connection: &Connection,
    sql: &str,
    guardrails: QueryGuardrails,
    started: Instant,
) -> Result<QueryResult, WarehouseError> {
    let mut statement = connection.prepare(sql)?;
    let mut rows_cursor = statement.query([])?;
    let column_count = rows_cursor
        .as_ref()
        .map(|statement| statement.column_count())
        .unwrap_or_default();

    let mut rows = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows_cursor.next()? {
        ensure_timeout(started, guardrails.timeout())?;

        if rows.len() >= guardrails.max_rows {
            truncated = true;
            break;
        }

        rows.push(read_row(row, column_count)?);
    }
    drop(rows_cursor);

    // Column metadata is only populated once the statement has executed.
    let columns = (0..statement.column_count())
        .map(|index| SqlColumn {
            name: statement
                .column_name(index)
                .map(|name| name.to_string())
                .unwrap_or_else(|_| format!("column_{index}")),
            r#type: statement.column_type(index).to_string(),
        })
        .collect();

    ensure_timeout(started, guardrails.timeout())?;

    Ok(QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        truncated,
    })
}

fn read_row(row: &::duckdb::Row<'_>, column_count: usize) -> Result<Vec<Value>, ::duckdb::Error> {
    let mut output = Vec::with_capacity(column_count);
    for index in 0..column_count {
        let value: DuckValue = row.get(index)?;
        output.push(to_json_value(value));
    }
    Ok(output)
}

fn to_json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(value) => Value::Bool(value),
        DuckValue::TinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::SmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::Int(value) => Value::Number(Number::from(value)),
        DuckValue::BigInt(value) => Value::Number(Number::from(value)),
        DuckValue::UTinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::USmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::UInt(value) => Value::Number(Number::from(value)),
        DuckValue::UBigInt(value) => Value::Number(Number::from(value)),
        DuckValue::Float(value) => number_from_f64(f64::from(value)),
        DuckValue::Double(value) => number_from_f64(value),
        DuckValue::Text(value) => Value::String(value),
        DuckValue::Blob(value) => Value::String(hex::encode(value)),
        other => Value::String(format!("{other:?}")),
    }
}

fn number_from_f64(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn normalize_sql(sql: &str) -> Result<&str, WarehouseError> {
    let normalized = sql.trim();
    if normalized.is_empty() {
        return Err(WarehouseError::QueryRejected(String::from(
            "query must not be empty",
        )));
    }
    Ok(normalized.trim_end_matches(';').trim())
}

fn enforce_read_only_query(sql: &str) -> Result<(), WarehouseError> {
    if !is_select_like(sql) {
        return Err(WarehouseError::QueryRejected(String::from(
            "only SELECT/CTE queries are accepted against the cache",
        )));
    }
    if sql.split(';').filter(|part| !part.trim().is_empty()).count() > 1 {
        return Err(WarehouseError::QueryRejected(String::from(
            "multiple SQL statements are not allowed",
        )));
    }
    Ok(())
}

fn is_select_like(sql: &str) -> bool {
    let first_keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(
        first_keyword.as_str(),
        "SELECT" | "WITH" | "SHOW" | "DESCRIBE"
    )
}

fn ensure_timeout(started: Instant, timeout: Duration) -> Result<(), WarehouseError> {
    if started.elapsed() > timeout {
        return Err(WarehouseError::QueryTimeout {
            timeout_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
        });
    }
    Ok(())
}

pub fn resolve_tickstash_home() -> PathBuf {
    if let Some(path) = env::var_os("TICKSTASH_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tickstash");
    }

    PathBuf::from(".tickstash")
}
