//! CLI argument definitions for tickstash.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `price` | Daily, weekly or monthly price history |
//! | `fundamentals` | Fundamentals snapshot with derived growth metrics |
//! | `metadata` | Company profile |
//! | `batch` | One data type for many tickers |
//! | `sql` | Read-only query over the local cache |
//! | `sources` | Provider priority and policies |
//!
//! Every data command is cache-first: a fresh cached value is returned without
//! contacting any provider.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "tickstash",
    author,
    version,
    about = "Cache-first market data for Nordic equities",
    long_about = "tickstash resolves prices, fundamentals and company metadata through a \
cache-first pipeline: a local DuckDB cache and an optional remote store are consulted \
before Yahoo Finance and Alpha Vantage, in configured priority order.\n\
\n\
Use 'tickstash <command> --help' for command-specific help."
)]
pub struct Cli {
    /// YAML configuration file. Defaults to `$TICKSTASH_HOME/config.yaml` when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Fail instead of serving stale cache entries when every provider fails.
    #[arg(long, global = true, default_value_t = false)]
    pub strict_freshness: bool,

    /// Log filter, e.g. `debug` or `tickstash_core=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch price history.
    ///
    /// # Examples
    ///
    ///   tickstash price VOLV-B.ST
    ///   tickstash price ERIC-B.ST --interval 1wk --window 5y --pretty
    Price(PriceArgs),

    /// Fetch a fundamentals snapshot.
    ///
    ///   tickstash fundamentals HM-B.ST
    Fundamentals(TickerArgs),

    /// Fetch company metadata.
    ///
    ///   tickstash metadata ERIC-B.ST
    Metadata(TickerArgs),

    /// Resolve one data type for many tickers concurrently.
    ///
    ///   tickstash batch VOLV-B.ST ERIC-B.ST HM-B.ST --data-type fundamentals
    Batch(BatchArgs),

    /// Run a read-only SQL query against the local cache.
    ///
    /// Only SELECT, WITH, SHOW and DESCRIBE statements are accepted, with a
    /// row limit and a timeout.
    ///
    ///   tickstash sql "SELECT ticker, outcome, duration_ms FROM fetch_log LIMIT 20"
    Sql(SqlArgs),

    /// Show provider priority, pacing and retry policies.
    Sources,
}

#[derive(Debug, Args)]
pub struct TickerArgs {
    /// Exchange-qualified ticker, e.g. VOLV-B.ST.
    pub ticker: String,
}

#[derive(Debug, Args)]
pub struct PriceArgs {
    pub ticker: String,

    /// Bar interval: 1d, 1wk or 1mo.
    #[arg(long, default_value = "1d")]
    pub interval: String,

    /// Lookback window: 1mo, 3mo, 6mo, 1y, 2y, 5y or max.
    #[arg(long, default_value = "1y")]
    pub window: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BatchDataType {
    Price,
    Fundamentals,
    Metadata,
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    #[arg(required = true, num_args = 1..)]
    pub tickers: Vec<String>,

    #[arg(long, value_enum, default_value_t = BatchDataType::Price)]
    pub data_type: BatchDataType,

    /// Bar interval for price batches.
    #[arg(long, default_value = "1d")]
    pub interval: String,

    /// Lookback window for price batches.
    #[arg(long, default_value = "1y")]
    pub window: String,
}

#[derive(Debug, Args)]
pub struct SqlArgs {
    pub query: String,

    #[arg(long, default_value_t = 10_000)]
    pub max_rows: usize,

    #[arg(long, default_value_t = 5_000)]
    pub query_timeout_ms: u64,
}
