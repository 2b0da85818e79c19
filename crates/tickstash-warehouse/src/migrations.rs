use ::duckdb::{params, Connection};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_cache_tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS price_cache (
    ticker TEXT NOT NULL,
    bar_interval TEXT NOT NULL,
    lookback TEXT NOT NULL,
    provider TEXT NOT NULL,
    payload TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    PRIMARY KEY(ticker, bar_interval, lookback)
);

CREATE TABLE IF NOT EXISTS fundamentals_cache (
    ticker TEXT PRIMARY KEY,
    provider TEXT NOT NULL,
    payload TEXT NOT NULL,
    fetched_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metadata_cache (
    ticker TEXT PRIMARY KEY,
    provider TEXT NOT NULL,
    payload TEXT NOT NULL,
    fetched_at TEXT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_fetch_log",
        sql: r#"
CREATE TABLE IF NOT EXISTS fetch_log (
    ticker TEXT NOT NULL,
    data_type TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    hit BOOLEAN NOT NULL,
    duration_ms BIGINT NOT NULL,
    backend TEXT,
    provider TEXT,
    outcome TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fetch_log_ticker ON fetch_log(ticker, data_type);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params![migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params![migration.version],
            )?;
        }
    }

    Ok(())
}
