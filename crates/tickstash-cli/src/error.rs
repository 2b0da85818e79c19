use std::path::PathBuf;

use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] tickstash_core::ValidationError),

    #[error("invalid configuration: {0}")]
    Config(#[from] tickstash_core::ConfigError),

    #[error("failed to parse {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cache unavailable: {0}")]
    Cache(#[from] tickstash_core::CacheError),

    #[error(transparent)]
    Warehouse(#[from] tickstash_warehouse::WarehouseError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Command(_) => 2,
            Self::Config(_) | Self::ConfigFile { .. } => 3,
            Self::Serialization(_) => 4,
            Self::Cache(_) | Self::Warehouse(_) => 6,
            Self::Io(_) => 10,
        }
    }
}
