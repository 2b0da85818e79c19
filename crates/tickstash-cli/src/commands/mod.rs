mod batch;
mod fundamentals;
mod metadata;
mod price;
mod sources;
mod sql;

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tickstash_core::{
    Credentials, Envelope, EnvelopeError, EnvelopeMeta, FetchError, GetOptions, Resolved,
};
use uuid::Uuid;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::runtime::Runtime;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    /// Provenance of the returned value, for single-value commands.
    pub resolved: Option<Resolved<()>>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            resolved: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_errors(mut self, errors: Vec<EnvelopeError>) -> Self {
        self.errors.extend(errors);
        self
    }

    /// Serializes a resolved value, or turns a fetch failure into envelope errors.
    pub fn from_fetch<T: Serialize>(
        result: Result<Resolved<T>, FetchError>,
    ) -> Result<Self, CliError> {
        match result {
            Ok(resolved) => {
                let data = serde_json::to_value(&resolved.value)?;
                Ok(Self {
                    resolved: Some(resolved.map(|_| ())),
                    ..Self::ok(data)
                })
            }
            Err(error) => Ok(Self::ok(Value::Null).with_errors(EnvelopeError::from_fetch(&error))),
        }
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope<Value>, CliError> {
    let started = Instant::now();
    let credentials = Credentials::from_env();
    let config = crate::config::load(cli.config.as_deref(), &credentials)?;
    let options = GetOptions {
        strict_freshness: cli.strict_freshness,
    };

    let command_result = match &cli.command {
        Command::Sql(args) => sql::run(args, &config)?,
        Command::Sources => sources::run(&config, &credentials)?,
        Command::Price(args) => {
            let runtime = Runtime::build(config, &credentials).await?;
            price::run(args, &runtime, options).await?
        }
        Command::Fundamentals(args) => {
            let runtime = Runtime::build(config, &credentials).await?;
            fundamentals::run(args, &runtime, options).await?
        }
        Command::Metadata(args) => {
            let runtime = Runtime::build(config, &credentials).await?;
            metadata::run(args, &runtime, options).await?
        }
        Command::Batch(args) => {
            let runtime = Runtime::build(config, &credentials).await?;
            batch::run(args, &runtime, options).await?
        }
    };

    let CommandResult {
        data,
        warnings,
        errors,
        resolved,
    } = command_result;

    let latency_ms = started.elapsed().as_millis() as u64;
    let mut meta = EnvelopeMeta::new(Uuid::new_v4().to_string(), latency_ms)?;
    if let Some(resolved) = &resolved {
        meta = meta.describe(resolved);
    }
    for warning in warnings {
        meta.push_warning(warning);
    }

    Envelope::with_errors(meta, data, errors).map_err(CliError::from)
}
