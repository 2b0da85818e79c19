use serde::Serialize;

use tickstash_core::{AppConfig, Credentials, ProviderId, ProviderPolicy};

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct SourceStatus {
    id: ProviderId,
    priority: usize,
    configured: bool,
    quota_limit: u32,
    quota_window_secs: u64,
    request_timeout_ms: u64,
    max_attempts: u32,
}

#[derive(Debug, Serialize)]
struct SourcesResponseData {
    sources: Vec<SourceStatus>,
    provider_call_concurrency: usize,
    ticker_concurrency: usize,
}

pub fn run(config: &AppConfig, credentials: &Credentials) -> Result<CommandResult, CliError> {
    let sources = config
        .providers()?
        .into_iter()
        .enumerate()
        .map(|(index, id)| {
            let policy = ProviderPolicy::default_for(id);
            SourceStatus {
                id,
                priority: index + 1,
                configured: match id {
                    ProviderId::Yahoo => true,
                    ProviderId::Alphavantage => credentials.alphavantage_api_key.is_some(),
                },
                quota_limit: policy.quota_limit,
                quota_window_secs: policy.quota_window.as_secs(),
                request_timeout_ms: policy.request_timeout_ms,
                max_attempts: policy.retry.max_attempts,
            }
        })
        .collect::<Vec<_>>();

    let unconfigured = sources
        .iter()
        .filter(|source| !source.configured)
        .map(|source| source.id.to_string())
        .collect::<Vec<_>>();

    let data = serde_json::to_value(SourcesResponseData {
        sources,
        provider_call_concurrency: config.concurrency.provider_calls,
        ticker_concurrency: config.concurrency.tickers,
    })?;

    let mut command_result = CommandResult::ok(data);
    for provider in unconfigured {
        command_result =
            command_result.with_warning(format!("{provider} has no api key and will be skipped"));
    }
    Ok(command_result)
}
