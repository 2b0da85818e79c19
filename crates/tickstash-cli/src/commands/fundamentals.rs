use tickstash_core::{GetOptions, Metric, Ticker};

use crate::cli::TickerArgs;
use crate::error::CliError;
use crate::runtime::Runtime;

use super::CommandResult;

pub async fn run(
    args: &TickerArgs,
    runtime: &Runtime,
    options: GetOptions,
) -> Result<CommandResult, CliError> {
    let ticker = Ticker::parse(&args.ticker)?;
    let result = runtime.orchestrator.get_fundamentals(&ticker, options).await;

    let missing = result
        .as_ref()
        .map(|resolved| Metric::ALL.len() - resolved.value.present_count())
        .unwrap_or_default();
    let command_result = CommandResult::from_fetch(result)?;
    if missing > 0 {
        return Ok(command_result
            .with_warning(format!("{missing} fundamentals fields are unavailable")));
    }
    Ok(command_result)
}
