use tickstash_core::{GetOptions, Ticker};

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
    CommandResult::from_fetch(runtime.orchestrator.get_metadata(&ticker, options).await)
}
