use tickstash_core::{GetOptions, Interval, LookbackWindow, Ticker};

use crate::cli::PriceArgs;
use crate::error::CliError;
use crate::runtime::Runtime;

use super::CommandResult;

pub async fn run(
    args: &PriceArgs,
    runtime: &Runtime,
    options: GetOptions,
) -> Result<CommandResult, CliError> {
    let ticker = Ticker::parse(&args.ticker)?;
    let interval = args.interval.parse::<Interval>()?;
    let window = args.window.parse::<LookbackWindow>()?;

    let result = runtime
        .orchestrator
        .get_price(&ticker, interval, window, options)
        .await;
    CommandResult::from_fetch(result)
}
