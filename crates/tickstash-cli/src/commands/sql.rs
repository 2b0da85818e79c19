use tickstash_core::AppConfig;
use tickstash_warehouse::QueryGuardrails;

use crate::cli::SqlArgs;
use crate::error::CliError;
use crate::runtime::open_local_warehouse;

use super::CommandResult;

pub fn run(args: &SqlArgs, config: &AppConfig) -> Result<CommandResult, CliError> {
    let query = args.query.trim();
    if query.is_empty() {
        return Err(CliError::Command(String::from("query must not be empty")));
    }

    let warehouse = open_local_warehouse(config)?;
    let guardrails = QueryGuardrails {
        max_rows: args.max_rows,
        query_timeout_ms: args.query_timeout_ms,
    };
    let result = warehouse.execute_query(query, guardrails)?;

    let truncated = result.truncated;
    let row_count = result.row_count;
    let command_result = CommandResult::ok(serde_json::to_value(&result)?);
    if truncated {
        return Ok(command_result.with_warning(format!(
            "result truncated at {row_count} rows (use --max-rows to increase limit)"
        )));
    }
    Ok(command_result)
}
