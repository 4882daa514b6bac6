use datagate_core::SourceRegistry;
use serde::Serialize;

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct KindsResponseData<'a> {
    kinds: Vec<&'a str>,
}

pub fn run(registry: &SourceRegistry) -> Result<CommandResult, CliError> {
    let data = serde_json::to_value(KindsResponseData {
        kinds: registry.kinds(),
    })?;
    Ok(CommandResult::ok(data))
}
