use datagate_core::{bootstrap, InitContext, SourceRegistry, SourceSnapshot, SourcesFile};
use serde::Serialize;
use tracing::warn;

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct SourcesResponseData {
    sources: Vec<SourceSnapshot>,
}

pub async fn run(registry: &SourceRegistry, file: &SourcesFile) -> Result<CommandResult, CliError> {
    let ctx = InitContext::default();
    let report = bootstrap(registry, file, &ctx).await;

    let sources = report.catalog.snapshots();
    for error in report.catalog.close_all() {
        warn!(error = %error, "failed to close source");
    }

    let data = serde_json::to_value(SourcesResponseData { sources })?;
    Ok(CommandResult::ok(data).with_failures(&report.failures))
}
