mod kinds;
mod sources;
mod validate;

use std::path::Path;

use datagate_core::{InitFailure, InitFailureCause, SourceRegistry, SourcesFile};
use serde::Serialize;
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Per-source failure as rendered by every output format.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub name: String,
    pub kind: Option<String>,
    pub code: &'static str,
    pub message: String,
}

impl From<&InitFailure> for FailureReport {
    fn from(failure: &InitFailure) -> Self {
        let code = match &failure.cause {
            InitFailureCause::Decode(_) => "config.decode",
            InitFailureCause::Init(error) => error.code(),
        };
        Self {
            name: failure.name.clone(),
            kind: failure.kind.clone(),
            code,
            message: failure.cause.to_string(),
        }
    }
}

pub struct CommandResult {
    pub data: Value,
    pub failures: Vec<FailureReport>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            failures: Vec::new(),
        }
    }

    pub fn with_failures<'a>(mut self, failures: impl IntoIterator<Item = &'a InitFailure>) -> Self {
        self.failures.extend(failures.into_iter().map(FailureReport::from));
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let registry = SourceRegistry::builtin()?;

    match &cli.command {
        Command::Kinds => kinds::run(&registry),
        Command::Validate => validate::run(&registry, &load(cli.config.as_deref())?),
        Command::Sources => sources::run(&registry, &load(cli.config.as_deref())?).await,
    }
}

fn load(path: Option<&Path>) -> Result<SourcesFile, CliError> {
    let path = path.ok_or(CliError::MissingConfig)?;
    Ok(SourcesFile::load(path)?)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_config_path_is_reported() {
        let error = load(None).expect_err("no path");

        assert!(matches!(error, CliError::MissingConfig));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "sources: [not, a, mapping]").expect("write");

        let error = load(Some(file.path())).expect_err("malformed");

        assert!(matches!(error, CliError::Config(_)));
    }

    #[tokio::test]
    async fn kinds_command_needs_no_config() {
        let cli = <Cli as clap::Parser>::try_parse_from(["datagate", "kinds"]).expect("args");

        let result = run(&cli).await.expect("kinds");

        assert_eq!(result.data["kinds"][0], "honeycomb");
        assert!(result.failures.is_empty());
    }
}
