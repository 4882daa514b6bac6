//! CLI argument definitions for datagate.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sources` | Bootstrap every configured source and report its status |
//! | `validate` | Decode the sources file without contacting any backend |
//! | `kinds` | List registered source kinds |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `$DATAGATE_CONFIG` | Sources file path |
//! | `--format` | `table` | Output format (json, table) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--verbose` | `false` | Debug logging when `RUST_LOG` is unset |
//!
//! # Examples
//!
//! ```bash
//! datagate --config sources.yaml validate
//! DATAGATE_CONFIG=sources.yaml datagate sources --format json --pretty
//! RUST_LOG=datagate_core=debug datagate --config sources.yaml sources
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Connectivity checks for configured data backends.
#[derive(Debug, Parser)]
#[command(name = "datagate", author, version, about = "Connectivity checks for configured data backends")]
pub struct Cli {
    /// Sources file (YAML with a top-level `sources` mapping).
    #[arg(long, global = true, env = "DATAGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Enable debug logging when `RUST_LOG` is unset.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bootstrap every configured source and report its status.
    Sources,
    /// Decode the sources file without contacting any backend.
    Validate,
    /// List registered source kinds.
    Kinds,
}
