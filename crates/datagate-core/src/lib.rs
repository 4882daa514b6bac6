//! # Datagate Core
//!
//! Connectivity layer for external data backends.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Source registry** mapping a `kind` string to its config decoder
//! - **Typed config decoding** from YAML documents with `${VAR}` expansion
//! - **Source lifecycle**: verified construction and idempotent close
//! - **Resilient request executor** with capped exponential backoff
//! - **Async result poller** for long-running remote jobs
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backends`] | Built-in adapters (HTTP, Honeycomb, Splunk, InfluxDB) |
//! | [`catalog`] | Bootstrap and lookup of live sources |
//! | [`config`] | Decode context, sources file, env interpolation |
//! | [`error`] | Decode, registry and source error types |
//! | [`executor`] | Retrying request executor |
//! | [`http_client`] | HTTP client abstraction |
//! | [`poller`] | Poll-until-complete loop |
//! | [`registry`] | Kind → decoder registry |
//! | [`retry`] | Backoff schedules and retry state |
//! | [`source`] | Config and instance traits |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use datagate_core::{bootstrap, InitContext, SourceRegistry, SourcesFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = SourceRegistry::builtin()?;
//!     let file = SourcesFile::load("sources.yaml")?;
//!     let report = bootstrap(&registry, &file, &InitContext::default()).await;
//!
//!     for snapshot in report.catalog.snapshots() {
//!         println!("{} ({}) {}", snapshot.name, snapshot.kind, snapshot.status.as_str());
//!     }
//!     report.catalog.close_all();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Sources File   │────▶│ Source Registry  │
//! └─────────────────┘     └────────┬─────────┘
//!                                  │ decode
//!                                  ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Source Catalog  │◀────│  Source Config   │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Source Instance │────▶│ Request Executor │
//! │   (+ Poller)    │     │ (reqwest/script) │
//! └─────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Source operations return [`SourceError`]; callers branch on its kind:
//!
//! ```rust
//! use datagate_core::{SourceError, SourceErrorKind};
//!
//! fn handle_error(error: SourceError) {
//!     match error.kind() {
//!         SourceErrorKind::Cancelled => {
//!             // Caller gave up; nothing to report
//!         }
//!         SourceErrorKind::BudgetExhausted => {
//!             // Retry or poll ceiling reached; try again later
//!         }
//!         _ => eprintln!("{error}"),
//!     }
//! }
//! ```

pub mod backends;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod http_client;
pub mod poller;
pub mod registry;
pub mod retry;
pub mod source;

pub use catalog::{
    bootstrap, decode_all, BootstrapReport, DecodeReport, InitFailure, InitFailureCause,
    SourceCatalog, SourceSnapshot, SourceStatus,
};
pub use config::{DecodeContext, SourceEntry, SourcesFile, Validate};
pub use error::{CoreError, DecodeError, RegistryError, SourceError, SourceErrorKind};
pub use executor::{AttemptFailure, RequestBody, RequestError, RequestExecutor};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use poller::{poll_until_complete, PollConfig, PollError, PollPhase, PollSettings, PollStatus};
pub use registry::{DecodeFn, SourceRegistry};
pub use retry::{Backoff, RetryConfig, RetrySettings};
pub use source::{close_source, BoxFuture, InitContext, Source, SourceConfig};
