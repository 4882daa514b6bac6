//! Bootstrap and lookup of live sources.
//!
//! [`bootstrap`] turns a [`SourcesFile`] into a [`SourceCatalog`]: each entry
//! is decoded through the registry and initialized in declaration order. A
//! failing entry is reported in [`BootstrapReport::failures`] and never stops
//! its siblings.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{SourceEntry, SourcesFile};
use crate::error::{DecodeError, SourceError};
use crate::registry::SourceRegistry;
use crate::source::{InitContext, Source, SourceConfig};

/// Lifecycle state shown for a catalogued source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ready,
    Closed,
}

impl SourceStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Closed => "closed",
        }
    }
}

/// Source snapshot used by the `sources` CLI command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSnapshot {
    pub name: String,
    pub kind: String,
    pub status: SourceStatus,
    pub initialized_at: String,
}

struct CatalogEntry {
    source: Arc<dyn Source>,
    initialized_at: OffsetDateTime,
}

/// Live sources keyed by name.
#[derive(Default)]
pub struct SourceCatalog {
    sources: BTreeMap<String, CatalogEntry>,
}

impl fmt::Debug for SourceCatalog {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCatalog")
            .field("sources", &self.names())
            .finish()
    }
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sources(sources: Vec<Arc<dyn Source>>) -> Self {
        let mut catalog = Self::new();
        for source in sources {
            catalog.insert(source);
        }
        catalog
    }

    /// Adds a source, returning any previous source registered under the same name.
    pub fn insert(&mut self, source: Arc<dyn Source>) -> Option<Arc<dyn Source>> {
        let entry = CatalogEntry {
            source,
            initialized_at: OffsetDateTime::now_utc(),
        };
        self.sources
            .insert(entry.source.name().to_owned(), entry)
            .map(|previous| previous.source)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Source>> {
        self.sources.get(name).map(|entry| &entry.source)
    }

    /// Looks up a source and borrows it as a concrete backend type.
    pub fn get_as<T: Source>(&self, name: &str) -> Option<&T> {
        self.get(name)?.downcast_ref::<T>()
    }

    /// Names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    pub fn snapshots(&self) -> Vec<SourceSnapshot> {
        self.sources
            .iter()
            .map(|(name, entry)| SourceSnapshot {
                name: name.clone(),
                kind: entry.source.kind().to_owned(),
                status: if entry.source.is_closed() {
                    SourceStatus::Closed
                } else {
                    SourceStatus::Ready
                },
                initialized_at: entry
                    .initialized_at
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| entry.initialized_at.unix_timestamp().to_string()),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Closes every source; errors are collected rather than short-circuiting.
    pub fn close_all(&self) -> Vec<SourceError> {
        self.sources
            .values()
            .filter_map(|entry| entry.source.close().err())
            .collect()
    }
}

/// Why a configured source did not make it into the catalog.
#[derive(Debug, Clone)]
pub enum InitFailureCause {
    Decode(DecodeError),
    Init(SourceError),
}

impl Display for InitFailureCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(error) => write!(f, "{error}"),
            Self::Init(error) => write!(f, "{error}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitFailure {
    pub name: String,
    pub kind: Option<String>,
    pub cause: InitFailureCause,
}

impl InitFailure {
    fn decode(entry: &SourceEntry, error: DecodeError) -> Self {
        Self {
            name: entry.name.clone(),
            kind: entry.kind().map(str::to_owned),
            cause: InitFailureCause::Decode(error),
        }
    }

    pub const fn is_decode(&self) -> bool {
        matches!(self.cause, InitFailureCause::Decode(_))
    }
}

/// Outcome of [`bootstrap`]: the usable sources plus every per-source failure.
#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub catalog: SourceCatalog,
    pub failures: Vec<InitFailure>,
}

impl BootstrapReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Decoded configs plus the entries that failed to decode.
#[derive(Debug, Default)]
pub struct DecodeReport {
    pub configs: Vec<Arc<dyn SourceConfig>>,
    pub failures: Vec<InitFailure>,
}

/// Decodes every entry without touching the network.
pub fn decode_all(registry: &SourceRegistry, file: &SourcesFile) -> DecodeReport {
    let mut report = DecodeReport::default();
    for entry in file.entries() {
        let decoded = entry
            .checked_document()
            .and_then(|document| registry.decode(&entry.name, document));
        match decoded {
            Ok(config) => report.configs.push(config),
            Err(error) => report.failures.push(InitFailure::decode(entry, error)),
        }
    }
    report
}

/// Decodes and initializes every configured source.
pub async fn bootstrap(
    registry: &SourceRegistry,
    file: &SourcesFile,
    ctx: &InitContext,
) -> BootstrapReport {
    let span = info_span!(
        "bootstrap",
        bootstrap_id = %ctx.bootstrap_id(),
        sources = file.len()
    );

    async {
        let decoded = decode_all(registry, file);
        let mut report = BootstrapReport {
            catalog: SourceCatalog::new(),
            failures: decoded.failures,
        };
        for failure in &report.failures {
            warn!(source = %failure.name, error = %failure.cause, "source rejected during decode");
        }

        for config in decoded.configs {
            let name = config.name().to_owned();
            let kind = config.kind().to_owned();
            match config.initialize(ctx).await {
                Ok(source) => {
                    report.catalog.insert(source);
                }
                Err(error) => {
                    warn!(source = %name, kind = %kind, error = %error, "source failed to initialize");
                    report.failures.push(InitFailure {
                        name,
                        kind: Some(kind),
                        cause: InitFailureCause::Init(error),
                    });
                }
            }
        }

        info!(
            ready = report.catalog.len(),
            failed = report.failures.len(),
            "bootstrap finished"
        );
        report
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::http::HttpSource;
    use crate::http_client::ScriptedHttpClient;

    const FILE: &str = r#"
sources:
  api:
    kind: http
    base_url: https://api.example.test
  broken:
    kind: http
  unknown:
    kind: oracle
"#;

    #[tokio::test]
    async fn decode_failures_do_not_block_valid_sources() {
        let registry = SourceRegistry::builtin().expect("registry");
        let file = SourcesFile::from_yaml_str(FILE).expect("file");
        let ctx = InitContext::new(Arc::new(ScriptedHttpClient::new().respond(200, "ok")));

        let report = bootstrap(&registry, &file, &ctx).await;

        assert_eq!(report.catalog.names(), vec!["api"]);
        assert!(report.catalog.get_as::<HttpSource>("api").is_some());
        let failed: Vec<_> = report.failures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, vec!["broken", "unknown"]);
        assert!(report.failures.iter().all(InitFailure::is_decode));
    }

    #[tokio::test]
    async fn snapshots_reflect_closed_sources() {
        let registry = SourceRegistry::builtin().expect("registry");
        let file = SourcesFile::from_yaml_str(
            "sources:\n  api:\n    kind: http\n    base_url: https://api.example.test\n",
        )
        .expect("file");
        let ctx = InitContext::new(Arc::new(ScriptedHttpClient::new().respond(204, "")));
        let report = bootstrap(&registry, &file, &ctx).await;

        assert_eq!(report.catalog.snapshots()[0].status, SourceStatus::Ready);
        assert!(report.catalog.close_all().is_empty());
        assert!(report.catalog.close_all().is_empty());

        let snapshot = &report.catalog.snapshots()[0];
        assert_eq!(snapshot.status, SourceStatus::Closed);
        assert_eq!(snapshot.kind, "http");
        assert!(OffsetDateTime::parse(&snapshot.initialized_at, &Rfc3339).is_ok());
    }
}
