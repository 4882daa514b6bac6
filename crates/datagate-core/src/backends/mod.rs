//! Built-in backend adapters.
//!
//! | Kind | Backend | Verification call |
//! |------|---------|-------------------|
//! | `http` | Any HTTP API | `GET <verify_path>` |
//! | `honeycomb` | Honeycomb query API | `GET /1/auth` |
//! | `splunk` | Splunk REST API | `GET /services/server/info` |
//! | `influxdb` | InfluxDB v2 | `GET /api/v2/buckets?org=<org>&limit=1` |
//!
//! Adapters stay thin: connection parameters, one verification call, and
//! operations expressed through [`RequestExecutor`] and the poller. The
//! verification call is a single attempt; the source's retry budget applies
//! only to operations issued after construction.

pub mod honeycomb;
pub mod http;
pub mod influxdb;
pub mod splunk;

use std::time::Duration;

use tracing::{info, info_span, Instrument};

use crate::config::DecodeContext;
use crate::error::{DecodeError, RegistryError, SourceError};
use crate::executor::RequestExecutor;
use crate::registry::SourceRegistry;
use crate::source::InitContext;

pub use honeycomb::{HoneycombConfig, HoneycombSource};
pub use http::{HttpSource, HttpSourceConfig};
pub use influxdb::{InfluxDbConfig, InfluxDbSource};
pub use splunk::{SplunkConfig, SplunkSource};

/// Registers every built-in kind; a collision is a startup error.
pub fn register_builtin(registry: &mut SourceRegistry) -> Result<(), RegistryError> {
    registry.try_register(http::KIND, http::decode)?;
    registry.try_register(honeycomb::KIND, honeycomb::decode)?;
    registry.try_register(splunk::KIND, splunk::decode)?;
    registry.try_register(influxdb::KIND, influxdb::decode)?;
    Ok(())
}

/// Runs the single verification call of a new source.
///
/// On failure the executor is dropped with the error, so no half-built
/// source can escape.
pub(crate) async fn connect(
    executor: RequestExecutor,
    probe_path: &str,
    name: &str,
    kind: &str,
    ctx: &InitContext,
) -> Result<RequestExecutor, SourceError> {
    let span = info_span!(
        "source_init",
        source = name,
        kind,
        bootstrap_id = %ctx.bootstrap_id()
    );

    async {
        executor
            .probe(probe_path, ctx.cancellation())
            .await
            .map_err(|error| {
                if error.is_cancelled() {
                    SourceError::from_request(name, kind, "verify", error)
                } else {
                    SourceError::connection(name, kind, error)
                }
            })?;
        info!(base_url = executor.base_url(), "source verified");
        Ok(executor)
    }
    .instrument(span)
    .await
}

/// Releases an executor's client handle, logging only the first release.
pub(crate) fn release(executor: &RequestExecutor, name: &str, kind: &str) -> Result<(), SourceError> {
    if executor.close() {
        info!(source = name, kind, "source closed");
    }
    Ok(())
}

pub(crate) fn base_url(use_tls: bool, host: &str, port: u16) -> String {
    let scheme = if use_tls { "https" } else { "http" };
    format!("{scheme}://{host}:{port}")
}

pub(crate) fn validate_timeout(
    ctx: &DecodeContext,
    timeout_ms: Option<u64>,
) -> Result<(), DecodeError> {
    match timeout_ms {
        Some(0) => Err(ctx.invalid_field("timeout_ms", "must be greater than zero")),
        _ => Ok(()),
    }
}

pub(crate) fn validate_url(ctx: &DecodeContext, field: &str, url: &str) -> Result<(), DecodeError> {
    ctx.require_non_empty(field, url)?;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ctx.invalid_field(field, "must start with http:// or https://"));
    }
    Ok(())
}

pub(crate) fn validate_host(ctx: &DecodeContext, host: &str) -> Result<(), DecodeError> {
    ctx.require_non_empty("host", host)?;
    if host.contains("://") || host.contains('/') {
        return Err(ctx.invalid_field("host", "must be a bare host name without scheme or path"));
    }
    Ok(())
}

pub(crate) fn timeout_or(timeout_ms: Option<u64>, default: Duration) -> Duration {
    timeout_ms.map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_kinds_register_once() {
        let mut registry = SourceRegistry::new();
        register_builtin(&mut registry).expect("unique kinds");

        assert_eq!(
            register_builtin(&mut registry),
            Err(RegistryError::DuplicateKind {
                kind: String::from("http")
            })
        );
    }

    #[test]
    fn host_validation_rejects_urls() {
        let ctx = DecodeContext::new("s").expect("name");

        assert!(validate_host(&ctx, "splunk.internal").is_ok());
        assert!(matches!(
            validate_host(&ctx, "https://splunk.internal"),
            Err(DecodeError::InvalidField { .. })
        ));
        assert!(matches!(
            validate_host(&ctx, ""),
            Err(DecodeError::MissingField { .. })
        ));
    }

    #[test]
    fn base_url_uses_scheme_from_tls_flag() {
        assert_eq!(base_url(true, "h", 8089), "https://h:8089");
        assert_eq!(base_url(false, "h", 8086), "http://h:8086");
    }
}
