//! Generic HTTP source: a base URL, static headers, and resilient requests.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;

use crate::config::{decode_document, DecodeContext, Validate};
use crate::error::{DecodeError, SourceError};
use crate::executor::{RequestBody, RequestExecutor};
use crate::http_client::{HttpAuth, HttpMethod, HttpResponse};
use crate::retry::RetrySettings;
use crate::source::{to_document, BoxFuture, InitContext, Source, SourceConfig};

pub const KIND: &str = "http";

/// Connection parameters of an `http` source.
///
/// | Field | Default |
/// |-------|---------|
/// | `verify_path` | `/` |
/// | `timeout_ms` | `30000` |
/// | `retry.max_retries` | `3` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSourceConfig {
    #[serde(skip_deserializing)]
    pub name: String,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "RetrySettings::is_empty")]
    pub retry: RetrySettings,
}

impl HttpSourceConfig {
    pub const DEFAULT_VERIFY_PATH: &'static str = "/";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn effective_verify_path(&self) -> &str {
        self.verify_path
            .as_deref()
            .unwrap_or(Self::DEFAULT_VERIFY_PATH)
    }

    pub fn effective_timeout(&self) -> Duration {
        super::timeout_or(self.timeout_ms, Self::DEFAULT_TIMEOUT)
    }

    fn executor(&self, ctx: &InitContext) -> RequestExecutor {
        let mut executor = RequestExecutor::new(ctx.http_client(), &self.base_url)
            .with_timeout(self.effective_timeout())
            .with_retry(self.retry.to_config(Self::DEFAULT_MAX_RETRIES));
        if let Some(token) = &self.bearer_token {
            executor = executor.with_auth(HttpAuth::BearerToken(token.clone()));
        }
        for (name, value) in &self.headers {
            executor = executor.with_header(name.as_str(), value.as_str());
        }
        executor
    }
}

impl Validate for HttpSourceConfig {
    fn validate(&self, ctx: &DecodeContext) -> Result<(), DecodeError> {
        super::validate_url(ctx, "base_url", &self.base_url)?;
        super::validate_timeout(ctx, self.timeout_ms)?;
        if let Some(path) = &self.verify_path {
            if !path.starts_with('/') {
                return Err(ctx.invalid_field("verify_path", "must start with '/'"));
            }
        }
        Ok(())
    }
}

pub fn decode(ctx: &DecodeContext, raw: Value) -> Result<Arc<dyn SourceConfig>, DecodeError> {
    let mut config: HttpSourceConfig = decode_document(ctx, raw)?;
    config.name = ctx.source_name().to_owned();
    Ok(Arc::new(config))
}

impl SourceConfig for HttpSourceConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn to_document(&self) -> serde_json::Value {
        to_document(self, KIND)
    }

    fn initialize<'a>(
        self: Arc<Self>,
        ctx: &'a InitContext,
    ) -> BoxFuture<'a, Result<Arc<dyn Source>, SourceError>> {
        Box::pin(async move {
            let executor = super::connect(
                self.executor(ctx),
                self.effective_verify_path(),
                &self.name,
                KIND,
                ctx,
            )
            .await?;

            Ok(Arc::new(HttpSource {
                config: self,
                executor,
            }) as Arc<dyn Source>)
        })
    }
}

/// Verified `http` source.
#[derive(Debug)]
pub struct HttpSource {
    config: Arc<HttpSourceConfig>,
    executor: RequestExecutor,
}

impl HttpSource {
    pub fn config(&self) -> &HttpSourceConfig {
        &self.config
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Resilient request relative to `base_url`; any status below 500 is returned.
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<RequestBody>,
        max_retries: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, SourceError> {
        self.executor
            .execute(method, path, body, max_retries, cancel)
            .await
            .map_err(|error| SourceError::from_request(&self.config.name, KIND, "request", error))
    }
}

impl Source for HttpSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn to_config(&self) -> Arc<dyn SourceConfig> {
        self.config.clone()
    }

    fn close(&self) -> Result<(), SourceError> {
        super::release(&self.executor, &self.config.name, KIND)
    }

    fn is_closed(&self) -> bool {
        self.executor.is_closed()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
