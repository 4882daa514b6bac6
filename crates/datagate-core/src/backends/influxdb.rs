//! InfluxDB v2 HTTP API.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;

use crate::config::{decode_document, DecodeContext, Validate};
use crate::error::{DecodeError, SourceError};
use crate::executor::{ensure_success, RequestBody, RequestError, RequestExecutor};
use crate::http_client::{HttpAuth, HttpMethod};
use crate::retry::RetrySettings;
use crate::source::{to_document, BoxFuture, InitContext, Source, SourceConfig};

pub const KIND: &str = "influxdb";

/// Connection parameters of an `influxdb` source.
///
/// | Field | Default |
/// |-------|---------|
/// | `port` | `8086` |
/// | `use_tls` | `false` |
/// | `timeout_ms` | `10000` |
/// | `retry.max_retries` | `3` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfluxDbConfig {
    #[serde(skip_deserializing)]
    pub name: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_tls: Option<bool>,
    pub org: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "RetrySettings::is_empty")]
    pub retry: RetrySettings,
}

impl InfluxDbConfig {
    pub const DEFAULT_PORT: u16 = 8086;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn base_url(&self) -> String {
        super::base_url(
            self.use_tls.unwrap_or(false),
            &self.host,
            self.port.unwrap_or(Self::DEFAULT_PORT),
        )
    }

    pub fn effective_timeout(&self) -> Duration {
        super::timeout_or(self.timeout_ms, Self::DEFAULT_TIMEOUT)
    }

    fn verify_path(&self) -> String {
        format!("/api/v2/buckets?org={}&limit=1", urlencoding::encode(&self.org))
    }
}

impl Validate for InfluxDbConfig {
    fn validate(&self, ctx: &DecodeContext) -> Result<(), DecodeError> {
        super::validate_host(ctx, &self.host)?;
        ctx.require_non_empty("org", &self.org)?;
        ctx.require_non_empty("token", &self.token)?;
        if self.port == Some(0) {
            return Err(ctx.invalid_field("port", "must be greater than zero"));
        }
        if let Some(bucket) = &self.bucket {
            ctx.require_non_empty("bucket", bucket)?;
        }
        super::validate_timeout(ctx, self.timeout_ms)
    }
}

pub fn decode(ctx: &DecodeContext, raw: Value) -> Result<Arc<dyn SourceConfig>, DecodeError> {
    let mut config: InfluxDbConfig = decode_document(ctx, raw)?;
    config.name = ctx.source_name().to_owned();
    Ok(Arc::new(config))
}

impl SourceConfig for InfluxDbConfig {
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
            let executor = RequestExecutor::new(ctx.http_client(), self.base_url())
                .with_auth(HttpAuth::Header {
                    name: String::from("Authorization"),
                    value: format!("Token {}", self.token),
                })
                .with_timeout(self.effective_timeout())
                .with_retry(self.retry.to_config(Self::DEFAULT_MAX_RETRIES));
            let executor =
                super::connect(executor, &self.verify_path(), &self.name, KIND, ctx).await?;

            Ok(Arc::new(InfluxDbSource {
                config: self,
                executor,
            }) as Arc<dyn Source>)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
    #[serde(rename = "orgID", default)]
    pub org_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BucketList {
    #[serde(default)]
    buckets: Vec<Bucket>,
}

/// Verified `influxdb` source.
#[derive(Debug)]
pub struct InfluxDbSource {
    config: Arc<InfluxDbConfig>,
    executor: RequestExecutor,
}

impl InfluxDbSource {
    pub fn config(&self) -> &InfluxDbConfig {
        &self.config
    }

    fn request_error(&self, operation: &'static str, error: RequestError) -> SourceError {
        SourceError::from_request(&self.config.name, KIND, operation, error)
    }

    /// Runs a Flux query and returns the annotated CSV response verbatim.
    pub async fn query(&self, flux: &str, cancel: &CancellationToken) -> Result<String, SourceError> {
        if flux.trim().is_empty() {
            return Err(SourceError::invalid_request(
                &self.config.name,
                KIND,
                "query",
                "flux query must not be empty",
            ));
        }
        let path = format!("/api/v2/query?org={}", urlencoding::encode(&self.config.org));
        let body = RequestBody::json(&json!({ "query": flux, "type": "flux" }))
            .map_err(|error| self.request_error("query", error))?;

        let response = self
            .executor
            .execute(HttpMethod::Post, &path, Some(body), None, cancel)
            .await
            .and_then(ensure_success)
            .map_err(|error| self.request_error("query", error))?;
        Ok(response.body)
    }

    pub async fn list_buckets(&self, cancel: &CancellationToken) -> Result<Vec<Bucket>, SourceError> {
        let path = format!("/api/v2/buckets?org={}", urlencoding::encode(&self.config.org));
        let list: BucketList = self
            .executor
            .execute_json(HttpMethod::Get, &path, None, cancel)
            .await
            .map_err(|error| self.request_error("list_buckets", error))?;
        Ok(list.buckets)
    }
}

impl Source for InfluxDbSource {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceErrorKind;
    use crate::http_client::ScriptedHttpClient;

    fn config(text: &str) -> InfluxDbConfig {
        let ctx = DecodeContext::new("metrics").expect("name");
        let mut config: InfluxDbConfig =
            decode_document(&ctx, serde_yaml::from_str(text).expect("yaml")).expect("valid");
        config.name = String::from("metrics");
        config
    }

    #[test]
    fn defaults_use_plain_http_and_short_timeout() {
        let config = config("host: influx.local\norg: ops\ntoken: t");

        assert_eq!(config.base_url(), "http://influx.local:8086");
        assert_eq!(config.effective_timeout(), Duration::from_secs(10));
        assert_eq!(config.verify_path(), "/api/v2/buckets?org=ops&limit=1");
    }

    #[test]
    fn empty_org_is_missing() {
        let ctx = DecodeContext::new("metrics").expect("name");
        let error = decode(
            &ctx,
            serde_yaml::from_str("kind: influxdb\nhost: h\norg: ''\ntoken: t").expect("yaml"),
        )
        .expect_err("org required");

        assert!(matches!(error, DecodeError::MissingField { ref field, .. } if field == "org"));
    }

    #[tokio::test]
    async fn query_posts_flux_and_returns_csv() {
        let csv = ",result,table,_value\n,_result,0,42\n";
        let client = Arc::new(
            ScriptedHttpClient::new()
                .respond(200, r#"{"buckets":[]}"#)
                .respond(200, csv),
        );
        let ctx = InitContext::new(client.clone());
        let source = Arc::new(config("host: influx.local\norg: ops team\ntoken: secret"))
            .initialize(&ctx)
            .await
            .expect("verified");
        let influx = source.downcast_ref::<InfluxDbSource>().expect("influx source");

        let body = influx
            .query("from(bucket: \"m\") |> range(start: -1h)", &CancellationToken::new())
            .await
            .expect("csv");

        assert_eq!(body, csv);
        let requests = client.requests();
        assert_eq!(requests[0].header("authorization"), Some("Token secret"));
        assert_eq!(requests[1].url, "http://influx.local:8086/api/v2/query?org=ops%20team");
        assert!(requests[1]
            .body
            .as_deref()
            .is_some_and(|body| body.contains(r#""type":"flux""#)));
    }

    #[tokio::test]
    async fn rejected_query_surfaces_status() {
        let client = Arc::new(
            ScriptedHttpClient::new()
                .respond(200, r#"{"buckets":[]}"#)
                .respond(400, r#"{"code":"invalid","message":"compilation failed"}"#),
        );
        let ctx = InitContext::new(client);
        let source = Arc::new(config("host: influx.local\norg: ops\ntoken: t"))
            .initialize(&ctx)
            .await
            .expect("verified");
        let influx = source.downcast_ref::<InfluxDbSource>().expect("influx source");

        let error = influx
            .query("bad flux", &CancellationToken::new())
            .await
            .expect_err("400");

        assert_eq!(error.kind(), SourceErrorKind::Request);
        assert!(error.message().contains("400"));
    }
}
