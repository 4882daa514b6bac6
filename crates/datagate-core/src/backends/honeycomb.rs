//! Honeycomb query API.
//!
//! Queries run asynchronously on Honeycomb's side:
//!
//! 1. `POST /1/queries/{dataset}` stores the query definition and returns its id
//! 2. `POST /1/query_results/{dataset}` starts a run and returns a result id
//! 3. `GET /1/query_results/{dataset}/{id}` is polled until `complete`

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{decode_document, DecodeContext, Validate};
use crate::error::{DecodeError, SourceError};
use crate::executor::{RequestBody, RequestError, RequestExecutor};
use crate::http_client::{HttpAuth, HttpMethod};
use crate::poller::{poll_until_complete, PollConfig, PollError, PollSettings, PollStatus};
use crate::retry::RetrySettings;
use crate::source::{to_document, BoxFuture, InitContext, Source, SourceConfig};

pub const KIND: &str = "honeycomb";
pub const DEFAULT_BASE_URL: &str = "https://api.honeycomb.io";
const API_KEY_HEADER: &str = "X-Honeycomb-Team";

/// Connection parameters of a `honeycomb` source.
///
/// | Field | Default |
/// |-------|---------|
/// | `base_url` | `https://api.honeycomb.io` |
/// | `timeout_ms` | `30000` |
/// | `retry.max_retries` | `3` |
/// | `poll.max_attempts` | `10` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HoneycombConfig {
    #[serde(skip_deserializing)]
    pub name: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "RetrySettings::is_empty")]
    pub retry: RetrySettings,
    #[serde(default, skip_serializing_if = "PollSettings::is_empty")]
    pub poll: PollSettings,
}

impl HoneycombConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;

    pub fn effective_base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn effective_timeout(&self) -> Duration {
        super::timeout_or(self.timeout_ms, Self::DEFAULT_TIMEOUT)
    }

    pub fn poll_config(&self) -> PollConfig {
        self.poll.to_config(Self::DEFAULT_POLL_ATTEMPTS)
    }
}

impl Validate for HoneycombConfig {
    fn validate(&self, ctx: &DecodeContext) -> Result<(), DecodeError> {
        ctx.require_non_empty("api_key", &self.api_key)?;
        if let Some(base_url) = &self.base_url {
            super::validate_url(ctx, "base_url", base_url)?;
        }
        super::validate_timeout(ctx, self.timeout_ms)
    }
}

pub fn decode(ctx: &DecodeContext, raw: Value) -> Result<Arc<dyn SourceConfig>, DecodeError> {
    let mut config: HoneycombConfig = decode_document(ctx, raw)?;
    config.name = ctx.source_name().to_owned();
    Ok(Arc::new(config))
}

impl SourceConfig for HoneycombConfig {
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
            let executor = RequestExecutor::new(ctx.http_client(), self.effective_base_url())
                .with_auth(HttpAuth::Header {
                    name: String::from(API_KEY_HEADER),
                    value: self.api_key.clone(),
                })
                .with_timeout(self.effective_timeout())
                .with_retry(self.retry.to_config(Self::DEFAULT_MAX_RETRIES));
            let executor = super::connect(executor, "/1/auth", &self.name, KIND, ctx).await?;

            Ok(Arc::new(HoneycombSource {
                poll: self.poll_config(),
                config: self,
                executor,
            }) as Arc<dyn Source>)
        })
    }
}

/// Dataset summary from `GET /1/datasets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One query result resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    #[serde(default)]
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    fn poll_status(self) -> PollStatus<QueryResult> {
        if let Some(message) = self.error.clone() {
            PollStatus::Failed(message)
        } else if self.complete {
            PollStatus::Complete(self)
        } else {
            PollStatus::Pending
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedQuery {
    id: String,
}

/// Verified `honeycomb` source.
#[derive(Debug)]
pub struct HoneycombSource {
    config: Arc<HoneycombConfig>,
    executor: RequestExecutor,
    poll: PollConfig,
}

impl HoneycombSource {
    pub fn config(&self) -> &HoneycombConfig {
        &self.config
    }

    pub fn poll_config(&self) -> PollConfig {
        self.poll
    }

    fn error(&self, operation: &'static str) -> impl Fn(RequestError) -> SourceError + '_ {
        move |error| SourceError::from_request(&self.config.name, KIND, operation, error)
    }

    fn require_dataset(&self, operation: &'static str, dataset: &str) -> Result<(), SourceError> {
        if dataset.trim().is_empty() {
            return Err(SourceError::invalid_request(
                &self.config.name,
                KIND,
                operation,
                "dataset must not be empty",
            ));
        }
        Ok(())
    }

    pub async fn list_datasets(&self, cancel: &CancellationToken) -> Result<Vec<Dataset>, SourceError> {
        self.executor
            .execute_json(HttpMethod::Get, "/1/datasets", None, cancel)
            .await
            .map_err(self.error("list_datasets"))
    }

    /// Stores a query definition and returns its id.
    pub async fn create_query(
        &self,
        dataset: &str,
        definition: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<String, SourceError> {
        self.require_dataset("create_query", dataset)?;
        let path = format!("/1/queries/{}", urlencoding::encode(dataset));
        let body = RequestBody::json(definition).map_err(self.error("create_query"))?;
        let created: CreatedQuery = self
            .executor
            .execute_json(HttpMethod::Post, &path, Some(body), cancel)
            .await
            .map_err(self.error("create_query"))?;
        Ok(created.id)
    }

    /// Starts a run of a stored query.
    pub async fn create_query_result(
        &self,
        dataset: &str,
        query_id: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, SourceError> {
        self.require_dataset("create_query_result", dataset)?;
        let path = format!("/1/query_results/{}", urlencoding::encode(dataset));
        let body = RequestBody::json(&json!({ "query_id": query_id, "disable_series": false }))
            .map_err(self.error("create_query_result"))?;
        self.executor
            .execute_json(HttpMethod::Post, &path, Some(body), cancel)
            .await
            .map_err(self.error("create_query_result"))
    }

    pub async fn get_query_result(
        &self,
        dataset: &str,
        result_id: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, SourceError> {
        let path = format!(
            "/1/query_results/{}/{}",
            urlencoding::encode(dataset),
            urlencoding::encode(result_id)
        );
        self.executor
            .execute_json(HttpMethod::Get, &path, None, cancel)
            .await
            .map_err(self.error("get_query_result"))
    }

    /// Polls a query result until it completes.
    ///
    /// `max_attempts` overrides the configured poll budget for this call.
    pub async fn wait_for_result(
        &self,
        dataset: &str,
        result_id: &str,
        max_attempts: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, SourceError> {
        self.require_dataset("wait_for_result", dataset)?;
        let mut poll = self.poll;
        if let Some(max_attempts) = max_attempts {
            poll.max_attempts = max_attempts;
        }

        poll_until_complete(&poll, cancel, move |attempt| async move {
            debug!(source = %self.config.name, dataset, result_id, attempt, "fetching query result");
            let result = self.get_query_result(dataset, result_id, cancel).await?;
            Ok::<_, SourceError>(result.poll_status())
        })
        .await
        .map_err(|error| SourceError::from_poll(&self.config.name, KIND, "wait_for_result", error))
    }

    /// Runs a query end to end and returns the completed result.
    pub async fn run_query(
        &self,
        dataset: &str,
        definition: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, SourceError> {
        let query_id = self.create_query(dataset, definition, cancel).await?;
        let started = self.create_query_result(dataset, &query_id, cancel).await?;
        let result_id = started.id.clone();

        match started.poll_status() {
            PollStatus::Complete(result) => Ok(result),
            PollStatus::Failed(message) => Err(SourceError::from_poll(
                &self.config.name,
                KIND,
                "run_query",
                PollError::Failed { message },
            )),
            PollStatus::Pending => {
                self.wait_for_result(dataset, &result_id, None, cancel)
                    .await
            }
        }
    }
}

impl Source for HoneycombSource {
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

    fn decode_yaml(text: &str) -> Result<Arc<dyn SourceConfig>, DecodeError> {
        let ctx = DecodeContext::new("events").expect("name");
        decode(&ctx, serde_yaml::from_str(text).expect("yaml"))
    }

    #[test]
    fn api_key_is_required() {
        let error = decode_yaml("kind: honeycomb").expect_err("api_key missing");

        assert_eq!(
            error,
            DecodeError::MissingField {
                source_name: String::from("events"),
                field: String::from("api_key"),
            }
        );
    }

    #[test]
    fn document_round_trips_through_decoder() {
        let config = decode_yaml("kind: honeycomb\napi_key: k\npoll:\n  max_attempts: 4").expect("valid");
        let document = config.to_document();

        assert_eq!(document["kind"], "honeycomb");
        assert_eq!(document["name"], "events");
        assert_eq!(document["poll"]["max_attempts"], 4);

        let yaml: Value = serde_yaml::to_value(&document).expect("json to yaml");
        let again = decode_yaml_value(yaml);
        assert_eq!(again.to_document(), document);
    }

    fn decode_yaml_value(raw: Value) -> Arc<dyn SourceConfig> {
        let ctx = DecodeContext::new("events").expect("name");
        decode(&ctx, raw).expect("round trip decodes")
    }

    #[test]
    fn defaults_are_documented_values() {
        let config: HoneycombConfig = decode_document(
            &DecodeContext::new("events").expect("name"),
            serde_yaml::from_str("api_key: k").expect("yaml"),
        )
        .expect("valid");

        assert_eq!(config.effective_base_url(), "https://api.honeycomb.io");
        assert_eq!(config.effective_timeout(), Duration::from_secs(30));
        assert_eq!(config.poll_config().max_attempts, 10);
    }

    #[test]
    fn poll_status_prefers_remote_error() {
        let result = QueryResult {
            id: String::from("r1"),
            complete: true,
            data: None,
            links: None,
            error: Some(String::from("query timed out")),
        };

        assert_eq!(
            result.poll_status(),
            PollStatus::Failed(String::from("query timed out"))
        );
    }
}
