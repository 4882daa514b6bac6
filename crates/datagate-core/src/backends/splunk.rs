//! Splunk REST API (management port).

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{decode_document, DecodeContext, Validate};
use crate::error::{DecodeError, SourceError};
use crate::executor::{RequestBody, RequestError, RequestExecutor};
use crate::http_client::{HttpAuth, HttpClient, HttpMethod, ReqwestHttpClient};
use crate::poller::{poll_until_complete, PollConfig, PollSettings, PollStatus};
use crate::retry::RetrySettings;
use crate::source::{to_document, BoxFuture, InitContext, Source, SourceConfig};

pub const KIND: &str = "splunk";

/// Connection parameters of a `splunk` source.
///
/// | Field | Default |
/// |-------|---------|
/// | `port` | `8089` |
/// | `use_tls` | `true` |
/// | `verify_ssl` | `true` |
/// | `timeout_ms` | `30000` |
/// | `retry.max_retries` | `3` |
/// | `poll.max_attempts` | `30` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplunkConfig {
    #[serde(skip_deserializing)]
    pub name: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_tls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_ssl: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "RetrySettings::is_empty")]
    pub retry: RetrySettings,
    #[serde(default, skip_serializing_if = "PollSettings::is_empty")]
    pub poll: PollSettings,
}

impl SplunkConfig {
    pub const DEFAULT_PORT: u16 = 8089;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_POLL_ATTEMPTS: u32 = 30;

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(Self::DEFAULT_PORT)
    }

    pub fn base_url(&self) -> String {
        super::base_url(self.use_tls.unwrap_or(true), &self.host, self.effective_port())
    }

    pub fn effective_timeout(&self) -> Duration {
        super::timeout_or(self.timeout_ms, Self::DEFAULT_TIMEOUT)
    }

    pub fn poll_config(&self) -> PollConfig {
        self.poll.to_config(Self::DEFAULT_POLL_ATTEMPTS)
    }

    // Self-signed management certificates need their own client.
    fn http_client(&self, ctx: &InitContext) -> Result<Arc<dyn HttpClient>, SourceError> {
        if self.verify_ssl.unwrap_or(true) {
            return Ok(ctx.http_client());
        }
        let client = ReqwestHttpClient::insecure()
            .map_err(|error| SourceError::connection(&self.name, KIND, error))?;
        Ok(Arc::new(client))
    }
}

impl Validate for SplunkConfig {
    fn validate(&self, ctx: &DecodeContext) -> Result<(), DecodeError> {
        super::validate_host(ctx, &self.host)?;
        ctx.require_non_empty("token", &self.token)?;
        if self.port == Some(0) {
            return Err(ctx.invalid_field("port", "must be greater than zero"));
        }
        super::validate_timeout(ctx, self.timeout_ms)
    }
}

pub fn decode(ctx: &DecodeContext, raw: Value) -> Result<Arc<dyn SourceConfig>, DecodeError> {
    let mut config: SplunkConfig = decode_document(ctx, raw)?;
    config.name = ctx.source_name().to_owned();
    Ok(Arc::new(config))
}

impl SourceConfig for SplunkConfig {
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
            let executor = RequestExecutor::new(self.http_client(ctx)?, self.base_url())
                .with_auth(HttpAuth::BearerToken(self.token.clone()))
                .with_timeout(self.effective_timeout())
                .with_retry(self.retry.to_config(Self::DEFAULT_MAX_RETRIES));
            let executor = super::connect(
                executor,
                "/services/server/info?output_mode=json",
                &self.name,
                KIND,
                ctx,
            )
            .await?;

            Ok(Arc::new(SplunkSource {
                poll: self.poll_config(),
                config: self,
                executor,
            }) as Arc<dyn Source>)
        })
    }
}

/// Search job state from `GET /services/search/jobs/{sid}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub is_done: bool,
    #[serde(default)]
    pub is_failed: bool,
    #[serde(default)]
    pub dispatch_state: Option<String>,
    #[serde(default)]
    pub messages: Vec<JobMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobMessage {
    #[serde(rename = "type")]
    pub level: String,
    pub text: String,
}

impl JobStatus {
    fn poll_status(self) -> PollStatus<()> {
        if self.is_failed {
            let message = self
                .messages
                .iter()
                .map(|message| message.text.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            let message = if message.is_empty() {
                format!(
                    "search job failed in state {}",
                    self.dispatch_state.as_deref().unwrap_or("UNKNOWN")
                )
            } else {
                message
            };
            PollStatus::Failed(message)
        } else if self.is_done {
            PollStatus::Complete(())
        } else {
            PollStatus::Pending
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    #[serde(default)]
    entry: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    content: JobStatus,
}

#[derive(Debug, Deserialize)]
struct CreatedJob {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct ResultsEnvelope {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

/// Verified `splunk` source.
#[derive(Debug)]
pub struct SplunkSource {
    config: Arc<SplunkConfig>,
    executor: RequestExecutor,
    poll: PollConfig,
}

impl SplunkSource {
    pub fn config(&self) -> &SplunkConfig {
        &self.config
    }

    pub fn poll_config(&self) -> PollConfig {
        self.poll
    }

    fn request_error(&self, operation: &'static str, error: RequestError) -> SourceError {
        SourceError::from_request(&self.config.name, KIND, operation, error)
    }

    /// Starts a search job and returns its sid.
    ///
    /// Queries that do not begin with a generating command get the implicit
    /// `search` prefix Splunk requires.
    pub async fn create_job(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SourceError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SourceError::invalid_request(
                &self.config.name,
                KIND,
                "create_job",
                "search query must not be empty",
            ));
        }
        let search = normalize_query(query);
        let body = RequestBody::form(&[
            ("search", search.as_str()),
            ("output_mode", "json"),
            ("exec_mode", "normal"),
        ]);

        let created: CreatedJob = self
            .executor
            .execute_json(HttpMethod::Post, "/services/search/jobs", Some(body), cancel)
            .await
            .map_err(|error| self.request_error("create_job", error))?;
        Ok(created.sid)
    }

    pub async fn job_status(
        &self,
        sid: &str,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, SourceError> {
        let path = format!(
            "/services/search/jobs/{}?output_mode=json",
            urlencoding::encode(sid)
        );
        let envelope: JobEnvelope = self
            .executor
            .execute_json(HttpMethod::Get, &path, None, cancel)
            .await
            .map_err(|error| self.request_error("job_status", error))?;

        envelope
            .entry
            .into_iter()
            .next()
            .map(|entry| entry.content)
            .ok_or_else(|| {
                SourceError::internal(
                    &self.config.name,
                    KIND,
                    "job_status",
                    format!("job {sid} returned no entry"),
                )
            })
    }

    pub async fn job_results(
        &self,
        sid: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<serde_json::Value>, SourceError> {
        let path = format!(
            "/services/search/jobs/{}/results?output_mode=json&count=0",
            urlencoding::encode(sid)
        );
        let envelope: ResultsEnvelope = self
            .executor
            .execute_json(HttpMethod::Get, &path, None, cancel)
            .await
            .map_err(|error| self.request_error("job_results", error))?;
        Ok(envelope.results)
    }

    /// Polls a job until Splunk reports it done or failed.
    pub async fn wait_for_job(
        &self,
        sid: &str,
        max_attempts: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<(), SourceError> {
        let mut poll = self.poll;
        if let Some(max_attempts) = max_attempts {
            poll.max_attempts = max_attempts;
        }

        poll_until_complete(&poll, cancel, move |attempt| async move {
            let status = self.job_status(sid, cancel).await?;
            debug!(
                source = %self.config.name,
                sid,
                attempt,
                state = status.dispatch_state.as_deref().unwrap_or("UNKNOWN"),
                "search job status"
            );
            Ok::<_, SourceError>(status.poll_status())
        })
        .await
        .map_err(|error| SourceError::from_poll(&self.config.name, KIND, "wait_for_job", error))
    }

    /// Runs a search end to end and returns its result rows.
    pub async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<serde_json::Value>, SourceError> {
        let sid = self.create_job(query, cancel).await?;
        self.wait_for_job(&sid, None, cancel).await?;
        self.job_results(&sid, cancel).await
    }
}

fn normalize_query(query: &str) -> String {
    if query.starts_with('|') || query.starts_with("search ") {
        query.to_owned()
    } else {
        format!("search {query}")
    }
}

impl Source for SplunkSource {
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
