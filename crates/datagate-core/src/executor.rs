//! Resilient request execution.
//!
//! A [`RequestExecutor`] owns the client handle of one source and performs a
//! single logical request as a bounded sequence of attempts:
//!
//! - a response below 500 is returned as-is, whatever its status;
//! - a transport failure, a timeout, or a 5xx response is retried after an
//!   exponential backoff wait, up to `max_retries` additional attempts;
//! - every wait (network or backoff) races the caller's cancellation token.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::http_client::{HttpAuth, HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::retry::{cancellable_sleep, RetryConfig, RetryState};

/// Why a single attempt did not produce a usable response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptFailure {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("server returned status {status}")]
    ServerStatus { status: u16 },
}

/// Terminal outcome of a failed logical request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request failed after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: AttemptFailure },
    #[error("request cancelled during attempt {attempts}")]
    Cancelled { attempts: u32 },
    #[error("non-retryable transport error: {0}")]
    Transport(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response body: {0}")]
    Decode(String),
    #[error("client has been released")]
    Closed,
}

impl RequestError {
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Attempt count for errors raised by the retry loop.
    pub const fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted { attempts, .. } | Self::Cancelled { attempts } => Some(*attempts),
            _ => None,
        }
    }
}

/// Request payload with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    content_type: &'static str,
    payload: String,
}

impl RequestBody {
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, RequestError> {
        let payload =
            serde_json::to_string(value).map_err(|e| RequestError::Decode(e.to_string()))?;
        Ok(Self {
            content_type: "application/json",
            payload,
        })
    }

    pub fn form(pairs: &[(&str, &str)]) -> Self {
        let payload = pairs
            .iter()
            .map(|(key, value)| {
                format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
            })
            .collect::<Vec<_>>()
            .join("&");
        Self {
            content_type: "application/x-www-form-urlencoded",
            payload,
        }
    }

    pub fn text(content_type: &'static str, payload: impl Into<String>) -> Self {
        Self {
            content_type,
            payload: payload.into(),
        }
    }

    pub const fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// Executes requests against one base URL with timeout, retry and cancellation.
pub struct RequestExecutor {
    client: Mutex<Option<Arc<dyn HttpClient>>>,
    base_url: String,
    auth: HttpAuth,
    headers: BTreeMap<String, String>,
    timeout: Duration,
    retry: RetryConfig,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RequestExecutor {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            client: Mutex::new(Some(client)),
            base_url,
            auth: HttpAuth::None,
            headers: BTreeMap::new(),
            timeout: Self::DEFAULT_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.is_empty() {
            return self.base_url.clone();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Drops the client handle. Returns `true` only for the call that released it.
    pub fn close(&self) -> bool {
        self.client
            .lock()
            .expect("executor client lock is not poisoned")
            .take()
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.client
            .lock()
            .expect("executor client lock is not poisoned")
            .is_none()
    }

    fn client(&self) -> Result<Arc<dyn HttpClient>, RequestError> {
        self.client
            .lock()
            .expect("executor client lock is not poisoned")
            .clone()
            .ok_or(RequestError::Closed)
    }

    fn build_request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&RequestBody>,
    ) -> HttpRequest {
        let mut request = HttpRequest::new(method, url)
            .with_auth(&self.auth)
            .with_timeout_ms(self.timeout.as_millis() as u64);
        for (name, value) in &self.headers {
            request = request.with_header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request
                .with_header("content-type", body.content_type())
                .with_body(body.payload());
        }
        request
    }

    /// Performs one logical request.
    ///
    /// `max_retries` overrides the configured retry count for this call only.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Exhausted`] once `max_retries + 1` attempts failed,
    ///   carrying the last failure and the attempt count
    /// - [`RequestError::Cancelled`] if `cancel` fires during any wait
    /// - [`RequestError::Transport`] for transport errors marked non-retryable
    /// - [`RequestError::Closed`] if the executor was closed
    pub async fn execute(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<RequestBody>,
        max_retries: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, RequestError> {
        let client = self.client()?;
        let url = self.url_for(path);
        let max_retries = max_retries.unwrap_or(self.retry.max_retries);
        let mut state = RetryState::new(max_retries, self.retry.backoff);

        loop {
            let attempt = state.begin_attempt();
            let request = self.build_request(method, &url, body.as_ref());
            debug!(%method, %url, attempt, max_attempts = state.max_attempts(), "sending request");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RequestError::Cancelled { attempts: attempt });
                }
                outcome = tokio::time::timeout(self.timeout, client.execute(request)) => outcome,
            };

            let failure = match outcome {
                Ok(Ok(response)) if !response.is_server_error() => return Ok(response),
                Ok(Ok(response)) => AttemptFailure::ServerStatus {
                    status: response.status,
                },
                Ok(Err(error)) if !error.retryable() => {
                    return Err(RequestError::Transport(error.message().to_owned()));
                }
                Ok(Err(error)) => AttemptFailure::Transport(error.message().to_owned()),
                Err(_elapsed) => AttemptFailure::Timeout(self.timeout),
            };

            state.record_failure(failure);
            if let Some(last) = state.take_exhausted() {
                warn!(%method, %url, attempt, error = %last, "request failed, retry budget exhausted");
                return Err(RequestError::Exhausted {
                    attempts: attempt,
                    last,
                });
            }

            let delay = state.next_delay();
            if let Some(error) = state.last_error() {
                warn!(
                    %method,
                    %url,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient request failure, will retry"
                );
            }

            if !cancellable_sleep(delay, cancel).await {
                return Err(RequestError::Cancelled { attempts: attempt });
            }
        }
    }

    /// Executes a request and decodes a 2xx JSON body.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<RequestBody>,
        cancel: &CancellationToken,
    ) -> Result<T, RequestError> {
        let response = self.execute(method, path, body, None, cancel).await?;
        decode_json(response)
    }

    /// Issues one non-mutating GET, without retries, and requires a 2xx answer.
    pub async fn probe(&self, path: &str, cancel: &CancellationToken) -> Result<(), RequestError> {
        let response = self
            .execute(HttpMethod::Get, path, None, Some(0), cancel)
            .await?;
        ensure_success(response).map(|_| ())
    }
}

/// Turns a non-2xx response into [`RequestError::Status`].
pub fn ensure_success(response: HttpResponse) -> Result<HttpResponse, RequestError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(RequestError::Status {
            status: response.status,
            body: truncate(&response.body, 256),
        })
    }
}

pub fn decode_json<T: DeserializeOwned>(response: HttpResponse) -> Result<T, RequestError> {
    let response = ensure_success(response)?;
    serde_json::from_str(&response.body).map_err(|e| RequestError::Decode(e.to_string()))
}

fn truncate(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &value[..index]),
        None => value.to_owned(),
    }
}
