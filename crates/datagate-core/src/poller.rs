//! Long-poll state machine for asynchronous remote jobs.
//!
//! ```text
//!            fetch                          complete
//!  Pending ─────────▶ Pending ─ ─ ─ ─ ─ ─ ─▶ Complete
//!     │  ▲   wait       │  remote error
//!     │  └──────────────┤─────────────────▶ Failed
//!     │                 │  max_attempts
//!     │                 └─────────────────▶ Exhausted
//!     └─ cancel during fetch or wait ─────▶ Cancelled
//! ```
//!
//! Poll waits are independent of the executor's retry backoff: a fetch that
//! errors is propagated immediately and never retried here.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::retry::{cancellable_sleep, Backoff};

/// Poll budget and wait schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_attempts: 10,
        }
    }
}

impl PollConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    fn backoff(&self) -> Backoff {
        Backoff::exponential(self.base_delay, self.max_delay.max(self.base_delay))
    }

    /// Wait inserted after the given 1-based pending fetch.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff().delay(attempt.saturating_sub(1))
    }
}

/// Poll tunables as they appear in a source document.
///
/// ```yaml
/// poll:
///   max_attempts: 10      # default differs per backend
///   base_delay_ms: 500    # default 500
///   max_delay_ms: 8000    # default 8000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

impl PollSettings {
    pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
    pub const DEFAULT_MAX_DELAY_MS: u64 = 8_000;

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn to_config(&self, default_max_attempts: u32) -> PollConfig {
        PollConfig {
            base_delay: Duration::from_millis(
                self.base_delay_ms.unwrap_or(Self::DEFAULT_BASE_DELAY_MS),
            ),
            max_delay: Duration::from_millis(
                self.max_delay_ms.unwrap_or(Self::DEFAULT_MAX_DELAY_MS),
            ),
            max_attempts: self.max_attempts.unwrap_or(default_max_attempts),
        }
    }
}

/// What one status fetch observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Pending,
    Complete(T),
    /// The remote side reported the job as failed.
    Failed(String),
}

/// Poll sequence phases; every phase except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollPhase {
    Pending,
    Complete,
    Failed,
    Exhausted,
    Cancelled,
}

/// Terminal failure of a poll sequence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PollError<E> {
    #[error("status fetch failed: {0}")]
    Fetch(E),
    #[error("remote job failed: {message}")]
    Failed { message: String },
    #[error("job still pending after {attempts} poll attempt(s)")]
    Exhausted { attempts: u32 },
    #[error("polling cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl<E> PollError<E> {
    pub const fn phase(&self) -> PollPhase {
        match self {
            // A fetch error ends the sequence before the job reached any verdict.
            Self::Fetch(_) => PollPhase::Pending,
            Self::Failed { .. } => PollPhase::Failed,
            Self::Exhausted { .. } => PollPhase::Exhausted,
            Self::Cancelled { .. } => PollPhase::Cancelled,
        }
    }
}

/// Repeats `fetch` until the job completes, fails, the budget runs out, or
/// `cancel` fires.
///
/// `fetch` receives the 1-based attempt number. No wait follows the final
/// pending fetch: the sequence ends as `Exhausted` right away.
pub async fn poll_until_complete<T, E, F, Fut>(
    config: &PollConfig,
    cancel: &CancellationToken,
    mut fetch: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, E>>,
{
    let mut attempt = 0;

    while attempt < config.max_attempts {
        attempt += 1;

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled { attempts: attempt }),
            status = fetch(attempt) => status.map_err(PollError::Fetch)?,
        };

        match status {
            PollStatus::Complete(payload) => {
                debug!(attempt, "poll sequence complete");
                return Ok(payload);
            }
            PollStatus::Failed(message) => return Err(PollError::Failed { message }),
            PollStatus::Pending if attempt == config.max_attempts => break,
            PollStatus::Pending => {}
        }

        let delay = config.delay_after(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "job pending, waiting");
        if !cancellable_sleep(delay, cancel).await {
            return Err(PollError::Cancelled { attempts: attempt });
        }
    }

    Err(PollError::Exhausted { attempts: attempt })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn config(max_attempts: u32) -> PollConfig {
        PollConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            max_attempts,
        }
    }

    #[test]
    fn delays_double_until_cap() {
        let config = config(10);

        assert_eq!(config.delay_after(1), Duration::from_millis(100));
        assert_eq!(config.delay_after(2), Duration::from_millis(200));
        assert_eq!(config.delay_after(3), Duration::from_millis(400));
        assert_eq!(config.delay_after(4), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn complete_on_first_fetch_takes_one_fetch() {
        let calls = AtomicU32::new(0);

        let payload = poll_until_complete(&config(5), &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(PollStatus::Complete("rows")) }
        })
        .await
        .expect("completes");

        assert_eq!(payload, "rows");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_stops_immediately() {
        let calls = AtomicU32::new(0);

        let error = poll_until_complete(&config(5), &CancellationToken::new(), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 2 {
                    Ok::<PollStatus<()>, String>(PollStatus::Failed(String::from("quota")))
                } else {
                    Ok(PollStatus::Pending)
                }
            }
        })
        .await
        .expect_err("remote failure");

        assert_eq!(error.phase(), PollPhase::Failed);
        assert_eq!(
            error,
            PollError::Failed {
                message: String::from("quota")
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_error_propagates_without_retry() {
        let calls = AtomicU32::new(0);

        let error = poll_until_complete(&config(5), &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<PollStatus<()>, _>("boom") }
        })
        .await
        .expect_err("fetch error");

        assert_eq!(error, PollError::Fetch("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_names_attempt_count_and_skips_trailing_wait() {
        let started = tokio::time::Instant::now();

        let error = poll_until_complete(&config(3), &CancellationToken::new(), |_| async {
            Ok::<PollStatus<()>, String>(PollStatus::Pending)
        })
        .await
        .expect_err("never completes");

        assert_eq!(error, PollError::Exhausted { attempts: 3 });
        assert_eq!(error.phase(), PollPhase::Exhausted);
        // 100ms after the first fetch, 200ms after the second, none after the third.
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempt_budget_is_exhausted_without_fetching() {
        let error = poll_until_complete(&config(0), &CancellationToken::new(), |_| async {
            Ok::<PollStatus<()>, String>(PollStatus::Complete(()))
        })
        .await
        .expect_err("no budget");

        assert_eq!(error, PollError::Exhausted { attempts: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_wait_is_not_exhaustion() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let error = poll_until_complete(&config(50), &cancel, move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            if attempt == 2 {
                trigger.cancel();
            }
            async { Ok::<PollStatus<()>, String>(PollStatus::Pending) }
        })
        .await
        .expect_err("cancelled");

        assert_eq!(error, PollError::Cancelled { attempts: 2 });
        assert_eq!(error.phase(), PollPhase::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn settings_resolve_defaults() {
        let config = PollSettings {
            max_attempts: Some(4),
            ..PollSettings::default()
        }
        .to_config(10);

        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.base_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(8));
    }
}
