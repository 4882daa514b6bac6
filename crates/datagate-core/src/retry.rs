//! Retry logic with capped exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Doubles the delay after every attempt, starting at `base`.
    ///
    /// The delay is calculated as `base * 2^attempt`, capped at `max`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(500), Duration::from_secs(10))
    }
}

impl Backoff {
    /// Exponential backoff without jitter.
    pub const fn exponential(base: Duration, max: Duration) -> Self {
        Self::Exponential {
            base,
            max,
            jitter: false,
        }
    }

    /// Calculate the delay for a given retry attempt.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The retry attempt number (0-based)
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential { base, max, jitter } => {
                let scale = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                let delay = base.saturating_mul(scale).min(max);

                if jitter {
                    apply_jitter(delay, max)
                } else {
                    delay
                }
            }
        }
    }
}

// +/- 50% of the delay, never above the configured ceiling.
fn apply_jitter(delay: Duration, max: Duration) -> Duration {
    let delay_ms = delay.as_millis() as u64;
    let jitter_ms = delay_ms / 2;
    let offset = fastrand::u64(0..=jitter_ms.saturating_mul(2));
    let total_ms = delay_ms.saturating_sub(jitter_ms).saturating_add(offset);
    Duration::from_millis(total_ms).min(max)
}

/// Configuration for the resilient request executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// The maximum number of retries to attempt.
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// The backoff strategy to use between retries.
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with exponential backoff.
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Create a new retry configuration with fixed backoff.
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
        }
    }

    /// Disable retries: exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate the delay for a given retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// Retry tunables as they appear in a source document.
///
/// ```yaml
/// retry:
///   max_retries: 3        # default differs per backend
///   base_delay_ms: 500    # default 500
///   max_delay_ms: 10000   # default 10000
///   jitter: false         # default false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<bool>,
}

impl RetrySettings {
    pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
    pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Resolve unset fields against documented defaults.
    pub fn to_config(&self, default_max_retries: u32) -> RetryConfig {
        let base = self.base_delay_ms.unwrap_or(Self::DEFAULT_BASE_DELAY_MS);
        let max = self
            .max_delay_ms
            .unwrap_or(Self::DEFAULT_MAX_DELAY_MS)
            .max(base);

        RetryConfig {
            max_retries: self.max_retries.unwrap_or(default_max_retries),
            backoff: Backoff::Exponential {
                base: Duration::from_millis(base),
                max: Duration::from_millis(max),
                jitter: self.jitter.unwrap_or(false),
            },
        }
    }
}

/// Attempt bookkeeping for one logical retry sequence.
///
/// Attempts are 1-based; `attempts()` never exceeds `max_attempts()`.
#[derive(Debug)]
pub struct RetryState<E> {
    attempts: u32,
    max_attempts: u32,
    backoff: Backoff,
    last_error: Option<E>,
}

impl<E> RetryState<E> {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            attempts: 0,
            max_attempts: max_retries.saturating_add(1),
            backoff,
            last_error: None,
        }
    }

    /// Marks the start of a new attempt and returns its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        debug_assert!(self.attempts < self.max_attempts, "attempt ceiling exceeded");
        self.attempts += 1;
        self.attempts
    }

    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub const fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Delay to wait after the current (failed) attempt.
    pub fn next_delay(&self) -> Duration {
        self.backoff.delay(self.attempts.saturating_sub(1))
    }

    pub fn record_failure(&mut self, error: E) {
        self.last_error = Some(error);
    }

    pub fn last_error(&self) -> Option<&E> {
        self.last_error.as_ref()
    }

    /// Hands back the last recorded failure once no attempts remain.
    pub fn take_exhausted(&mut self) -> Option<E> {
        if self.can_retry() {
            None
        } else {
            self.last_error.take()
        }
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
///
/// Returns `false` when the wait was cut short by cancellation. A token that
/// is already cancelled wins over a zero-length sleep.
pub async fn cancellable_sleep(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(10), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff_doubles_then_caps() {
        let backoff = Backoff::exponential(Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_secs(1)); // capped
        assert_eq!(backoff.delay(5), Duration::from_secs(1));
        assert_eq!(backoff.delay(63), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_backoff_is_monotonic() {
        let backoff = Backoff::exponential(Duration::from_millis(250), Duration::from_secs(5));

        let delays: Vec<_> = (0..12).map(|attempt| backoff.delay(attempt)).collect();
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "backoff shrank: {pair:?}");
            if pair[1] < Duration::from_secs(5) {
                assert_eq!(pair[1], pair[0] * 2);
            }
        }
    }

    #[test]
    fn test_exponential_backoff_with_jitter() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
            jitter: true,
        };

        // Run multiple times to account for randomness
        for _ in 0..10 {
            for attempt in 0..5 {
                let delay = backoff.delay(attempt);
                let expected_base = 100.0 * 2_f64.powi(attempt as i32);
                let expected_capped = expected_base.min(1000.0);
                let delay_ms = delay.as_millis() as f64;

                assert!(delay_ms >= expected_capped * 0.49, "attempt={attempt}, delay_ms={delay_ms}");
                assert!(delay_ms <= 1000.0, "jitter must respect the cap: {delay_ms}");
            }
        }
    }

    #[test]
    fn test_default_retry_config() {
        let config = RetryConfig::default();

        assert_eq!(config.max_retries, 3);
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_config_fixed() {
        let config = RetryConfig::fixed(Duration::from_millis(500), 2);

        assert_eq!(config.max_retries, 2);
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(500));
    }

    #[test]
    fn test_retry_config_no_retry() {
        assert_eq!(RetryConfig::no_retry().max_retries, 0);
    }

    #[test]
    fn settings_resolve_defaults() {
        let config = RetrySettings::default().to_config(4);

        assert_eq!(config.max_retries, 4);
        assert_eq!(
            config.backoff,
            Backoff::exponential(Duration::from_millis(500), Duration::from_secs(10))
        );
    }

    #[test]
    fn settings_never_cap_below_base() {
        let settings = RetrySettings {
            base_delay_ms: Some(2_000),
            max_delay_ms: Some(100),
            ..RetrySettings::default()
        };

        assert_eq!(
            settings.to_config(1).delay_for_attempt(3),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn retry_state_counts_attempts_up_to_ceiling() {
        let mut state: RetryState<&str> = RetryState::new(2, Backoff::default());

        assert_eq!(state.max_attempts(), 3);
        assert_eq!(state.begin_attempt(), 1);
        assert_eq!(state.next_delay(), Duration::from_millis(500));
        state.record_failure("first");
        assert_eq!(state.begin_attempt(), 2);
        assert_eq!(state.next_delay(), Duration::from_secs(1));
        assert_eq!(state.take_exhausted(), None);
        assert_eq!(state.begin_attempt(), 3);
        state.record_failure("third");
        assert!(!state.can_retry());
        assert_eq!(state.last_error(), Some(&"third"));
        assert_eq!(state.take_exhausted(), Some("third"));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_sleep() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(!cancellable_sleep(Duration::from_secs(3600), &cancel).await);
    }

    #[tokio::test(start_paused = true)]
    async fn uncancelled_sleep_completes() {
        let cancel = CancellationToken::new();

        assert!(cancellable_sleep(Duration::from_millis(10), &cancel).await);
    }
}
