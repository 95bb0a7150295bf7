//! Reconnect/retry strategies for the coordination session.
//!
//! A [`RetryConfig`] carries a retry type tag plus one parameter set per
//! strategy, mirroring how the settings are written in configuration files.
//! Converting it into a [`RetryPolicy`] selects exactly one strategy; an
//! unknown tag fails with [`Error::UnsupportedRetryType`].

use core::{fmt, future::Future, str::FromStr, time::Duration};

use rand::Rng;
use tokio::time::Instant;

use crate::{CoordinationError, Error, Result};

/// Upper bound on `max_retries` for the exponential strategies.
pub const MAX_RETRIES_LIMIT: u32 = 29;

/// The five supported retry strategies, by configuration tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RetryType {
    ExponentialBackoff,
    BoundedExponentialBackoff,
    NTimes,
    Forever,
    UntilElapsed,
}

impl RetryType {
    pub const ALL: [Self; 5] = [
        Self::ExponentialBackoff,
        Self::BoundedExponentialBackoff,
        Self::NTimes,
        Self::Forever,
        Self::UntilElapsed,
    ];

    /// The tag used in configuration.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ExponentialBackoff => "exponentialBackoffRetry",
            Self::BoundedExponentialBackoff => "boundedExponentialBackoffRetry",
            Self::NTimes => "retryNTimes",
            Self::Forever => "retryForever",
            Self::UntilElapsed => "retryUntilElapsed",
        }
    }
}

impl FromStr for RetryType {
    type Err = Error;

    /// Matches tags case-insensitively, ignoring surrounding whitespace.
    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(tag))
            .ok_or_else(|| Error::UnsupportedRetryType(s.to_string()))
    }
}

impl fmt::Display for RetryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, rename_all = "camelCase")
)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExponentialBackoffRetryConfig {
    pub base_sleep_time_ms: u64,
    pub max_retries: u32,
}

impl Default for ExponentialBackoffRetryConfig {
    fn default() -> Self {
        Self {
            base_sleep_time_ms: 2000,
            max_retries: 10,
        }
    }
}

#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, rename_all = "camelCase")
)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundedExponentialBackoffRetryConfig {
    pub base_sleep_time_ms: u64,
    pub max_sleep_time_ms: u64,
    pub max_retries: u32,
}

impl Default for BoundedExponentialBackoffRetryConfig {
    fn default() -> Self {
        Self {
            base_sleep_time_ms: 2000,
            max_sleep_time_ms: 60_000,
            max_retries: 10,
        }
    }
}

#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, rename_all = "camelCase")
)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryNTimesConfig {
    pub count: u32,
    pub sleep_ms_between_retries: u64,
}

impl Default for RetryNTimesConfig {
    fn default() -> Self {
        Self {
            count: 10,
            sleep_ms_between_retries: 2000,
        }
    }
}

#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, rename_all = "camelCase")
)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryForeverConfig {
    pub retry_interval_ms: u64,
}

impl Default for RetryForeverConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 2000,
        }
    }
}

#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, rename_all = "camelCase")
)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryUntilElapsedConfig {
    pub max_elapsed_time_ms: u64,
    pub sleep_ms_between_retries: u64,
}

impl Default for RetryUntilElapsedConfig {
    fn default() -> Self {
        Self {
            max_elapsed_time_ms: 60_000,
            sleep_ms_between_retries: 2000,
        }
    }
}

/// Retry settings as written in configuration: a tag plus every parameter
/// set. Only the set named by `retry_type` is used.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, rename_all = "camelCase")
)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub retry_type: String,
    pub exponential_backoff_retry: ExponentialBackoffRetryConfig,
    pub bounded_exponential_backoff_retry: BoundedExponentialBackoffRetryConfig,
    pub retry_n_times: RetryNTimesConfig,
    pub retry_forever: RetryForeverConfig,
    pub retry_until_elapsed: RetryUntilElapsedConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_type: RetryType::ExponentialBackoff.as_str().to_string(),
            exponential_backoff_retry: ExponentialBackoffRetryConfig::default(),
            bounded_exponential_backoff_retry: BoundedExponentialBackoffRetryConfig::default(),
            retry_n_times: RetryNTimesConfig::default(),
            retry_forever: RetryForeverConfig::default(),
            retry_until_elapsed: RetryUntilElapsedConfig::default(),
        }
    }
}

/// One selected retry strategy. Immutable once built.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retries up to `max_retries` times (capped at 29), sleeping
    /// `base_sleep * random[1, 2^(n+1))` before retry `n`.
    ExponentialBackoff {
        base_sleep: Duration,
        max_retries: u32,
    },
    /// Like [`RetryPolicy::ExponentialBackoff`], but no single sleep exceeds
    /// `max_sleep`.
    BoundedExponentialBackoff {
        base_sleep: Duration,
        max_sleep: Duration,
        max_retries: u32,
    },
    /// Retries `count` times with a fixed sleep.
    NTimes { count: u32, sleep_between: Duration },
    /// Retries indefinitely with a fixed sleep.
    Forever { interval: Duration },
    /// Retries with a fixed sleep until `max_elapsed` has passed since the
    /// first attempt.
    UntilElapsed {
        max_elapsed: Duration,
        sleep_between: Duration,
    },
}

impl RetryPolicy {
    /// The strategy's configuration tag.
    pub const fn retry_type(&self) -> RetryType {
        match self {
            Self::ExponentialBackoff { .. } => RetryType::ExponentialBackoff,
            Self::BoundedExponentialBackoff { .. } => RetryType::BoundedExponentialBackoff,
            Self::NTimes { .. } => RetryType::NTimes,
            Self::Forever { .. } => RetryType::Forever,
            Self::UntilElapsed { .. } => RetryType::UntilElapsed,
        }
    }

    /// Decides whether retry number `retry_count` (zero-based) may run after
    /// `elapsed` time since the first attempt.
    ///
    /// Returns the sleep to observe before retrying, or `None` to give up.
    pub fn allow_retry(&self, retry_count: u32, elapsed: Duration) -> Option<Duration> {
        match *self {
            Self::ExponentialBackoff {
                base_sleep,
                max_retries,
            } => (retry_count < max_retries.min(MAX_RETRIES_LIMIT))
                .then(|| backoff_sleep(base_sleep, retry_count)),
            Self::BoundedExponentialBackoff {
                base_sleep,
                max_sleep,
                max_retries,
            } => (retry_count < max_retries.min(MAX_RETRIES_LIMIT))
                .then(|| backoff_sleep(base_sleep, retry_count).min(max_sleep)),
            Self::NTimes {
                count,
                sleep_between,
            } => (retry_count < count).then_some(sleep_between),
            Self::Forever { interval } => Some(interval),
            Self::UntilElapsed {
                max_elapsed,
                sleep_between,
            } => (elapsed < max_elapsed).then_some(sleep_between),
        }
    }
}

fn backoff_sleep(base_sleep: Duration, retry_count: u32) -> Duration {
    let exponent = retry_count.min(MAX_RETRIES_LIMIT) + 1;
    let factor = rand::rng().random_range(0..(1u32 << exponent)).max(1);
    base_sleep.saturating_mul(factor)
}

impl TryFrom<&RetryConfig> for RetryPolicy {
    type Error = Error;

    /// Selects the strategy named by `retry_type`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedRetryType`] if the tag names none of the
    /// five strategies.
    fn try_from(config: &RetryConfig) -> Result<Self> {
        let policy = match config.retry_type.parse::<RetryType>()? {
            RetryType::ExponentialBackoff => {
                let c = &config.exponential_backoff_retry;
                Self::ExponentialBackoff {
                    base_sleep: Duration::from_millis(c.base_sleep_time_ms),
                    max_retries: c.max_retries,
                }
            }
            RetryType::BoundedExponentialBackoff => {
                let c = &config.bounded_exponential_backoff_retry;
                Self::BoundedExponentialBackoff {
                    base_sleep: Duration::from_millis(c.base_sleep_time_ms),
                    max_sleep: Duration::from_millis(c.max_sleep_time_ms),
                    max_retries: c.max_retries,
                }
            }
            RetryType::NTimes => {
                let c = &config.retry_n_times;
                Self::NTimes {
                    count: c.count,
                    sleep_between: Duration::from_millis(c.sleep_ms_between_retries),
                }
            }
            RetryType::Forever => Self::Forever {
                interval: Duration::from_millis(config.retry_forever.retry_interval_ms),
            },
            RetryType::UntilElapsed => {
                let c = &config.retry_until_elapsed;
                Self::UntilElapsed {
                    max_elapsed: Duration::from_millis(c.max_elapsed_time_ms),
                    sleep_between: Duration::from_millis(c.sleep_ms_between_retries),
                }
            }
        };

        #[cfg(feature = "tracing")]
        {
            if let Self::ExponentialBackoff { max_retries, .. }
            | Self::BoundedExponentialBackoff { max_retries, .. } = policy
            {
                if max_retries > MAX_RETRIES_LIMIT {
                    tracing::warn!(max_retries, limit = MAX_RETRIES_LIMIT, "capping max_retries");
                }
            }
        }

        Ok(policy)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy gives up. The last error is returned when retries run out.
///
/// `guard` is consulted before every retry, both before and after the
/// sleep; its error ends the loop at once.
pub(crate) async fn retry_loop<T, G, F, Fut>(policy: &RetryPolicy, guard: G, mut op: F) -> Result<T>
where
    G: Fn() -> Result<()>,
    F: FnMut() -> Fut,
    Fut: Future<Output = core::result::Result<T, CoordinationError>>,
{
    let start = Instant::now();
    let mut retry_count = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                guard()?;
                let Some(sleep) = policy.allow_retry(retry_count, start.elapsed()) else {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(retry_count, error = %e, "retries exhausted");
                    return Err(e.into());
                };
                #[cfg(feature = "tracing")]
                tracing::debug!(retry_count, ?sleep, error = %e, "retrying coordination operation");
                tokio::time::sleep(sleep).await;
                guard()?;
                retry_count += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn config(tag: &str) -> RetryConfig {
        RetryConfig {
            retry_type: tag.to_string(),
            ..RetryConfig::default()
        }
    }

    #[test]
    fn parses_every_tag_case_insensitively() {
        for t in RetryType::ALL {
            assert_eq!(t.as_str().parse::<RetryType>().unwrap(), t);
            assert_eq!(
                format!("  {}  ", t.as_str().to_uppercase())
                    .parse::<RetryType>()
                    .unwrap(),
                t
            );
        }
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        assert_eq!(
            RetryPolicy::try_from(&config("unknownType")),
            Err(Error::UnsupportedRetryType("unknownType".to_string()))
        );
        assert!(matches!(
            RetryPolicy::try_from(&config("")),
            Err(Error::UnsupportedRetryType(_))
        ));
    }

    #[test]
    fn selects_the_tagged_parameter_set() {
        let mut cfg = config("retryNTimes");
        cfg.retry_n_times = RetryNTimesConfig {
            count: 3,
            sleep_ms_between_retries: 25,
        };
        assert_eq!(
            RetryPolicy::try_from(&cfg).unwrap(),
            RetryPolicy::NTimes {
                count: 3,
                sleep_between: 25 * MS
            }
        );

        let policy = RetryPolicy::try_from(&config("retryUntilElapsed")).unwrap();
        assert_eq!(policy.retry_type(), RetryType::UntilElapsed);
        assert_eq!(
            policy,
            RetryPolicy::UntilElapsed {
                max_elapsed: 60_000 * MS,
                sleep_between: 2000 * MS
            }
        );

        let policy = RetryPolicy::try_from(&RetryConfig::default()).unwrap();
        assert_eq!(
            policy,
            RetryPolicy::ExponentialBackoff {
                base_sleep: 2000 * MS,
                max_retries: 10
            }
        );
    }

    #[test]
    fn exponential_backoff_sleeps_grow_within_bounds() {
        let policy = RetryPolicy::ExponentialBackoff {
            base_sleep: 10 * MS,
            max_retries: 5,
        };
        for n in 0..5 {
            let sleep = policy.allow_retry(n, Duration::ZERO).unwrap();
            assert!(sleep >= 10 * MS);
            assert!(sleep < 10 * MS * (1 << (n + 1)));
        }
        assert_eq!(policy.allow_retry(5, Duration::ZERO), None);
    }

    #[test]
    fn exponential_backoff_caps_retry_count() {
        let policy = RetryPolicy::ExponentialBackoff {
            base_sleep: MS,
            max_retries: 100,
        };
        assert!(policy.allow_retry(28, Duration::ZERO).is_some());
        assert_eq!(policy.allow_retry(29, Duration::ZERO), None);
    }

    #[test]
    fn bounded_backoff_never_exceeds_max_sleep() {
        let policy = RetryPolicy::BoundedExponentialBackoff {
            base_sleep: 100 * MS,
            max_sleep: 250 * MS,
            max_retries: 10,
        };
        for n in 0..10 {
            assert!(policy.allow_retry(n, Duration::ZERO).unwrap() <= 250 * MS);
        }
        assert_eq!(policy.allow_retry(10, Duration::ZERO), None);
    }

    #[test]
    fn fixed_interval_policies() {
        let n_times = RetryPolicy::NTimes {
            count: 2,
            sleep_between: 7 * MS,
        };
        assert_eq!(n_times.allow_retry(0, Duration::ZERO), Some(7 * MS));
        assert_eq!(n_times.allow_retry(1, Duration::ZERO), Some(7 * MS));
        assert_eq!(n_times.allow_retry(2, Duration::ZERO), None);

        let forever = RetryPolicy::Forever { interval: 3 * MS };
        assert_eq!(forever.allow_retry(u32::MAX, Duration::MAX), Some(3 * MS));

        let until = RetryPolicy::UntilElapsed {
            max_elapsed: 100 * MS,
            sleep_between: 10 * MS,
        };
        assert_eq!(until.allow_retry(50, 99 * MS), Some(10 * MS));
        assert_eq!(until.allow_retry(0, 100 * MS), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_loop_retries_transient_errors() {
        let policy = RetryPolicy::NTimes {
            count: 3,
            sleep_between: 100 * MS,
        };
        let mut attempts = 0;
        let value = retry_loop(&policy, || Ok(()), || {
            attempts += 1;
            let attempt = attempts;
            async move {
                if attempt < 3 {
                    Err(CoordinationError::ConnectionLoss)
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_loop_gives_up_per_policy() {
        let policy = RetryPolicy::NTimes {
            count: 2,
            sleep_between: 100 * MS,
        };
        let mut attempts = 0;
        let err = retry_loop(&policy, || Ok(()), || {
            attempts += 1;
            async { Err::<(), _>(CoordinationError::ConnectionLoss) }
        })
        .await
        .unwrap_err();
        assert_eq!(err, Error::Coordination(CoordinationError::ConnectionLoss));
        // one initial attempt plus two retries
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_loop_does_not_retry_permanent_errors() {
        let policy = RetryPolicy::Forever { interval: MS };
        let mut attempts = 0;
        let err = retry_loop(&policy, || Ok(()), || {
            attempts += 1;
            async { Err::<(), _>(CoordinationError::NoNode("/a".to_string())) }
        })
        .await
        .unwrap_err();
        assert_eq!(err, Error::Coordination(CoordinationError::NoNode("/a".to_string())));
        assert_eq!(attempts, 1);
    }

    fn closed_error() -> Error {
        Error::InvalidState {
            state: crate::SessionState::Closed,
            op: "read node",
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_loop_stops_when_guard_fails() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let policy = RetryPolicy::Forever { interval: 100 * MS };
        let closed = AtomicBool::new(false);
        let mut attempts = 0;
        let err = retry_loop(
            &policy,
            || {
                if closed.load(Ordering::SeqCst) {
                    Err(closed_error())
                } else {
                    Ok(())
                }
            },
            || {
                attempts += 1;
                if attempts == 3 {
                    closed.store(true, Ordering::SeqCst);
                }
                async { Err::<(), _>(CoordinationError::ConnectionLoss) }
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err, closed_error());
        assert_eq!(attempts, 3);
    }
}
