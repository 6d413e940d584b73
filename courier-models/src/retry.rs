use std::{fmt, time::Duration};

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer};

use crate::errors::RuntimeError;

pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MAX_RETRIES: u32 = 100;

/// Upper bound on redeliveries after the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "MaxRetriesRepr")]
pub enum MaxRetries {
    Limited(u32),
    Unlimited,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MaxRetriesRepr {
    Count(u32),
    Keyword(String),
}

impl TryFrom<MaxRetriesRepr> for MaxRetries {
    type Error = String;

    fn try_from(value: MaxRetriesRepr) -> Result<Self, Self::Error> {
        match value {
            MaxRetriesRepr::Count(count) => Ok(MaxRetries::Limited(count)),
            MaxRetriesRepr::Keyword(keyword) if keyword.eq_ignore_ascii_case("unlimited") => {
                Ok(MaxRetries::Unlimited)
            }
            MaxRetriesRepr::Keyword(other) => Err(format!(
                "max_retries must be a non-negative integer or \"unlimited\", got \"{other}\""
            )),
        }
    }
}

impl fmt::Display for MaxRetries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxRetries::Limited(count) => write!(f, "{count}"),
            MaxRetries::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Retry policy as declared by a subscription or in runtime configuration.
///
/// Unset or zero backoff bounds fall back to the defaults (10s and 10min), and an
/// unset `max_retries` falls back to 100. Use [`RetryPolicy::resolve`] to obtain the
/// validated [`BackoffPolicy`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_retries: Option<MaxRetries>,
    #[serde(default, rename = "min_backoff_ms", deserialize_with = "deserialize_millis")]
    pub min_backoff: Option<TimeDelta>,
    #[serde(default, rename = "max_backoff_ms", deserialize_with = "deserialize_millis")]
    pub max_backoff: Option<TimeDelta>,
}

impl RetryPolicy {
    pub fn resolve(&self) -> Result<BackoffPolicy, RuntimeError> {
        let min_backoff = backoff_bound("min_backoff", self.min_backoff, DEFAULT_MIN_BACKOFF)?;
        let max_backoff = backoff_bound("max_backoff", self.max_backoff, DEFAULT_MAX_BACKOFF)?;
        let max_retries = self
            .max_retries
            .unwrap_or(MaxRetries::Limited(DEFAULT_MAX_RETRIES));

        BackoffPolicy::new(max_retries, min_backoff, max_backoff)
    }
}

fn backoff_bound(
    name: &str,
    value: Option<TimeDelta>,
    default: Duration,
) -> Result<Duration, RuntimeError> {
    match value {
        None => Ok(default),
        Some(value) if value < TimeDelta::zero() => Err(RuntimeError::invalid_argument(
            format!("{name} cannot be negative"),
        )),
        Some(value) if value.is_zero() => Ok(default),
        Some(value) => value
            .to_std()
            .map_err(|err| RuntimeError::invalid_argument(format!("{name}: {err}"))),
    }
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Option<TimeDelta>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<i64>::deserialize(deserializer)? {
        Some(ms) => TimeDelta::try_milliseconds(ms)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("backoff of {ms}ms is out of range"))),
        None => Ok(None),
    }
}

/// Validated retry bounds consumed by backends when a delivery fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    max_retries: MaxRetries,
    min_backoff: Duration,
    max_backoff: Duration,
}

impl BackoffPolicy {
    pub fn new(
        max_retries: MaxRetries,
        min_backoff: Duration,
        max_backoff: Duration,
    ) -> Result<Self, RuntimeError> {
        if max_backoff < min_backoff {
            return Err(RuntimeError::invalid_argument(format!(
                "max_backoff ({max_backoff:?}) cannot be less than min_backoff ({min_backoff:?})"
            )));
        }

        Ok(Self {
            max_retries,
            min_backoff,
            max_backoff,
        })
    }

    pub fn max_retries(&self) -> MaxRetries {
        self.max_retries
    }

    pub fn min_backoff(&self) -> Duration {
        self.min_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Delay to wait after `attempt` failed, before the next attempt is made.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.min_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .clamp(self.min_backoff, self.max_backoff)
    }

    /// Whether a failed `attempt` has used up the retry budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        match self.max_retries {
            MaxRetries::Limited(max) => attempt > max,
            MaxRetries::Unlimited => false,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: MaxRetries::Limited(DEFAULT_MAX_RETRIES),
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}
