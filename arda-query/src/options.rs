//! Per-query options: staleness window, collection window and retry policy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arda_core::{FetchError, QueryDefaultsConfig};

/// Exponential backoff: `base * 2^attempt`, capped at `max`.
///
/// `attempt` is zero-based: the first retry waits `base`.
pub fn exponential_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map(|delay| delay.min(max))
        .unwrap_or(max)
}

type RetryPredicate = Arc<dyn Fn(u32, &FetchError) -> bool + Send + Sync>;
type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Whether a failed attempt is retried.
#[derive(Clone)]
pub enum RetryPolicy {
    Never,
    /// Retry while the failure count is below this; `Count(n)` makes at most `n` attempts.
    Count(u32),
    /// Called with the failure count so far (starting at 1) and the last error.
    Predicate(RetryPredicate),
}

impl RetryPolicy {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(u32, &FetchError) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    pub fn should_retry(&self, failure_count: u32, error: &FetchError) -> bool {
        match self {
            RetryPolicy::Never => false,
            RetryPolicy::Count(max) => failure_count < *max,
            RetryPolicy::Predicate(f) => f(failure_count, error),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryPolicy::Never => f.write_str("Never"),
            RetryPolicy::Count(n) => write!(f, "Count({})", n),
            RetryPolicy::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// How long to wait before a retry.
#[derive(Clone)]
pub enum RetryDelay {
    Exponential { base: Duration, max: Duration },
    Fixed(Duration),
    Custom(DelayFn),
}

impl RetryDelay {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            RetryDelay::Exponential { base, max } => exponential_backoff(attempt, *base, *max),
            RetryDelay::Fixed(delay) => *delay,
            RetryDelay::Custom(f) => f(attempt),
        }
    }
}

impl Default for RetryDelay {
    fn default() -> Self {
        RetryDelay::Exponential {
            base: Duration::from_millis(1_000),
            max: Duration::from_millis(30_000),
        }
    }
}

impl fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryDelay::Exponential { base, max } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("max", max)
                .finish(),
            RetryDelay::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            RetryDelay::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Options recognised by `QueryRuntime::fetch`.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub retry: RetryPolicy,
    pub retry_delay: RetryDelay,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from_config(&QueryDefaultsConfig::default())
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &QueryDefaultsConfig) -> Self {
        Self {
            stale_time: config.stale_time(),
            gc_time: config.gc_time(),
            retry: RetryPolicy::Count(config.retry),
            retry_delay: RetryDelay::Exponential {
                base: config.retry_base_delay(),
                max: config.retry_max_delay(),
            },
        }
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: RetryDelay) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}
