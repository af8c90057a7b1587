//! Retry policy and backoff delays for uploads.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// A `Retry-After` hint is honored up to this many times `max_delay`.
pub const RETRY_AFTER_FACTOR: u32 = 4;

/// How often and how patiently a single upload is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap on the exponential part of the delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Uncapped-by-jitter delay before retry `n` (1-based): `base * 2^(n-1)`,
    /// capped at `max_delay`.
    pub fn exponential(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Longest server-requested wait that is honored as given.
    pub fn max_retry_after(&self) -> Duration {
        self.max_delay.saturating_mul(RETRY_AFTER_FACTOR)
    }
}

/// Delay sequence for one upload.
///
/// Uses equal jitter (half fixed, half random) and never returns a delay
/// shorter than the previous one or than a server-provided `Retry-After`.
/// The hint itself is clamped to [`RetryPolicy::max_retry_after`].
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    rng: StdRng,
    retries: u32,
    previous: Duration,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    /// Deterministic jitter, for tests.
    pub fn with_seed(policy: RetryPolicy, seed: u64) -> Self {
        Self::with_rng(policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(policy: RetryPolicy, rng: StdRng) -> Self {
        Self {
            policy,
            rng,
            retries: 0,
            previous: Duration::ZERO,
        }
    }

    /// Number of delays handed out so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn next_delay(&mut self, retry_after: Option<Duration>) -> Duration {
        self.retries += 1;
        let exponential = self.policy.exponential(self.retries);
        let half = exponential / 2;
        let spread = u64::try_from(half.as_nanos()).unwrap_or(u64::MAX);
        let jitter = Duration::from_nanos(self.rng.gen_range(0..=spread));

        let mut delay = half + jitter;
        if let Some(retry_after) = retry_after {
            delay = delay.max(retry_after.min(self.policy.max_retry_after()));
        }
        delay = delay.max(self.previous);
        self.previous = delay;
        delay
    }
}
