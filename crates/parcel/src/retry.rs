//! Retry budget and backoff policy.

use rand::Rng;
use std::time::Duration;

/// Default number of write attempts per message.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Attempts consumed by one invocation, bounded by the policy maximum.
///
/// Created fresh for every message and never shared between invocations.
/// Every invocation makes at least one attempt, so the maximum is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    used: u32,
    max: u32,
}

impl RetryBudget {
    /// A budget of `max` attempts; zero is raised to one.
    pub fn new(max: u32) -> Self {
        Self {
            used: 0,
            max: max.max(1),
        }
    }

    /// Record one attempt.
    pub fn consume(&mut self) {
        self.used = self.used.saturating_add(1);
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max
    }
}

/// Exponential backoff between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Full jitter: pick uniformly in `[0, delay]`.
    pub jitter: bool,
}

impl Backoff {
    /// No delay between attempts.
    pub fn none() -> Self {
        Self {
            initial: Duration::ZERO,
            max: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay after the `failed_attempts`-th failure (1-based).
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if scaled.is_nan() || scaled <= 0.0 {
            Duration::ZERO
        } else if scaled < self.max.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.max
        };

        if self.jitter && !capped.is_zero() {
            let millis = capped.as_millis() as u64;
            Duration::from_millis(rand::rng().random_range(0..=millis))
        } else {
            capped
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// How a message's write attempts are bounded and spaced.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Write attempts per message. Zero behaves like one.
    pub max_attempts: u32,
    /// Upper bound on a single attempt; `None` waits indefinitely.
    pub attempt_timeout: Option<Duration>,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// A policy with `max_attempts` attempts and no delay or timeout.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempt_timeout: None,
            backoff: Backoff::none(),
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.max_attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: Some(Duration::from_secs(30)),
            backoff: Backoff::default(),
        }
    }
}
