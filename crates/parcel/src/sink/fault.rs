//! Fault injection for exercising the retry path.
//!
//! [`FaultInjectingSink`] wraps another sink and fails selected writes before
//! they reach it. An injected fault is an ordinary [`WriteError`]: it consumes
//! one attempt like any storage failure and never short-circuits routing.

use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::WriteError;

use super::DurableSink;

/// Decides which writes fail. `call` is 1-based and counts every write made
/// through the wrapping sink.
pub trait FaultPlan: Send + Sync {
    fn should_fail(&self, call: u64) -> bool;
}

/// Fail each write independently with probability `rate`.
#[derive(Debug)]
pub struct FailureRate {
    rate: f64,
    rng: Mutex<StdRng>,
}

impl FailureRate {
    /// `rate` is clamped to `[0.0, 1.0]`.
    pub fn new(rate: f64) -> Self {
        Self::with_rng(rate, StdRng::from_os_rng())
    }

    /// Reproducible sequence of faults for a given seed.
    pub fn seeded(rate: f64, seed: u64) -> Self {
        Self::with_rng(rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(rate: f64, rng: StdRng) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self {
            rate,
            rng: Mutex::new(rng),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl FaultPlan for FailureRate {
    fn should_fail(&self, _call: u64) -> bool {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.random_bool(self.rate)
    }
}

/// Fail the first `n` writes, then let everything through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailFirst(pub u64);

impl FaultPlan for FailFirst {
    fn should_fail(&self, call: u64) -> bool {
        call <= self.0
    }
}

/// Sink wrapper that injects write failures according to a [`FaultPlan`].
pub struct FaultInjectingSink<S> {
    inner: S,
    plan: Box<dyn FaultPlan>,
    calls: AtomicU64,
    injected: AtomicU64,
}

impl<S> FaultInjectingSink<S> {
    pub fn new(inner: S, plan: impl FaultPlan + 'static) -> Self {
        Self {
            inner,
            plan: Box::new(plan),
            calls: AtomicU64::new(0),
            injected: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Writes attempted through this wrapper, including injected failures.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }
}

impl<S> std::fmt::Debug for FaultInjectingSink<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInjectingSink")
            .field("calls", &self.calls())
            .field("injected", &self.injected())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: DurableSink> DurableSink for FaultInjectingSink<S> {
    async fn write(&self, key: &str, body: Bytes) -> Result<(), WriteError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.plan.should_fail(call) {
            self.injected.fetch_add(1, Ordering::Relaxed);
            debug!(key, call, "Injecting write fault");
            return Err(WriteError::InjectedFault { call });
        }
        self.inner.write(key, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    #[tokio::test]
    async fn test_fail_first_then_pass_through() {
        let sink = FaultInjectingSink::new(MemorySink::new(), FailFirst(2));

        assert!(sink.write("k", Bytes::from_static(b"a")).await.is_err());
        assert!(sink.write("k", Bytes::from_static(b"a")).await.is_err());
        sink.write("k", Bytes::from_static(b"a")).await.unwrap();

        assert_eq!(sink.calls(), 3);
        assert_eq!(sink.injected(), 2);
        assert_eq!(sink.inner().len().await, 1);
    }

    #[tokio::test]
    async fn test_injected_error_reports_call_number() {
        let sink = FaultInjectingSink::new(MemorySink::new(), FailFirst(1));
        let err = sink.write("k", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, WriteError::InjectedFault { call: 1 }));
        assert!(sink.inner().is_empty().await);
    }

    #[test]
    fn test_failure_rate_extremes() {
        let never = FailureRate::new(0.0);
        let always = FailureRate::new(1.0);
        for call in 1..=50 {
            assert!(!never.should_fail(call));
            assert!(always.should_fail(call));
        }
    }

    #[test]
    fn test_failure_rate_is_clamped() {
        assert_eq!(FailureRate::new(7.5).rate(), 1.0);
        assert_eq!(FailureRate::new(-1.0).rate(), 0.0);
        assert_eq!(FailureRate::new(f64::NAN).rate(), 0.0);
    }

    #[test]
    fn test_seeded_rate_is_reproducible() {
        let a = FailureRate::seeded(0.5, 42);
        let b = FailureRate::seeded(0.5, 42);
        let first: Vec<bool> = (1..=32).map(|c| a.should_fail(c)).collect();
        let second: Vec<bool> = (1..=32).map(|c| b.should_fail(c)).collect();
        assert_eq!(first, second);
    }
}
