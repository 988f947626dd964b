//! Internal events for per-message metrics.
//!
//! Every event carries a `target` label naming the inbound queue, so several
//! parcel instances can share one Prometheus.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

pub use parcel_core::metrics::events::InternalEvent;

// ============================================================================
// Intake events
// ============================================================================

/// Messages handed to the pipeline by one receive call.
pub struct MessagesReceived {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for MessagesReceived {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Messages received");
        counter!("parcel_messages_received_total", "target" => self.target).increment(self.count);
    }
}

/// A message acknowledged at the source after reaching a routing decision.
pub struct MessageCompleted {
    pub target: String,
}

impl InternalEvent for MessageCompleted {
    fn emit(self) {
        counter!("parcel_messages_completed_total", "target" => self.target).increment(1);
    }
}

/// Number of invocations currently running.
pub struct ActiveInvocations {
    pub count: usize,
    pub target: String,
}

impl InternalEvent for ActiveInvocations {
    fn emit(self) {
        gauge!("parcel_active_invocations", "target" => self.target).set(self.count as f64);
    }
}

// ============================================================================
// Write attempt events
// ============================================================================

/// Outcome label for a write attempt.
#[derive(Debug, Clone, Copy)]
pub enum AttemptStatus {
    Success,
    Failure,
}

impl AttemptStatus {
    fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failure => "failure",
        }
    }
}

/// One write attempt against the durable sink finished.
pub struct WriteAttemptCompleted {
    pub status: AttemptStatus,
    pub duration: Duration,
    pub target: String,
}

impl InternalEvent for WriteAttemptCompleted {
    fn emit(self) {
        trace!(
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            target = %self.target,
            "Write attempt completed"
        );
        counter!(
            "parcel_write_attempts_total",
            "status" => self.status.as_str(),
            "target" => self.target.clone()
        )
        .increment(1);
        histogram!("parcel_write_attempt_duration_seconds", "target" => self.target)
            .record(self.duration.as_secs_f64());
    }
}

/// A write attempt failed, labelled by cause (`storage`, `timeout`, ...).
pub struct WriteAttemptFailed {
    pub cause: &'static str,
    pub target: String,
}

impl InternalEvent for WriteAttemptFailed {
    fn emit(self) {
        counter!(
            "parcel_write_failures_total",
            "cause" => self.cause,
            "target" => self.target
        )
        .increment(1);
    }
}

// ============================================================================
// Routing events
// ============================================================================

/// An invocation reached its routing decision.
pub struct MessageRouted {
    /// `delivered` or `dead_lettered`.
    pub decision: &'static str,
    pub attempts: u32,
    pub target: String,
}

impl InternalEvent for MessageRouted {
    fn emit(self) {
        trace!(
            decision = self.decision,
            attempts = self.attempts,
            target = %self.target,
            "Message routed"
        );
        counter!(
            "parcel_routing_decisions_total",
            "decision" => self.decision,
            "target" => self.target.clone()
        )
        .increment(1);
        histogram!("parcel_attempts_per_message", "target" => self.target)
            .record(f64::from(self.attempts));
    }
}

/// An invocation ended without a decision, or its acknowledgement failed.
/// The message stays on the source for redelivery.
pub struct InvocationFailed {
    /// `error_channel`, `cancelled`, `ack` or `panic`.
    pub reason: &'static str,
    pub target: String,
}

impl InternalEvent for InvocationFailed {
    fn emit(self) {
        trace!(reason = self.reason, target = %self.target, "Invocation failed");
        counter!(
            "parcel_failed_invocations_total",
            "reason" => self.reason,
            "target" => self.target
        )
        .increment(1);
    }
}
