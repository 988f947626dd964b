//! Internal events for metrics emission.
//!
//! An event is a plain struct describing something that happened; emitting it
//! records the matching Prometheus series. The `parcel` crate defines its
//! per-message events against the same trait.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Something measurable that happened inside the process.
pub trait InternalEvent {
    fn emit(self);
}

// ============================================================================
// Storage
// ============================================================================

/// Object store call kinds tracked by [`StorageRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOperation {
    Get,
    Put,
    Delete,
    List,
}

impl StorageOperation {
    pub fn label(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }
}

/// Whether a storage call returned `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(_) => Self::Error,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// A single object store call finished.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        let operation = self.operation.label();
        let status = self.status.label();
        trace!(
            operation,
            status,
            elapsed_ms = self.duration.as_millis(),
            "storage request"
        );
        counter!(
            "parcel_storage_requests_total",
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        histogram!("parcel_storage_request_duration_seconds", "operation" => operation)
            .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Polling
// ============================================================================

/// What a polling iteration found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationResultType {
    Processed,
    NoItems,
}

impl IterationResultType {
    fn label(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::NoItems => "no_items",
        }
    }
}

/// One prepare + process round of the polling loop finished.
pub struct IterationCompleted {
    pub result: IterationResultType,
    pub duration: Duration,
    /// Name of the loop, usually the inbound queue.
    pub target: String,
}

impl InternalEvent for IterationCompleted {
    fn emit(self) {
        let result = self.result.label();
        trace!(
            result,
            elapsed_ms = self.duration.as_millis(),
            target = %self.target,
            "polling iteration"
        );
        counter!(
            "parcel_polling_iterations_total",
            "result" => result,
            "target" => self.target.clone()
        )
        .increment(1);
        histogram!("parcel_polling_iteration_duration_seconds", "target" => self.target)
            .record(self.duration.as_secs_f64());
    }
}
