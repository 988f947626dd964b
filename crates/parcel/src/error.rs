//! Error types for the parcel delivery pipeline.
//!
//! Write failures are expected and absorbed by the retry loop. Queue and
//! process errors escape an invocation and leave the message unacknowledged
//! so the source redelivers it.

use snafu::prelude::*;
use std::time::Duration;

pub use parcel_core::error::{ConfigError, MetricsError, StorageError};

/// A single failed attempt to write a message to the durable sink.
///
/// Every variant is retryable and consumes one slot of the retry budget.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    /// The storage backend rejected the write.
    #[snafu(display("Blob write failed: {source}"))]
    BlobWrite { source: StorageError },

    /// The attempt did not finish within the per-attempt timeout.
    #[snafu(display("Write attempt timed out after {}ms", timeout.as_millis()))]
    AttemptTimeout { timeout: Duration },

    /// A fault deliberately injected by `FaultInjectingSink`.
    #[snafu(display("Injected fault on write #{call}"))]
    InjectedFault { call: u64 },

    /// The sink is temporarily unable to accept writes.
    #[snafu(display("Sink unavailable: {message}"))]
    Unavailable { message: String },
}

/// Errors raised by inbound queues and error channels.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// Listing, reading, writing or deleting a queued object failed.
    #[snafu(display("Queue storage operation on '{path}' failed: {source}"))]
    QueueStorage { path: String, source: StorageError },

    /// `complete` was called for a message that was not received from this queue.
    #[snafu(display("Message {id} has no receipt for this queue"))]
    MissingReceipt { id: String },

    /// The channel refuses further messages.
    #[snafu(display("Channel rejected message {id}: {message}"))]
    Rejected { id: String, message: String },
}

/// Errors that fail a whole invocation.
///
/// The message is not acknowledged when either of these is returned.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProcessError {
    /// Retries were exhausted but the message could not be dead-lettered.
    #[snafu(display("Failed to route message {message_id} to the error channel: {source}"))]
    ErrorChannel {
        message_id: String,
        source: QueueError,
    },

    /// Shutdown interrupted the invocation before it reached a decision.
    #[snafu(display("Processing of message {message_id} was cancelled"))]
    Cancelled { message_id: String },
}

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// A storage location could not be opened.
    #[snafu(display("Failed to open {role} storage: {source}"))]
    Storage {
        role: &'static str,
        source: StorageError,
    },

    /// Receiving from the inbound queue failed.
    #[snafu(display("Failed to receive messages: {source}"))]
    Receive { source: QueueError },

    /// The concurrency limiter was closed.
    #[snafu(display("Invocation limiter closed: {source}"))]
    Limiter {
        source: tokio::sync::AcquireError,
    },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },
}

impl WriteError {
    /// Short label used for the `cause` metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteError::BlobWrite { .. } => "storage",
            WriteError::AttemptTimeout { .. } => "timeout",
            WriteError::InjectedFault { .. } => "injected",
            WriteError::Unavailable { .. } => "unavailable",
        }
    }
}
