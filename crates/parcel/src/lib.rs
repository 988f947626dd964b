//! parcel: persist queued order messages to blob storage.
//!
//! Each message received from the intake queue is written to a durable blob
//! sink. Failed writes are retried up to a fixed budget; when the budget is
//! exhausted the original message is forwarded, unchanged, to an error
//! channel instead. A message reaches exactly one of the two outputs.
//!
//! - `processor` - the per-message retry and dead-letter state machine
//! - `sink/` - durable sinks (blob storage, in-memory, fault injection)
//! - `queue/` - intake queues and error channels (storage-backed, in-memory)
//! - `pipeline` - polling loop with bounded concurrent invocations
//! - `config` - YAML configuration

pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod sink;

pub use config::Config;
pub use error::{PipelineError, ProcessError, QueueError, WriteError};
pub use message::{AttemptOutcome, OrderMessage, RoutingDecision};
pub use pipeline::{IntakePipeline, PipelineStats, run, run_pipeline};
pub use processor::OrderProcessor;
pub use queue::{ErrorChannel, MemoryQueue, MessageSource, StorageQueue};
pub use retry::{Backoff, RetryBudget, RetryPolicy};
pub use sink::{BlobSink, DurableSink, FaultInjectingSink, KeyStrategy, MemorySink};

pub use parcel_core::{CliArgs, init_tracing, shutdown_token};
