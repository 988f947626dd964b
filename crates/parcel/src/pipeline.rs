//! Intake pipeline: poll the order queue and route each message.
//!
//! Every poll receives up to `batch_size` messages and runs one invocation
//! per message, at most `max_concurrent_messages` at a time. A message is
//! completed at the source only once its invocation produced a routing
//! decision; anything else stays queued and is delivered again.

use async_trait::async_trait;
use snafu::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use parcel_core::{IterationResult, PollingProcessor, init_metrics, run_polling_loop};

use crate::config::Config;
use crate::emit;
use crate::error::{
    LimiterSnafu, MetricsSnafu, PipelineError, ProcessError, ReceiveSnafu, StorageSnafu,
};
use crate::message::{OrderMessage, RoutingDecision};
use crate::metrics::events::{
    ActiveInvocations, InvocationFailed, MessageCompleted, MessagesReceived,
};
use crate::processor::OrderProcessor;
use crate::queue::{ErrorChannel, MessageSource, StorageQueue};
use crate::sink::{BlobSink, DurableSink, FailureRate, FaultInjectingSink};

/// Counters accumulated across iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: usize,
    pub delivered: usize,
    pub dead_lettered: usize,
    /// Invocations that ended without an acknowledged decision.
    pub unacknowledged: usize,
}

/// How one invocation ended.
#[derive(Debug)]
enum Invocation {
    /// Decision reached and the message was completed at the source.
    Completed(RoutingDecision),
    /// Decision reached but the acknowledgement failed.
    Unacknowledged(RoutingDecision),
    Failed(ProcessError),
}

/// Polls a [`MessageSource`] and hands messages to an [`OrderProcessor`].
pub struct IntakePipeline {
    source: Arc<dyn MessageSource>,
    processor: OrderProcessor,
    batch_size: usize,
    limiter: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    target: String,
    stats: PipelineStats,
}

impl IntakePipeline {
    pub fn new(
        source: Arc<dyn MessageSource>,
        processor: OrderProcessor,
        batch_size: usize,
        max_concurrent_messages: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            processor,
            batch_size: batch_size.max(1),
            limiter: Arc::new(Semaphore::new(max_concurrent_messages.max(1))),
            active: Arc::new(AtomicUsize::new(0)),
            shutdown,
            target: "parcel".to_string(),
            stats: PipelineStats::default(),
        }
    }

    /// Label used for logs and metrics.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Open the configured queues and sink.
    pub async fn from_config(
        config: &Config,
        shutdown: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let source = StorageQueue::new(
            &config.source.path,
            config.source.storage_options.clone(),
            config.source.extension.clone(),
        )
        .await
        .context(StorageSnafu { role: "source" })?;

        let blob_sink = BlobSink::new(
            &config.sink.path,
            config.sink.storage_options.clone(),
            config.sink.extension.clone(),
        )
        .await
        .context(StorageSnafu { role: "sink" })?;

        let errors = StorageQueue::new(
            &config.error_channel.path,
            config.error_channel.storage_options.clone(),
            config.error_channel.extension.clone(),
        )
        .await
        .context(StorageSnafu {
            role: "error channel",
        })?;

        let sink: Arc<dyn DurableSink> = match &config.fault_injection {
            Some(faults) => {
                warn!(
                    failure_rate = faults.failure_rate,
                    seed = ?faults.seed,
                    "Fault injection enabled on the durable sink"
                );
                let plan = match faults.seed {
                    Some(seed) => FailureRate::seeded(faults.failure_rate, seed),
                    None => FailureRate::new(faults.failure_rate),
                };
                Arc::new(FaultInjectingSink::new(blob_sink, plan))
            }
            None => Arc::new(blob_sink),
        };

        let target = source.canonical_url().to_string();
        let errors: Arc<dyn ErrorChannel> = Arc::new(errors);
        let processor = OrderProcessor::new(sink, errors, config.retry.policy())
            .with_key_strategy(config.sink.key_strategy)
            .with_target(target.clone());

        Ok(Self::new(
            Arc::new(source),
            processor,
            config.source.batch_size,
            config.source.max_concurrent_messages,
            shutdown,
        )
        .with_target(target))
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Receive one batch and process it to completion.
    ///
    /// Returns the number of messages received.
    pub async fn run_once(&mut self) -> Result<usize, PipelineError> {
        match self.prepare(false).await? {
            Some(batch) => {
                let count = batch.len();
                self.process(batch).await?;
                Ok(count)
            }
            None => Ok(0),
        }
    }

    fn record(&mut self, invocation: Invocation) {
        match invocation {
            Invocation::Completed(decision) => self.count_decision(&decision),
            Invocation::Unacknowledged(decision) => {
                self.count_decision(&decision);
                self.stats.unacknowledged += 1;
            }
            Invocation::Failed(_) => self.stats.unacknowledged += 1,
        }
    }

    fn count_decision(&mut self, decision: &RoutingDecision) {
        if decision.dead_lettered() {
            self.stats.dead_lettered += 1;
        } else {
            self.stats.delivered += 1;
        }
    }
}

async fn invoke(
    processor: &OrderProcessor,
    source: &dyn MessageSource,
    message: OrderMessage,
    cancel: &CancellationToken,
    target: &str,
) -> Invocation {
    let decision = match processor.process(&message, cancel).await {
        Ok(decision) => decision,
        Err(e) => {
            let reason = match &e {
                ProcessError::ErrorChannel { .. } => {
                    error!(
                        target = target,
                        message_id = message.id(),
                        error = %e,
                        "Invocation failed, message left for redelivery"
                    );
                    "error_channel"
                }
                ProcessError::Cancelled { .. } => {
                    info!(
                        target = target,
                        message_id = message.id(),
                        "Invocation cancelled, message left for redelivery"
                    );
                    "cancelled"
                }
            };
            emit!(InvocationFailed {
                reason,
                target: target.to_string(),
            });
            return Invocation::Failed(e);
        }
    };

    match source.complete(&message).await {
        Ok(()) => {
            emit!(MessageCompleted {
                target: target.to_string(),
            });
            Invocation::Completed(decision)
        }
        Err(e) => {
            warn!(
                target = target,
                message_id = message.id(),
                error = %e,
                "Failed to acknowledge message, it will be redelivered"
            );
            emit!(InvocationFailed {
                reason: "ack",
                target: target.to_string(),
            });
            Invocation::Unacknowledged(decision)
        }
    }
}

#[async_trait]
impl PollingProcessor for IntakePipeline {
    type State = Vec<OrderMessage>;
    type Error = PipelineError;

    async fn prepare(&mut self, cold_start: bool) -> Result<Option<Self::State>, Self::Error> {
        if cold_start {
            info!(target = %self.target, "Polling order queue");
        }
        let batch = self
            .source
            .receive(self.batch_size)
            .await
            .context(ReceiveSnafu)?;

        if batch.is_empty() {
            return Ok(None);
        }
        emit!(MessagesReceived {
            count: batch.len() as u64,
            target: self.target.clone(),
        });
        self.stats.received += batch.len();
        Ok(Some(batch))
    }

    async fn process(&mut self, batch: Self::State) -> Result<IterationResult, Self::Error> {
        debug!(target = %self.target, count = batch.len(), "Processing batch");
        let full = batch.len() >= self.batch_size;
        let unacknowledged_before = self.stats.unacknowledged;
        let mut invocations = JoinSet::new();

        for message in batch {
            let permit = Arc::clone(&self.limiter)
                .acquire_owned()
                .await
                .context(LimiterSnafu)?;
            let processor = self.processor.clone();
            let source = Arc::clone(&self.source);
            let cancel = self.shutdown.clone();
            let active = Arc::clone(&self.active);
            let target = self.target.clone();

            invocations.spawn(async move {
                let _permit = permit;
                emit!(ActiveInvocations {
                    count: active.fetch_add(1, Ordering::Relaxed) + 1,
                    target: target.clone(),
                });
                let invocation =
                    invoke(&processor, source.as_ref(), message, &cancel, &target).await;
                emit!(ActiveInvocations {
                    count: active.fetch_sub(1, Ordering::Relaxed) - 1,
                    target,
                });
                invocation
            });
        }

        while let Some(joined) = invocations.join_next().await {
            match joined {
                Ok(invocation) => self.record(invocation),
                Err(e) => {
                    error!(target = %self.target, error = %e, "Invocation task panicked");
                    emit!(InvocationFailed {
                        reason: "panic",
                        target: self.target.clone(),
                    });
                    self.stats.unacknowledged += 1;
                }
            }
        }

        debug!(target = %self.target, stats = ?self.stats, "Batch complete");
        // Unacknowledged messages come straight back, so only a clean full
        // batch skips the poll wait.
        if full && self.stats.unacknowledged == unacknowledged_before {
            Ok(IterationResult::Backlog)
        } else {
            Ok(IterationResult::ProcessedItems)
        }
    }
}

/// Run the pipeline described by `config` until `shutdown` is cancelled.
pub async fn run_pipeline(
    config: &Config,
    shutdown: CancellationToken,
) -> Result<PipelineStats, PipelineError> {
    let mut pipeline = tokio::select! {
        biased;

        _ = shutdown.cancelled() => {
            info!("Shutdown requested during initialization");
            return Ok(PipelineStats::default());
        }

        result = IntakePipeline::from_config(config, shutdown.clone()) => result?,
    };

    info!(
        target = %pipeline.target(),
        batch_size = config.source.batch_size,
        max_concurrent_messages = config.source.max_concurrent_messages,
        max_attempts = config.retry.max_attempts,
        "Pipeline initialized"
    );

    let target = pipeline.target().to_string();
    run_polling_loop(
        &mut pipeline,
        config.poll_interval(),
        config.source.poll_jitter_secs,
        shutdown,
        &target,
    )
    .await?;

    let stats = pipeline.stats();
    info!(
        target = %target,
        received = stats.received,
        delivered = stats.delivered,
        dead_lettered = stats.dead_lettered,
        unacknowledged = stats.unacknowledged,
        "Pipeline stopped"
    );
    Ok(stats)
}

/// Start the metrics endpoint, then run the pipeline.
pub async fn run(
    config: &Config,
    shutdown: CancellationToken,
) -> Result<PipelineStats, PipelineError> {
    init_metrics(&config.metrics.address).context(MetricsSnafu)?;
    run_pipeline(config, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::queue::MemoryQueue;
    use crate::retry::RetryPolicy;
    use crate::sink::{FailFirst, MemorySink};

    fn pipeline_over(
        source: Arc<MemoryQueue>,
        sink: Arc<dyn DurableSink>,
        errors: Arc<MemoryQueue>,
        max_attempts: u32,
    ) -> IntakePipeline {
        let processor = OrderProcessor::new(sink, errors, RetryPolicy::immediate(max_attempts));
        IntakePipeline::new(source, processor, 8, 2, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_empty_queue_prepares_nothing() {
        let source = Arc::new(MemoryQueue::new());
        let mut pipeline = pipeline_over(
            source,
            Arc::new(MemorySink::new()),
            Arc::new(MemoryQueue::new()),
            4,
        );

        assert!(pipeline.prepare(true).await.unwrap().is_none());
        assert_eq!(pipeline.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_is_routed_and_completed() {
        let source = Arc::new(MemoryQueue::new());
        let sink = Arc::new(MemorySink::new());
        let errors = Arc::new(MemoryQueue::new());
        for i in 0..5 {
            source.enqueue(format!("{{\"orderId\":{i}}}").into_bytes()).await;
        }
        let mut pipeline = pipeline_over(source.clone(), sink.clone(), errors.clone(), 4);

        assert_eq!(pipeline.run_once().await.unwrap(), 5);

        assert_eq!(sink.len().await, 5);
        assert!(errors.is_empty().await);
        assert!(source.is_empty().await);
        assert_eq!(source.in_flight().await, 0);
        assert_eq!(
            pipeline.stats(),
            PipelineStats {
                received: 5,
                delivered: 5,
                dead_lettered: 0,
                unacknowledged: 0
            }
        );
    }

    #[tokio::test]
    async fn test_batch_size_bounds_receive() {
        let source = Arc::new(MemoryQueue::new());
        for _ in 0..10 {
            source.enqueue(Bytes::new()).await;
        }
        let processor = OrderProcessor::new(
            Arc::new(MemorySink::new()),
            Arc::new(MemoryQueue::new()),
            RetryPolicy::immediate(1),
        );
        let mut pipeline =
            IntakePipeline::new(source.clone(), processor, 3, 1, CancellationToken::new());

        assert_eq!(pipeline.run_once().await.unwrap(), 3);
        assert_eq!(source.len().await, 7);
    }

    #[tokio::test]
    async fn test_full_clean_batch_reports_backlog() {
        let source = Arc::new(MemoryQueue::new());
        for _ in 0..5 {
            source.enqueue(Bytes::new()).await;
        }
        let processor = OrderProcessor::new(
            Arc::new(MemorySink::new()),
            Arc::new(MemoryQueue::new()),
            RetryPolicy::immediate(1),
        );
        let mut pipeline =
            IntakePipeline::new(source.clone(), processor, 3, 2, CancellationToken::new());

        let batch = pipeline.prepare(true).await.unwrap().unwrap();
        assert_eq!(
            pipeline.process(batch).await.unwrap(),
            IterationResult::Backlog
        );

        let batch = pipeline.prepare(false).await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(
            pipeline.process(batch).await.unwrap(),
            IterationResult::ProcessedItems
        );
    }

    #[tokio::test]
    async fn test_unacknowledged_full_batch_waits_for_next_poll() {
        let source = Arc::new(MemoryQueue::new());
        source.enqueue(&b"{\"orderId\":6}"[..]).await;
        let shutdown = CancellationToken::new();
        let processor = OrderProcessor::new(
            Arc::new(MemorySink::new()),
            Arc::new(MemoryQueue::new()),
            RetryPolicy::immediate(4),
        );
        let mut pipeline = IntakePipeline::new(source.clone(), processor, 1, 1, shutdown.clone());

        let batch = pipeline.prepare(false).await.unwrap().unwrap();
        shutdown.cancel();

        assert_eq!(
            pipeline.process(batch).await.unwrap(),
            IterationResult::ProcessedItems
        );
        assert_eq!(pipeline.stats().unacknowledged, 1);
    }

    #[tokio::test]
    async fn test_dead_lettered_messages_are_completed() {
        let source = Arc::new(MemoryQueue::new());
        let errors = Arc::new(MemoryQueue::new());
        let sent = source.enqueue(&b"{\"orderId\":2}"[..]).await;
        let sink = Arc::new(FaultInjectingSink::new(MemorySink::new(), FailFirst(u64::MAX)));
        let mut pipeline = pipeline_over(source.clone(), sink, errors.clone(), 4);

        pipeline.run_once().await.unwrap();

        assert_eq!(pipeline.stats().dead_lettered, 1);
        assert_eq!(source.in_flight().await, 0);
        assert_eq!(errors.messages().await[0].body(), sent.body());
    }

    #[tokio::test]
    async fn test_cancelled_invocations_stay_queued() {
        let source = Arc::new(MemoryQueue::new());
        let sink = Arc::new(MemorySink::new());
        source.enqueue(&b"{\"orderId\":5}"[..]).await;
        let shutdown = CancellationToken::new();
        let processor = OrderProcessor::new(
            sink.clone(),
            Arc::new(MemoryQueue::new()),
            RetryPolicy::immediate(4),
        );
        let mut pipeline = IntakePipeline::new(source.clone(), processor, 8, 2, shutdown.clone());

        let batch = pipeline.prepare(false).await.unwrap().unwrap();
        shutdown.cancel();
        pipeline.process(batch).await.unwrap();

        assert_eq!(pipeline.stats().unacknowledged, 1);
        assert!(sink.is_empty().await);
        assert_eq!(source.in_flight().await, 1);
        assert_eq!(source.redeliver_in_flight().await, 1);
    }
}
