//! Per-message retry and dead-letter routing.
//!
//! One invocation takes one [`OrderMessage`] and drives it to a
//! [`RoutingDecision`]:
//!
//! ```text
//! Attempting(0) --fail--> Attempting(1) --fail--> ... Attempting(MAX-1) --fail--> Exhausted
//!      |                       |                              |                       |
//!      +--------ok-------------+-------------ok---------------+--> Succeeded          v
//!                                                                      error channel <- original message
//! ```
//!
//! Write failures are logged and absorbed. Only a failure to reach the error
//! channel, or cancellation, escapes as a [`ProcessError`]; the caller must
//! then leave the message unacknowledged.

use bytes::Bytes;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::emit;
use crate::error::{
    AttemptTimeoutSnafu, CancelledSnafu, ErrorChannelSnafu, ProcessError, WriteError,
};
use crate::message::{AttemptOutcome, OrderMessage, RoutingDecision};
use crate::metrics::events::{
    AttemptStatus, MessageRouted, WriteAttemptCompleted, WriteAttemptFailed,
};
use crate::queue::ErrorChannel;
use crate::retry::RetryPolicy;
use crate::sink::{DurableSink, KeyStrategy};

/// Routes order messages to a durable sink, falling back to an error channel.
///
/// Holds no per-message state; any number of invocations may run
/// concurrently on one processor.
#[derive(Clone)]
pub struct OrderProcessor {
    sink: Arc<dyn DurableSink>,
    errors: Arc<dyn ErrorChannel>,
    policy: RetryPolicy,
    key_strategy: KeyStrategy,
    target: String,
}

impl std::fmt::Debug for OrderProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderProcessor")
            .field("policy", &self.policy)
            .field("key_strategy", &self.key_strategy)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl OrderProcessor {
    pub fn new(
        sink: Arc<dyn DurableSink>,
        errors: Arc<dyn ErrorChannel>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            sink,
            errors,
            policy,
            key_strategy: KeyStrategy::default(),
            target: "parcel".to_string(),
        }
    }

    pub fn with_key_strategy(mut self, key_strategy: KeyStrategy) -> Self {
        self.key_strategy = key_strategy;
        self
    }

    /// Label used for logs and metrics.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Process one message to a routing decision.
    ///
    /// The blob key is chosen once, so every attempt overwrites the same
    /// object. Cancellation is observed before each attempt, during an
    /// attempt and during backoff.
    pub async fn process(
        &self,
        message: &OrderMessage,
        cancel: &CancellationToken,
    ) -> Result<RoutingDecision, ProcessError> {
        let key = self.key_strategy.key_for(message);
        let mut budget = self.policy.budget();

        debug!(
            target = %self.target,
            message_id = message.id(),
            %key,
            size = message.body().len(),
            "Processing message"
        );

        loop {
            ensure!(
                !cancel.is_cancelled(),
                CancelledSnafu {
                    message_id: message.id()
                }
            );

            let attempt = budget.used() + 1;
            let start = Instant::now();
            let outcome = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    return CancelledSnafu { message_id: message.id() }.fail();
                }

                result = self.attempt(&key, message.body().clone()) => AttemptOutcome::from(result),
            };
            budget.consume();

            let status = if outcome.is_success() {
                AttemptStatus::Success
            } else {
                AttemptStatus::Failure
            };
            emit!(WriteAttemptCompleted {
                status,
                duration: start.elapsed(),
                target: self.target.clone(),
            });

            let cause = match outcome {
                AttemptOutcome::Success => {
                    let decision = RoutingDecision::DeliveredToDurableSink {
                        key,
                        attempts: budget.used(),
                    };
                    info!(
                        target = %self.target,
                        message_id = message.id(),
                        attempts = budget.used(),
                        "Message written to durable sink"
                    );
                    self.record(&decision);
                    return Ok(decision);
                }
                AttemptOutcome::Failed(cause) => cause,
            };

            emit!(WriteAttemptFailed {
                cause: cause.kind(),
                target: self.target.clone(),
            });
            error!(
                target = %self.target,
                message_id = message.id(),
                attempt,
                attempts_remaining = budget.remaining(),
                error = %cause,
                "Failed to write message to durable sink"
            );

            if budget.is_exhausted() {
                break;
            }

            let delay = self.policy.backoff.delay_for(budget.used());
            if !delay.is_zero()
                && cancel
                    .run_until_cancelled(tokio::time::sleep(delay))
                    .await
                    .is_none()
            {
                return CancelledSnafu {
                    message_id: message.id(),
                }
                .fail();
            }
        }

        warn!(
            target = %self.target,
            message_id = message.id(),
            attempts = budget.used(),
            "Retries exhausted, handing message to the error channel"
        );
        self.errors
            .send(message)
            .await
            .context(ErrorChannelSnafu {
                message_id: message.id(),
            })?;

        let decision = RoutingDecision::RoutedToErrorChannel {
            message: message.clone(),
            attempts: budget.used(),
        };
        self.record(&decision);
        Ok(decision)
    }

    async fn attempt(&self, key: &str, body: Bytes) -> Result<(), WriteError> {
        let write = self.sink.write(key, body);
        match self.policy.attempt_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, write).await {
                Ok(result) => result,
                Err(_) => AttemptTimeoutSnafu { timeout }.fail(),
            },
            None => write.await,
        }
    }

    fn record(&self, decision: &RoutingDecision) {
        emit!(MessageRouted {
            decision: decision.label(),
            attempts: decision.attempts(),
            target: self.target.clone(),
        });
    }
}
