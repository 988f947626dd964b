//! Polling loop shared by queue consumers.
//!
//! A [`PollingProcessor`] splits each iteration into a `prepare` step that
//! fetches work and a `process` step that handles it. [`run_polling_loop`]
//! drives the two, races them against shutdown and sleeps between polls.

use async_trait::async_trait;
use rand::Rng;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::emit;
use crate::metrics::events::{IterationCompleted, IterationResultType};

/// Result of a single processing iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationResult {
    /// Work was handled.
    ProcessedItems,
    /// A full batch was handled and more work is likely waiting; poll again
    /// without sleeping.
    Backlog,
    /// Nothing was available.
    NoItems,
    /// Shutdown was requested mid-iteration.
    Shutdown,
}

/// A processor driven by [`run_polling_loop`].
#[async_trait]
pub trait PollingProcessor {
    /// Work fetched by `prepare` and handed to `process`.
    type State: Send;
    type Error: std::error::Error + Send;

    /// Fetch the next unit of work, or `None` when there is nothing to do.
    ///
    /// `cold_start` is true only on the first iteration.
    async fn prepare(&mut self, cold_start: bool) -> Result<Option<Self::State>, Self::Error>;

    async fn process(&mut self, state: Self::State) -> Result<IterationResult, Self::Error>;
}

/// Run `processor` until `shutdown` is cancelled or an iteration fails.
///
/// Between iterations the loop sleeps for `poll_interval` plus up to
/// `poll_jitter_secs` of random jitter, except after
/// [`IterationResult::Backlog`], which polls again straight away.
/// `name` labels logs and iteration metrics.
pub async fn run_polling_loop<P: PollingProcessor>(
    processor: &mut P,
    poll_interval: Duration,
    poll_jitter_secs: u64,
    shutdown: CancellationToken,
    name: &str,
) -> Result<(), P::Error> {
    let mut cold_start = true;

    loop {
        let iteration_start = Instant::now();

        let state = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(target = name, "Shutdown requested while polling");
                return Ok(());
            }

            result = processor.prepare(cold_start) => result?,
        };
        cold_start = false;

        let result = match state {
            Some(state) => tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(target = name, "Shutdown requested during processing");
                    IterationResult::Shutdown
                }

                result = processor.process(state) => result?,
            },
            None => IterationResult::NoItems,
        };

        let result_type = match result {
            IterationResult::Shutdown => break,
            IterationResult::NoItems => IterationResultType::NoItems,
            IterationResult::ProcessedItems | IterationResult::Backlog => {
                IterationResultType::Processed
            }
        };
        emit!(IterationCompleted {
            result: result_type,
            duration: iteration_start.elapsed(),
            target: name.to_string(),
        });

        if result == IterationResult::Backlog {
            debug!(target = name, "Backlog pending, polling again");
            continue;
        }

        let sleep_duration = poll_interval + random_jitter(poll_jitter_secs);
        debug!(
            target = name,
            ?result,
            "Iteration complete, next poll in {}ms",
            sleep_duration.as_millis()
        );
        if shutdown
            .run_until_cancelled(tokio::time::sleep(sleep_duration))
            .await
            .is_none()
        {
            info!(target = name, "Shutdown requested during poll wait");
            break;
        }
    }

    Ok(())
}

/// Random delay in `[0, max_secs)` seconds, millisecond resolution.
pub fn random_jitter(max_secs: u64) -> Duration {
    if max_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_secs * 1000))
    } else {
        Duration::ZERO
    }
}
