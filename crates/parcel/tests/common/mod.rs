//! Shared fixtures for parcel integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use parcel::sink::{FailFirst, FaultInjectingSink, MemorySink};
use parcel::{DurableSink, MemoryQueue, OrderMessage, OrderProcessor, RetryPolicy, WriteError};

/// An order message with a JSON body.
pub fn order(id: &str, body: serde_json::Value) -> OrderMessage {
    OrderMessage::new(id, body.to_string().into_bytes()).with_receipt(format!("{id}.json"))
}

/// Processor over an in-memory sink that fails its first `failures` writes.
pub struct Harness {
    pub sink: Arc<FaultInjectingSink<MemorySink>>,
    pub errors: Arc<MemoryQueue>,
    pub processor: OrderProcessor,
}

impl Harness {
    pub fn failing_first(failures: u64, max_attempts: u32) -> Self {
        let sink = Arc::new(FaultInjectingSink::new(MemorySink::new(), FailFirst(failures)));
        let errors = Arc::new(MemoryQueue::new());
        let processor = OrderProcessor::new(
            sink.clone(),
            errors.clone(),
            RetryPolicy::immediate(max_attempts),
        );
        Self {
            sink,
            errors,
            processor,
        }
    }

    /// Labels the processor's logs and metrics with `target`.
    pub fn with_target(mut self, target: &str) -> Self {
        self.processor = self.processor.with_target(target);
        self
    }

    pub fn always_failing(max_attempts: u32) -> Self {
        Self::failing_first(u64::MAX, max_attempts)
    }

    pub async fn stored(&self) -> Vec<(String, Bytes)> {
        self.sink.inner().objects().await
    }
}

/// Fails each key as many times as the body's `failFirst` field says.
///
/// Counts are kept per key, so concurrent messages do not affect each other.
#[derive(Default)]
pub struct ScriptedSink {
    attempts: Mutex<HashMap<String, u32>>,
    stored: Mutex<HashMap<String, Bytes>>,
}

impl ScriptedSink {
    pub async fn attempts_for(&self, key: &str) -> u32 {
        self.attempts.lock().await.get(key).copied().unwrap_or(0)
    }

    pub async fn stored(&self, key: &str) -> Option<Bytes> {
        self.stored.lock().await.get(key).cloned()
    }

    pub async fn stored_count(&self) -> usize {
        self.stored.lock().await.len()
    }
}

#[async_trait]
impl DurableSink for ScriptedSink {
    async fn write(&self, key: &str, body: Bytes) -> Result<(), WriteError> {
        let fail_first = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("failFirst").and_then(|f| f.as_u64()))
            .unwrap_or(0) as u32;

        let attempt = {
            let mut attempts = self.attempts.lock().await;
            let count = attempts.entry(key.to_string()).or_default();
            *count += 1;
            *count
        };
        tokio::task::yield_now().await;

        if attempt <= fail_first {
            return Err(WriteError::Unavailable {
                message: format!("scripted failure {attempt}/{fail_first}"),
            });
        }
        self.stored.lock().await.insert(key.to_string(), body);
        Ok(())
    }
}
