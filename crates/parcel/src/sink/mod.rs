//! Durable sinks for order messages.
//!
//! A [`DurableSink`] persists one message body under a key. Writes may fail
//! transiently; callers retry with the same key, so a sink must treat a
//! repeated key as an overwrite.

mod blob;
mod fault;
mod memory;

pub use blob::BlobSink;
pub use fault::{FailFirst, FailureRate, FaultInjectingSink, FaultPlan};
pub use memory::MemorySink;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::WriteError;
use crate::message::OrderMessage;

/// Target that durably stores message bodies.
#[async_trait]
pub trait DurableSink: Send + Sync {
    /// Store `body` under `key`, overwriting anything already there.
    async fn write(&self, key: &str, body: Bytes) -> Result<(), WriteError>;
}

#[async_trait]
impl<T: DurableSink + ?Sized> DurableSink for Arc<T> {
    async fn write(&self, key: &str, body: Bytes) -> Result<(), WriteError> {
        (**self).write(key, body).await
    }
}

/// How the blob key for a message is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// A fresh UUID per invocation.
    #[default]
    Random,
    /// The message identifier, so redeliveries overwrite the same object.
    MessageId,
}

impl KeyStrategy {
    pub fn key_for(&self, message: &OrderMessage) -> String {
        match self {
            KeyStrategy::Random => uuid::Uuid::new_v4().to_string(),
            KeyStrategy::MessageId => message.id().to_string(),
        }
    }
}
