//! Inbound order queues and the error channel.
//!
//! [`MessageSource`] is the consumer side of the intake queue: receive a batch,
//! then `complete` each message once it has a routing decision. Anything not
//! completed stays on the queue and is delivered again. [`ErrorChannel`]
//! accepts messages whose writes were exhausted.

mod memory;
mod storage;

pub use memory::MemoryQueue;
pub use storage::StorageQueue;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::QueueError;
use crate::message::OrderMessage;

/// Consumer side of an order queue.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Receive up to `max` messages. An empty vec means the queue is idle.
    async fn receive(&self, max: usize) -> Result<Vec<OrderMessage>, QueueError>;

    /// Acknowledge a received message so it is not delivered again.
    async fn complete(&self, message: &OrderMessage) -> Result<(), QueueError>;
}

/// Output for messages that could not be written to the durable sink.
#[async_trait]
pub trait ErrorChannel: Send + Sync {
    /// Forward the message. The body must arrive unchanged.
    async fn send(&self, message: &OrderMessage) -> Result<(), QueueError>;
}

#[async_trait]
impl<T: MessageSource + ?Sized> MessageSource for Arc<T> {
    async fn receive(&self, max: usize) -> Result<Vec<OrderMessage>, QueueError> {
        (**self).receive(max).await
    }

    async fn complete(&self, message: &OrderMessage) -> Result<(), QueueError> {
        (**self).complete(message).await
    }
}

#[async_trait]
impl<T: ErrorChannel + ?Sized> ErrorChannel for Arc<T> {
    async fn send(&self, message: &OrderMessage) -> Result<(), QueueError> {
        (**self).send(message).await
    }
}
