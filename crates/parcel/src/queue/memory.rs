//! In-process queue for embedding and tests.
//!
//! Implements both [`MessageSource`] and [`ErrorChannel`], so one type can
//! stand in for the intake queue and the dead-letter queue.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use crate::error::QueueError;
use crate::message::OrderMessage;

use super::{ErrorChannel, MessageSource};

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<OrderMessage>,
    in_flight: HashMap<String, OrderMessage>,
    deliveries: u64,
}

/// FIFO queue with explicit acknowledgement.
///
/// Received messages move to an in-flight set until completed. Calling
/// [`redeliver_in_flight`](Self::redeliver_in_flight) returns them to the
/// front of the queue, as a broker would after a visibility timeout.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message as-is.
    pub async fn push(&self, message: OrderMessage) {
        self.state.lock().await.ready.push_back(message);
    }

    /// Producer side: append a body under a fresh time-ordered id.
    pub async fn enqueue(&self, body: impl Into<Bytes>) -> OrderMessage {
        let message = OrderMessage::new(uuid::Uuid::now_v7().to_string(), body);
        self.push(message.clone()).await;
        message
    }

    /// Return every unacknowledged in-flight message to the queue.
    pub async fn redeliver_in_flight(&self) -> usize {
        let mut state = self.state.lock().await;
        let mut expired: Vec<_> = state.in_flight.drain().map(|(_, m)| m).collect();
        expired.sort_by(|a, b| a.id().cmp(b.id()));
        let count = expired.len();
        for message in expired.into_iter().rev() {
            state.ready.push_front(message);
        }
        count
    }

    /// Messages waiting to be received, in order.
    pub async fn messages(&self) -> Vec<OrderMessage> {
        self.state.lock().await.ready.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.ready.is_empty()
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

#[async_trait]
impl MessageSource for MemoryQueue {
    async fn receive(&self, max: usize) -> Result<Vec<OrderMessage>, QueueError> {
        let mut state = self.state.lock().await;
        let take = max.min(state.ready.len());
        let mut batch = Vec::with_capacity(take);

        for _ in 0..take {
            let Some(message) = state.ready.pop_front() else {
                break;
            };
            state.deliveries += 1;
            let receipt = format!("{}#{}", message.id(), state.deliveries);
            let message = message.with_receipt(receipt.clone());
            state.in_flight.insert(receipt, message.clone());
            batch.push(message);
        }

        Ok(batch)
    }

    async fn complete(&self, message: &OrderMessage) -> Result<(), QueueError> {
        let missing = || QueueError::MissingReceipt {
            id: message.id().to_string(),
        };
        let receipt = message.receipt().ok_or_else(missing)?;

        self.state
            .lock()
            .await
            .in_flight
            .remove(receipt)
            .map(|_| ())
            .ok_or_else(missing)
    }
}

#[async_trait]
impl ErrorChannel for MemoryQueue {
    async fn send(&self, message: &OrderMessage) -> Result<(), QueueError> {
        let forwarded = OrderMessage::new(message.id(), message.body().clone());
        self.push(forwarded).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_respects_max_and_order() {
        let queue = MemoryQueue::new();
        for i in 0..5 {
            queue.push(OrderMessage::new(format!("m-{i}"), Bytes::new())).await;
        }

        let batch = queue.receive(3).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|m| m.id().to_string()).collect();
        assert_eq!(ids, vec!["m-0", "m-1", "m-2"]);
        assert!(batch.iter().all(|m| m.receipt().is_some()));
        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.in_flight().await, 3);
    }

    #[tokio::test]
    async fn test_complete_removes_in_flight() {
        let queue = MemoryQueue::new();
        queue.enqueue(&b"{\"orderId\":1}"[..]).await;

        let batch = queue.receive(10).await.unwrap();
        queue.complete(&batch[0]).await.unwrap();

        assert_eq!(queue.in_flight().await, 0);
        assert_eq!(queue.redeliver_in_flight().await, 0);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_complete_twice_is_an_error() {
        let queue = MemoryQueue::new();
        queue.enqueue(Bytes::new()).await;

        let batch = queue.receive(1).await.unwrap();
        queue.complete(&batch[0]).await.unwrap();
        let err = queue.complete(&batch[0]).await.unwrap_err();
        assert!(matches!(err, QueueError::MissingReceipt { .. }));
    }

    #[tokio::test]
    async fn test_complete_without_receipt_fails() {
        let queue = MemoryQueue::new();
        let err = queue
            .complete(&OrderMessage::new("never-received", Bytes::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::MissingReceipt { .. }));
    }

    #[tokio::test]
    async fn test_uncompleted_messages_are_redelivered() {
        let queue = MemoryQueue::new();
        let sent = queue.enqueue(&b"{\"orderId\":9}"[..]).await;

        let first = queue.receive(1).await.unwrap();
        assert_eq!(queue.redeliver_in_flight().await, 1);

        let second = queue.receive(1).await.unwrap();
        assert_eq!(second[0].id(), sent.id());
        assert_eq!(second[0].body(), sent.body());
        assert_ne!(second[0].receipt(), first[0].receipt());
    }

    #[tokio::test]
    async fn test_send_forwards_body_without_receipt() {
        let errors = MemoryQueue::new();
        let message = OrderMessage::new("m-2", &b"{\"orderId\":2}"[..]).with_receipt("r");

        errors.send(&message).await.unwrap();

        let parked = errors.messages().await;
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].body().as_ref(), b"{\"orderId\":2}");
        assert_eq!(parked[0].receipt(), None);
    }
}
