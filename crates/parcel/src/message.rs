//! Order messages and the per-invocation values derived from them.

use bytes::Bytes;

use crate::error::WriteError;

/// One customer order as received from the intake queue.
///
/// The body is opaque and never modified after receipt; routing a message to
/// the error channel forwards these exact bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderMessage {
    id: String,
    body: Bytes,
    receipt: Option<String>,
}

impl OrderMessage {
    pub fn new(id: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            receipt: None,
        }
    }

    /// Build a message from a body that may be absent. A missing body is
    /// treated as a zero-length payload.
    pub fn from_optional_body(id: impl Into<String>, body: Option<Bytes>) -> Self {
        Self::new(id, body.unwrap_or_default())
    }

    /// Attach the handle the source needs to acknowledge this message.
    pub fn with_receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipt = Some(receipt.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn receipt(&self) -> Option<&str> {
        self.receipt.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Result of one write attempt. Never stored.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success,
    Failed(WriteError),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }
}

impl From<Result<(), WriteError>> for AttemptOutcome {
    fn from(result: Result<(), WriteError>) -> Self {
        match result {
            Ok(()) => AttemptOutcome::Success,
            Err(e) => AttemptOutcome::Failed(e),
        }
    }
}

/// Terminal result of processing one message.
///
/// Exactly one output received the message: the durable sink or the error
/// channel, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// The body was written under `key`.
    DeliveredToDurableSink { key: String, attempts: u32 },
    /// Every attempt failed; the original message went to the error channel.
    RoutedToErrorChannel { message: OrderMessage, attempts: u32 },
}

impl RoutingDecision {
    /// Number of write attempts made before the decision.
    pub fn attempts(&self) -> u32 {
        match self {
            RoutingDecision::DeliveredToDurableSink { attempts, .. }
            | RoutingDecision::RoutedToErrorChannel { attempts, .. } => *attempts,
        }
    }

    pub fn dead_lettered(&self) -> bool {
        matches!(self, RoutingDecision::RoutedToErrorChannel { .. })
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            RoutingDecision::DeliveredToDurableSink { .. } => "delivered",
            RoutingDecision::RoutedToErrorChannel { .. } => "dead_lettered",
        }
    }
}
