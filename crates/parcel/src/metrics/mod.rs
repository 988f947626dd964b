//! Metrics for the delivery pipeline.
//!
//! Storage and polling events come from `parcel-core`; this module adds the
//! per-message events (attempts, routing decisions, invocation failures).

pub mod events;

pub use events::*;

/// Macro for emitting parcel metric events.
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        <_ as $crate::metrics::events::InternalEvent>::emit($event)
    };
}
