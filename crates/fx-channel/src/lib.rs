//! FluxGate channels
//!
//! This crate provides the channel implementations and the dispatcher:
//! - QueueChannel: pollable FIFO with optional capacity
//! - PriorityChannel: pollable, ordered by the priority header
//! - DirectChannel: subscribable point-to-point channel
//! - PublishSubscribeChannel: subscribable fan-out channel
//! - Dispatcher: fans one message out to subscribed consumers
//! - ChannelRegistry: destination lookup by name

pub mod dispatch;
pub mod direct;
pub mod priority;
pub mod pubsub;
pub mod queue;
pub mod registry;

use std::sync::Arc;

use fx_common::MessageTarget;

pub use dispatch::{Dispatcher, FanOutPolicy};
pub use direct::DirectChannel;
pub use priority::PriorityChannel;
pub use pubsub::PublishSubscribeChannel;
pub use queue::QueueChannel;
pub use registry::ChannelRegistry;

/// A channel that pushes messages to subscribed consumers.
///
/// `subscribe`/`unsubscribe` are safe to call concurrently with sends; a
/// send in progress operates on a snapshot of the consumer list taken when
/// it started.
pub trait SubscribableChannel: MessageTarget {
    /// Add a consumer. Returns false if it was already subscribed.
    fn subscribe(&self, consumer: Arc<dyn MessageTarget>) -> bool;

    /// Remove a consumer by identity. Returns false if it was not subscribed.
    fn unsubscribe(&self, consumer: &Arc<dyn MessageTarget>) -> bool;
}

/// Identity comparison for trait-object targets.
pub(crate) fn same_target(a: &Arc<dyn MessageTarget>, b: &Arc<dyn MessageTarget>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
