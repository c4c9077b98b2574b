//! Capability traits at the seams of the routing core
//!
//! Everything that can receive a message is a `MessageTarget`: channels,
//! dispatchers, and endpoint invocation pipelines alike. Pollable sources
//! add a blocking receive with timeout.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::MessagingError;
use crate::message::Message;
use crate::Result;

/// An addressable sink accepting messages.
///
/// `send` returns `Ok(true)` when the target accepted the message,
/// `Ok(false)` when it declined or the timeout elapsed, and `Err` on a
/// fault while handling. A `None` timeout blocks until the target accepts.
#[async_trait]
pub trait MessageTarget: Send + Sync {
    /// Stable name used in registry lookups and logs.
    fn name(&self) -> &str;

    async fn send(&self, message: Message, timeout: Option<Duration>) -> Result<bool>;
}

/// A source that can be drained by a poller.
///
/// A `None` timeout blocks indefinitely. `Ok(None)` means the source was
/// empty or the timeout elapsed; the two are indistinguishable by contract.
#[async_trait]
pub trait PollableSource: Send + Sync {
    fn name(&self) -> &str;

    async fn receive(&self, timeout: Option<Duration>) -> Result<Option<Message>>;
}

/// Callback for failures raised while processing a message.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, error: MessagingError);
}
