//! Handler seam
//!
//! A handler is an explicit interface or function value supplied at
//! registration time; resolution happens once, at wiring.

use std::future::Future;

use async_trait::async_trait;

use fx_common::{Message, Result};

use crate::reply::Reply;

/// Processing logic hosted by an endpoint.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, request: Message) -> Result<Reply>;
}

/// Adapter turning an async closure into a `MessageHandler`.
pub struct FnHandler<F>(F);

/// Wrap an async function as a handler:
///
/// ```ignore
/// let handler = handler_fn(|request: Message| async move {
///     Ok(Reply::payload(request.payload().clone()))
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply>> + Send,
{
    async fn handle(&self, request: Message) -> Result<Reply> {
        (self.0)(request).await
    }
}
