//! Dispatcher - fans one message out to subscribed consumers
//!
//! Dispatch always iterates a snapshot of the consumer list taken at the
//! start of the call, so subscriptions may change concurrently without
//! affecting a delivery in progress.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use fx_common::{ErrorHandler, Message, MessageTarget, Result};

use crate::same_target;

/// How a message is offered to the consumer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOutPolicy {
    /// Offer in subscription order, stop at the first consumer that accepts.
    FirstAccepting,
    /// Offer to every consumer; succeed if at least one accepted.
    Broadcast,
}

/// Fans a single message out to an ordered set of consumers.
///
/// A consumer accepts by returning `Ok(true)` and declines with `Ok(false)`.
/// A consumer fault (`Err`) aborts delivery to that consumer only: it is
/// routed to the configured error handler when present. Without a handler it
/// is re-raised to the caller, immediately under `FirstAccepting`, and only
/// after every consumer has been offered the message under `Broadcast`.
pub struct Dispatcher {
    name: String,
    policy: FanOutPolicy,
    consumers: RwLock<Vec<Arc<dyn MessageTarget>>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl Dispatcher {
    pub fn new(name: impl Into<String>, policy: FanOutPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            consumers: RwLock::new(Vec::new()),
            error_handler: None,
        }
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn policy(&self) -> FanOutPolicy {
        self.policy
    }

    /// Add a consumer at the end of the order. Returns false on duplicates.
    pub fn add_consumer(&self, consumer: Arc<dyn MessageTarget>) -> bool {
        let mut consumers = self.consumers.write();
        if consumers.iter().any(|existing| same_target(existing, &consumer)) {
            return false;
        }
        consumers.push(consumer);
        true
    }

    /// Remove a consumer by identity.
    pub fn remove_consumer(&self, consumer: &Arc<dyn MessageTarget>) -> bool {
        let mut consumers = self.consumers.write();
        let before = consumers.len();
        consumers.retain(|existing| !same_target(existing, consumer));
        consumers.len() != before
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.read().len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn MessageTarget>> {
        self.consumers.read().clone()
    }

    pub async fn dispatch(&self, message: Message, timeout: Option<Duration>) -> Result<bool> {
        let consumers = self.snapshot();
        if consumers.is_empty() {
            debug!(dispatcher = %self.name, message_id = %message.id(), "no subscribers");
            return Ok(false);
        }
        match self.policy {
            FanOutPolicy::FirstAccepting => self.dispatch_first(consumers, message, timeout).await,
            FanOutPolicy::Broadcast => self.dispatch_broadcast(consumers, message, timeout).await,
        }
    }

    async fn dispatch_first(
        &self,
        consumers: Vec<Arc<dyn MessageTarget>>,
        message: Message,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        for consumer in consumers {
            match consumer.send(message.clone(), timeout).await {
                Ok(true) => return Ok(true),
                Ok(false) => {
                    debug!(
                        dispatcher = %self.name,
                        consumer = %consumer.name(),
                        message_id = %message.id(),
                        "consumer declined, trying next"
                    );
                }
                Err(error) => match &self.error_handler {
                    Some(handler) => handler.handle(error),
                    None => return Err(error),
                },
            }
        }
        Ok(false)
    }

    async fn dispatch_broadcast(
        &self,
        consumers: Vec<Arc<dyn MessageTarget>>,
        message: Message,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let mut accepted = false;
        let mut first_error = None;
        for consumer in consumers {
            match consumer.send(message.clone(), timeout).await {
                Ok(true) => accepted = true,
                Ok(false) => {
                    debug!(
                        dispatcher = %self.name,
                        consumer = %consumer.name(),
                        message_id = %message.id(),
                        "consumer declined broadcast"
                    );
                }
                Err(error) => match &self.error_handler {
                    Some(handler) => handler.handle(error),
                    None => {
                        warn!(
                            dispatcher = %self.name,
                            consumer = %consumer.name(),
                            error = %error,
                            "consumer failed during broadcast"
                        );
                        if first_error.is_none() {
                            first_error = Some(error);
                        }
                    }
                },
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(accepted),
        }
    }
}

#[async_trait]
impl MessageTarget for Dispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message, timeout: Option<Duration>) -> Result<bool> {
        self.dispatch(message, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConsumer {
        name: String,
        accept: bool,
        received: AtomicUsize,
    }

    impl CountingConsumer {
        fn new(name: &str, accept: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                accept,
                received: AtomicUsize::new(0),
            })
        }

        fn received(&self) -> usize {
            self.received.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageTarget for CountingConsumer {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, _message: Message, _timeout: Option<Duration>) -> Result<bool> {
            self.received.fetch_add(1, Ordering::SeqCst);
            Ok(self.accept)
        }
    }

    struct FailingConsumer;

    #[async_trait]
    impl MessageTarget for FailingConsumer {
        fn name(&self) -> &str {
            "failing"
        }

        async fn send(&self, message: Message, _timeout: Option<Duration>) -> Result<bool> {
            Err(fx_common::MessagingError::handling(message, "boom"))
        }
    }

    #[tokio::test]
    async fn first_accepting_stops_at_first_acceptance() {
        let declining = CountingConsumer::new("declining", false);
        let accepting = CountingConsumer::new("accepting", true);
        let never_reached = CountingConsumer::new("never", true);

        let dispatcher = Dispatcher::new("d", FanOutPolicy::FirstAccepting);
        dispatcher.add_consumer(declining.clone());
        dispatcher.add_consumer(accepting.clone());
        dispatcher.add_consumer(never_reached.clone());

        let sent = dispatcher.dispatch(Message::new("m"), None).await.unwrap();
        assert!(sent);
        assert_eq!(declining.received(), 1);
        assert_eq!(accepting.received(), 1);
        assert_eq!(never_reached.received(), 0);
    }

    #[tokio::test]
    async fn first_accepting_returns_false_when_all_decline() {
        let a = CountingConsumer::new("a", false);
        let b = CountingConsumer::new("b", false);

        let dispatcher = Dispatcher::new("d", FanOutPolicy::FirstAccepting);
        dispatcher.add_consumer(a);
        dispatcher.add_consumer(b);

        let sent = dispatcher.dispatch(Message::new("m"), None).await.unwrap();
        assert!(!sent);
    }

    #[tokio::test]
    async fn broadcast_delivers_to_every_consumer() {
        let declining = CountingConsumer::new("declining", false);
        let accepting = CountingConsumer::new("accepting", true);

        let dispatcher = Dispatcher::new("d", FanOutPolicy::Broadcast);
        dispatcher.add_consumer(declining.clone());
        dispatcher.add_consumer(accepting.clone());

        let sent = dispatcher.dispatch(Message::new("m"), None).await.unwrap();
        assert!(sent);
        assert_eq!(declining.received(), 1);
        assert_eq!(accepting.received(), 1);
    }

    #[tokio::test]
    async fn broadcast_failure_does_not_abort_other_deliveries() {
        let accepting = CountingConsumer::new("accepting", true);

        let dispatcher = Dispatcher::new("d", FanOutPolicy::Broadcast);
        dispatcher.add_consumer(Arc::new(FailingConsumer));
        dispatcher.add_consumer(accepting.clone());

        let result = dispatcher.dispatch(Message::new("m"), None).await;
        assert!(result.is_err());
        assert_eq!(accepting.received(), 1);
    }

    #[tokio::test]
    async fn dispatch_without_subscribers_is_a_non_delivery() {
        let dispatcher = Dispatcher::new("d", FanOutPolicy::FirstAccepting);
        let sent = dispatcher.dispatch(Message::new("m"), None).await.unwrap();
        assert!(!sent);
    }

    #[tokio::test]
    async fn unsubscribe_removes_by_identity() {
        let a = CountingConsumer::new("a", true);
        let dispatcher = Dispatcher::new("d", FanOutPolicy::FirstAccepting);
        let consumer: Arc<dyn MessageTarget> = a.clone();
        assert!(dispatcher.add_consumer(consumer.clone()));
        assert!(!dispatcher.add_consumer(consumer.clone()));
        assert!(dispatcher.remove_consumer(&consumer));
        assert_eq!(dispatcher.consumer_count(), 0);
    }
}
