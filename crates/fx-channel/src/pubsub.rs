//! PublishSubscribeChannel - fan-out subscribable channel
//!
//! Every subscriber is offered each message. A send reports success when at
//! least one subscriber accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fx_common::{ErrorHandler, Message, MessageTarget, Result};

use crate::dispatch::{Dispatcher, FanOutPolicy};
use crate::SubscribableChannel;

pub struct PublishSubscribeChannel {
    name: String,
    dispatcher: Dispatcher,
}

impl PublishSubscribeChannel {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let dispatcher = Dispatcher::new(format!("{name}.dispatcher"), FanOutPolicy::Broadcast);
        Self { name, dispatcher }
    }

    /// Route per-subscriber failures to `handler` instead of re-raising the
    /// first one after the fan-out completes.
    pub fn with_error_handler(name: impl Into<String>, handler: Arc<dyn ErrorHandler>) -> Self {
        let name = name.into();
        let dispatcher = Dispatcher::new(format!("{name}.dispatcher"), FanOutPolicy::Broadcast)
            .with_error_handler(handler);
        Self { name, dispatcher }
    }

    pub fn subscriber_count(&self) -> usize {
        self.dispatcher.consumer_count()
    }
}

#[async_trait]
impl MessageTarget for PublishSubscribeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message, timeout: Option<Duration>) -> Result<bool> {
        self.dispatcher.dispatch(message, timeout).await
    }
}

impl SubscribableChannel for PublishSubscribeChannel {
    fn subscribe(&self, consumer: Arc<dyn MessageTarget>) -> bool {
        self.dispatcher.add_consumer(consumer)
    }

    fn unsubscribe(&self, consumer: &Arc<dyn MessageTarget>) -> bool {
        self.dispatcher.remove_consumer(consumer)
    }
}
