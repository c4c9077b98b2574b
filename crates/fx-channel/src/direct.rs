//! DirectChannel - point-to-point subscribable channel
//!
//! A send runs the receiving consumer on the sender's task. With several
//! subscribers the first one to accept wins, in subscription order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fx_common::{ErrorHandler, Message, MessageTarget, Result};

use crate::dispatch::{Dispatcher, FanOutPolicy};
use crate::SubscribableChannel;

pub struct DirectChannel {
    name: String,
    dispatcher: Dispatcher,
}

impl DirectChannel {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let dispatcher = Dispatcher::new(format!("{name}.dispatcher"), FanOutPolicy::FirstAccepting);
        Self { name, dispatcher }
    }

    pub fn with_error_handler(name: impl Into<String>, handler: Arc<dyn ErrorHandler>) -> Self {
        let name = name.into();
        let dispatcher = Dispatcher::new(format!("{name}.dispatcher"), FanOutPolicy::FirstAccepting)
            .with_error_handler(handler);
        Self { name, dispatcher }
    }

    pub fn subscriber_count(&self) -> usize {
        self.dispatcher.consumer_count()
    }
}

#[async_trait]
impl MessageTarget for DirectChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message, timeout: Option<Duration>) -> Result<bool> {
        self.dispatcher.dispatch(message, timeout).await
    }
}

impl SubscribableChannel for DirectChannel {
    fn subscribe(&self, consumer: Arc<dyn MessageTarget>) -> bool {
        self.dispatcher.add_consumer(consumer)
    }

    fn unsubscribe(&self, consumer: &Arc<dyn MessageTarget>) -> bool {
        self.dispatcher.remove_consumer(consumer)
    }
}
