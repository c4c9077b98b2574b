//! QueueChannel - pollable FIFO channel
//!
//! Messages are buffered in order until a poller drains them. An optional
//! capacity bounds the buffer; a send against a full bounded channel waits
//! up to its timeout and reports `false` on expiry.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::trace;

use fx_common::{Message, MessageTarget, MessagingError, PollableSource, Result};

enum QueueSender {
    Bounded(mpsc::Sender<Message>),
    Unbounded(mpsc::UnboundedSender<Message>),
}

enum QueueReceiver {
    Bounded(mpsc::Receiver<Message>),
    Unbounded(mpsc::UnboundedReceiver<Message>),
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<Message> {
        match self {
            QueueReceiver::Bounded(rx) => rx.recv().await,
            QueueReceiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// Pollable FIFO channel with an optional capacity.
pub struct QueueChannel {
    name: String,
    sender: QueueSender,
    receiver: tokio::sync::Mutex<QueueReceiver>,
}

impl QueueChannel {
    /// `capacity` of `None` means unbounded.
    pub fn new(name: impl Into<String>, capacity: Option<usize>) -> Self {
        let (sender, receiver) = match capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
            }
        };
        Self {
            name: name.into(),
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }
}

#[async_trait]
impl MessageTarget for QueueChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message, timeout: Option<Duration>) -> Result<bool> {
        match &self.sender {
            QueueSender::Unbounded(tx) => tx
                .send(message)
                .map(|_| true)
                .map_err(|_| MessagingError::Channel(format!("channel '{}' closed", self.name))),
            QueueSender::Bounded(tx) => match timeout {
                None => tx
                    .send(message)
                    .await
                    .map(|_| true)
                    .map_err(|_| MessagingError::Channel(format!("channel '{}' closed", self.name))),
                Some(timeout) => match tx.send_timeout(message, timeout).await {
                    Ok(()) => Ok(true),
                    Err(SendTimeoutError::Timeout(message)) => {
                        trace!(
                            channel = %self.name,
                            message_id = %message.id(),
                            "send timed out against full channel"
                        );
                        Ok(false)
                    }
                    Err(SendTimeoutError::Closed(_)) => Err(MessagingError::Channel(format!(
                        "channel '{}' closed",
                        self.name
                    ))),
                },
            },
        }
    }
}

#[async_trait]
impl PollableSource for QueueChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Option<Message>> {
        let mut receiver = self.receiver.lock().await;
        match timeout {
            None => Ok(receiver.recv().await),
            Some(timeout) => match tokio::time::timeout(timeout, receiver.recv()).await {
                Ok(message) => Ok(message),
                Err(_) => Ok(None),
            },
        }
    }
}
