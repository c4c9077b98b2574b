//! Error taxonomy for the routing core

use crate::message::Message;

/// Failure kinds raised while moving a message through the flow graph.
///
/// `Rejected` is a recorded non-delivery rather than a failure: a selector
/// declined the message before handling. `Configuration` is the only kind
/// that prevents an endpoint from ever reaching the running state.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("message {id} rejected before handling", id = .message.id())]
    Rejected { message: Box<Message> },

    #[error("handler failed for message {id}: {reason}", id = .message.id())]
    Handling { message: Box<Message>, reason: String },

    #[error("delivery of message {id} to '{target}' did not succeed", id = .message.id())]
    Delivery { message: Box<Message>, target: String },

    #[error(
        "no reply destination resolved for message {reply_id} (request {request_id})",
        reply_id = .reply.id(),
        request_id = .request.id()
    )]
    ReplyResolution {
        reply: Box<Message>,
        request: Box<Message>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid message: {0}")]
    Validation(String),

    #[error("channel error: {0}")]
    Channel(String),
}

impl MessagingError {
    pub fn handling(message: Message, reason: impl Into<String>) -> Self {
        MessagingError::Handling {
            message: Box::new(message),
            reason: reason.into(),
        }
    }

    pub fn delivery(message: Message, target: impl Into<String>) -> Self {
        MessagingError::Delivery {
            message: Box::new(message),
            target: target.into(),
        }
    }

    pub fn reply_resolution(reply: Message, request: Message) -> Self {
        MessagingError::ReplyResolution {
            reply: Box::new(reply),
            request: Box::new(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_resolution_names_both_messages() {
        let request = Message::new("req");
        let reply = Message::new("rep");
        let error = MessagingError::reply_resolution(reply.clone(), request.clone());
        let text = error.to_string();
        assert!(text.contains(&reply.id().to_string()));
        assert!(text.contains(&request.id().to_string()));
    }
}
