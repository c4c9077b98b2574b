//! Reply resolution
//!
//! Given a handler's output and the original request, the resolver wraps the
//! output into one or more reply messages, propagates correlation metadata,
//! and picks the destination. Resolution order, first match wins:
//! 1. an explicit target carried alongside the handler output
//! 2. the endpoint's configured output target
//! 3. the request's `return_address` header, a direct target or a name
//!    resolved through the channel registry

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use fx_channel::ChannelRegistry;
use fx_common::{header, HeaderValue, Message, MessageBuilder, MessageTarget, MessagingError, Result};

/// A destination reference: a live target or a name to look up.
#[derive(Clone)]
pub enum TargetRef {
    Direct(Arc<dyn MessageTarget>),
    Named(String),
}

impl TargetRef {
    pub fn named(name: impl Into<String>) -> Self {
        TargetRef::Named(name.into())
    }

    pub fn direct(target: Arc<dyn MessageTarget>) -> Self {
        TargetRef::Direct(target)
    }

    fn resolve(&self, registry: Option<&Arc<ChannelRegistry>>) -> Option<Arc<dyn MessageTarget>> {
        match self {
            TargetRef::Direct(target) => Some(target.clone()),
            TargetRef::Named(name) => registry.and_then(|registry| registry.resolve(name)),
        }
    }
}

impl fmt::Debug for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRef::Direct(target) => write!(f, "Direct({})", target.name()),
            TargetRef::Named(name) => write!(f, "Named({name})"),
        }
    }
}

/// The shape of a handler's output.
#[derive(Debug, Clone)]
pub enum ReplyBody {
    Empty,
    Payload(serde_json::Value),
    Message(Message),
    Composite(Vec<ReplyBody>),
}

impl ReplyBody {
    /// An empty body produces no reply: nothing, a null payload, or a
    /// composite with nothing in it.
    pub fn is_empty(&self) -> bool {
        match self {
            ReplyBody::Empty => true,
            ReplyBody::Payload(value) => value.is_null(),
            ReplyBody::Message(message) => message.payload().is_null(),
            ReplyBody::Composite(bodies) => bodies.iter().all(ReplyBody::is_empty),
        }
    }
}

/// Transient holder for one invocation's output: the reply body plus an
/// optional explicit destination override. Discarded once resolved.
#[derive(Debug, Clone)]
pub struct Reply {
    body: ReplyBody,
    target: Option<TargetRef>,
}

impl Reply {
    pub fn none() -> Self {
        Self {
            body: ReplyBody::Empty,
            target: None,
        }
    }

    pub fn payload(value: impl Into<serde_json::Value>) -> Self {
        Self {
            body: ReplyBody::Payload(value.into()),
            target: None,
        }
    }

    pub fn message(message: Message) -> Self {
        Self {
            body: ReplyBody::Message(message),
            target: None,
        }
    }

    pub fn composite(bodies: Vec<ReplyBody>) -> Self {
        Self {
            body: ReplyBody::Composite(bodies),
            target: None,
        }
    }

    /// Convenience for a composite of bare payloads.
    pub fn composite_payloads(values: Vec<serde_json::Value>) -> Self {
        Self::composite(values.into_iter().map(ReplyBody::Payload).collect())
    }

    /// Override the destination for this reply.
    pub fn with_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }

    /// Override the destination with a channel name.
    pub fn to_channel(self, name: impl Into<String>) -> Self {
        self.with_target(TargetRef::named(name))
    }

    pub fn body(&self) -> &ReplyBody {
        &self.body
    }

    pub fn target_override(&self) -> Option<&TargetRef> {
        self.target.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn into_parts(self) -> (ReplyBody, Option<TargetRef>) {
        (self.body, self.target)
    }
}

/// Builds outgoing reply messages and resolves their destination.
pub struct ReplyResolver {
    name: String,
    output_target: Option<TargetRef>,
    registry: Option<Arc<ChannelRegistry>>,
    send_timeout: Option<Duration>,
    split_composite: bool,
}

impl ReplyResolver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_target: None,
            registry: None,
            send_timeout: None,
            split_composite: false,
        }
    }

    pub fn with_output_target(mut self, target: TargetRef) -> Self {
        self.output_target = Some(target);
        self
    }

    pub fn with_registry(mut self, registry: Arc<ChannelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Fan a composite body out into one send per element instead of
    /// collapsing it into a single array-payload reply.
    pub fn with_split_composite(mut self, split: bool) -> Self {
        self.split_composite = split;
        self
    }

    /// Wrap a handler's output into outgoing reply messages.
    ///
    /// Every wrapped reply copies the request headers it does not already
    /// carry and gets the request's id as its correlation id unless the
    /// handler set one. A reply message with the request's own id is the
    /// request passed through unchanged and is forwarded as-is.
    pub fn build_replies(&self, body: ReplyBody, request: &Message) -> Vec<Message> {
        match body {
            ReplyBody::Empty => Vec::new(),
            ReplyBody::Payload(value) => vec![self.wrap_payload(value, request)],
            ReplyBody::Message(message) => vec![self.wrap_message(message, request)],
            ReplyBody::Composite(bodies) => {
                if self.split_composite {
                    let mut out = Vec::new();
                    self.flatten_into(bodies, request, &mut out);
                    out
                } else {
                    let mut payloads = Vec::new();
                    collect_payloads(&bodies, &mut payloads);
                    vec![self.wrap_payload(serde_json::Value::Array(payloads), request)]
                }
            }
        }
    }

    fn flatten_into(&self, bodies: Vec<ReplyBody>, request: &Message, out: &mut Vec<Message>) {
        for body in bodies {
            match body {
                ReplyBody::Empty => {}
                ReplyBody::Payload(value) => out.push(self.wrap_payload(value, request)),
                ReplyBody::Message(message) => out.push(self.wrap_message(message, request)),
                ReplyBody::Composite(inner) => self.flatten_into(inner, request, out),
            }
        }
    }

    fn wrap_payload(&self, payload: serde_json::Value, request: &Message) -> Message {
        MessageBuilder::with_payload(payload)
            .copy_headers_if_absent(request.headers())
            .set_header_if_absent(header::CORRELATION_ID, request.id())
            .build()
    }

    fn wrap_message(&self, reply: Message, request: &Message) -> Message {
        if reply.id() == request.id() {
            return reply;
        }
        MessageBuilder::from_message(&reply)
            .copy_headers_if_absent(request.headers())
            .set_header_if_absent(header::CORRELATION_ID, request.id())
            .build()
    }

    /// Resolve the reply destination for one invocation.
    pub fn resolve_target(
        &self,
        override_target: Option<&TargetRef>,
        request: &Message,
    ) -> Option<Arc<dyn MessageTarget>> {
        if let Some(target) = override_target.and_then(|t| t.resolve(self.registry.as_ref())) {
            return Some(target);
        }
        if let Some(target) = self
            .output_target
            .as_ref()
            .and_then(|t| t.resolve(self.registry.as_ref()))
        {
            return Some(target);
        }
        match request.headers().return_address() {
            Some(HeaderValue::Target(target)) => Some(target.clone()),
            Some(HeaderValue::Json(value)) => {
                let name = value.as_str()?;
                let resolved = self.registry.as_ref().and_then(|r| r.resolve(name));
                if resolved.is_none() {
                    debug!(
                        endpoint = %self.name,
                        return_address = %name,
                        "return address did not resolve"
                    );
                }
                resolved
            }
            None => None,
        }
    }

    /// Send one reply to the resolved target. A declined or timed-out send
    /// is a delivery failure.
    pub async fn send_reply(&self, target: &Arc<dyn MessageTarget>, reply: Message) -> Result<()> {
        let sent = target.send(reply.clone(), self.send_timeout).await?;
        if sent {
            Ok(())
        } else {
            Err(MessagingError::delivery(reply, target.name()))
        }
    }
}

fn collect_payloads(bodies: &[ReplyBody], out: &mut Vec<serde_json::Value>) {
    for body in bodies {
        match body {
            ReplyBody::Empty => {}
            ReplyBody::Payload(value) => out.push(value.clone()),
            ReplyBody::Message(message) => out.push(message.payload().clone()),
            ReplyBody::Composite(inner) => collect_payloads(inner, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fx_channel::QueueChannel;
    use serde_json::json;

    #[test]
    fn wrapped_reply_carries_correlation_and_request_headers() {
        let resolver = ReplyResolver::new("ep");
        let request = MessageBuilder::with_payload("req")
            .set_header("tenant", "acme")
            .build();
        let replies = resolver.build_replies(ReplyBody::Payload(json!("rep")), &request);
        assert_eq!(replies.len(), 1);
        let reply = &replies[0];
        assert_eq!(reply.headers().correlation_id(), Some(request.id()));
        assert_eq!(
            reply.headers().get("tenant").and_then(|v| v.as_str()),
            Some("acme")
        );
        assert_ne!(reply.id(), request.id());
    }

    #[test]
    fn handler_set_correlation_wins() {
        let resolver = ReplyResolver::new("ep");
        let request = Message::new("req");
        let correlation = uuid::Uuid::new_v4();
        let handler_reply = MessageBuilder::with_payload("rep")
            .set_correlation_id(correlation)
            .build();
        let replies = resolver.build_replies(ReplyBody::Message(handler_reply), &request);
        assert_eq!(replies[0].headers().correlation_id(), Some(correlation));
    }

    #[test]
    fn pass_through_keeps_the_request_untouched() {
        let resolver = ReplyResolver::new("ep");
        let request = Message::new("req");
        let replies = resolver.build_replies(ReplyBody::Message(request.clone()), &request);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].id(), request.id());
        assert_eq!(replies[0].headers().correlation_id(), None);
    }

    #[test]
    fn split_composite_produces_one_reply_per_element() {
        let resolver = ReplyResolver::new("ep").with_split_composite(true);
        let request = Message::new("req");
        let replies = resolver.build_replies(
            ReplyBody::Composite(vec![
                ReplyBody::Payload(json!(1)),
                ReplyBody::Payload(json!(2)),
                ReplyBody::Payload(json!(3)),
            ]),
            &request,
        );
        assert_eq!(replies.len(), 3);
        for reply in &replies {
            assert_eq!(reply.headers().correlation_id(), Some(request.id()));
        }
    }

    #[test]
    fn unsplit_composite_collapses_to_an_array_payload() {
        let resolver = ReplyResolver::new("ep");
        let request = Message::new("req");
        let replies = resolver.build_replies(
            ReplyBody::Composite(vec![
                ReplyBody::Payload(json!("a")),
                ReplyBody::Payload(json!("b")),
            ]),
            &request,
        );
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].payload(), &json!(["a", "b"]));
    }

    #[test]
    fn resolution_prefers_override_then_output_then_return_address() {
        let registry = Arc::new(ChannelRegistry::new());
        let override_channel: Arc<dyn MessageTarget> = Arc::new(QueueChannel::new("override", None));
        let output_channel: Arc<dyn MessageTarget> = Arc::new(QueueChannel::new("output", None));
        let return_channel: Arc<dyn MessageTarget> = Arc::new(QueueChannel::new("return", None));
        registry.register(override_channel.clone());
        registry.register(output_channel.clone());
        registry.register(return_channel.clone());

        let request = MessageBuilder::with_payload("req")
            .set_return_address("return")
            .build();

        let resolver = ReplyResolver::new("ep")
            .with_registry(registry.clone())
            .with_output_target(TargetRef::named("output"));

        let via_override = resolver
            .resolve_target(Some(&TargetRef::named("override")), &request)
            .expect("override resolves");
        assert_eq!(via_override.name(), "override");

        let via_output = resolver.resolve_target(None, &request).expect("output resolves");
        assert_eq!(via_output.name(), "output");

        let no_output = ReplyResolver::new("ep").with_registry(registry);
        let via_return = no_output.resolve_target(None, &request).expect("return resolves");
        assert_eq!(via_return.name(), "return");
    }

    #[test]
    fn no_destination_resolves_to_none() {
        let resolver = ReplyResolver::new("ep");
        let request = Message::new("req");
        assert!(resolver.resolve_target(None, &request).is_none());
    }

    #[test]
    fn direct_return_address_bypasses_the_registry() {
        let target: Arc<dyn MessageTarget> = Arc::new(QueueChannel::new("direct-reply", None));
        let request = MessageBuilder::with_payload("req")
            .set_return_address_target(target.clone())
            .build();
        let resolver = ReplyResolver::new("ep");
        let resolved = resolver.resolve_target(None, &request).expect("direct resolves");
        assert_eq!(resolved.name(), "direct-reply");
    }
}
