//! Interceptor chain wrapped around endpoint dispatch
//!
//! `pre_handle` runs forward through the chain before the handler;
//! `post_handle` runs in reverse order on each outgoing reply. Returning
//! `None` from either hook vetoes the exchange or suppresses that reply.

use std::sync::Arc;

use parking_lot::RwLock;

use fx_common::Message;

pub trait EndpointInterceptor: Send + Sync {
    fn pre_handle(&self, message: Message) -> Option<Message> {
        Some(message)
    }

    fn post_handle(&self, reply: Message) -> Option<Message> {
        Some(reply)
    }
}

/// Ordered interceptor list supporting concurrent mutation; application
/// always works against a snapshot.
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: RwLock<Vec<Arc<dyn EndpointInterceptor>>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(interceptors: Vec<Arc<dyn EndpointInterceptor>>) -> Self {
        Self {
            interceptors: RwLock::new(interceptors),
        }
    }

    pub fn add(&self, interceptor: Arc<dyn EndpointInterceptor>) {
        self.interceptors.write().push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn EndpointInterceptor>> {
        self.interceptors.read().clone()
    }

    /// Run the pre-handle hooks in order. `None` means the exchange was
    /// vetoed.
    pub fn apply_pre(&self, message: Message) -> Option<Message> {
        let mut current = message;
        for interceptor in self.snapshot() {
            current = interceptor.pre_handle(current)?;
        }
        Some(current)
    }

    /// Run the post-handle hooks in reverse order. `None` suppresses the
    /// reply.
    pub fn apply_post(&self, reply: Message) -> Option<Message> {
        let mut current = reply;
        for interceptor in self.snapshot().iter().rev() {
            current = interceptor.post_handle(current)?;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fx_common::MessageBuilder;

    struct Tagging {
        name: &'static str,
    }

    impl EndpointInterceptor for Tagging {
        fn pre_handle(&self, message: Message) -> Option<Message> {
            let trail = message
                .headers()
                .get("trail")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Some(
                MessageBuilder::from_message(&message)
                    .set_header("trail", format!("{trail}{}", self.name))
                    .build(),
            )
        }
    }

    struct Veto;

    impl EndpointInterceptor for Veto {
        fn pre_handle(&self, _message: Message) -> Option<Message> {
            None
        }
    }

    #[test]
    fn pre_runs_in_order() {
        let chain = InterceptorChain::new();
        chain.add(Arc::new(Tagging { name: "a" }));
        chain.add(Arc::new(Tagging { name: "b" }));
        let out = chain.apply_pre(Message::new("m")).expect("not vetoed");
        assert_eq!(out.headers().get("trail").and_then(|v| v.as_str()), Some("ab"));
    }

    #[test]
    fn veto_short_circuits() {
        let chain = InterceptorChain::new();
        chain.add(Arc::new(Veto));
        chain.add(Arc::new(Tagging { name: "never" }));
        assert!(chain.apply_pre(Message::new("m")).is_none());
    }
}
