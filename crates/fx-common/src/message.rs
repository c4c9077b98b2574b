//! Message envelope and builder
//!
//! A `Message` is an immutable payload plus an insertion-ordered header map.
//! Headers are never mutated in place; every modification goes through a
//! `MessageBuilder` and produces a new `Message` with a fresh `id` and
//! `timestamp`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use uuid::Uuid;

use crate::traits::MessageTarget;

/// Well-known header names.
pub mod header {
    /// Unique message id, assigned at build time. Never settable.
    pub const ID: &str = "id";
    /// RFC 3339 creation timestamp, assigned at build time. Never settable.
    pub const TIMESTAMP: &str = "timestamp";
    /// Links a reply back to its originating request.
    pub const CORRELATION_ID: &str = "correlation_id";
    /// Where the reply to this message should go, a channel name or a
    /// direct target reference.
    pub const RETURN_ADDRESS: &str = "return_address";
    /// Ordering hint consumed by priority channels. Higher first.
    pub const PRIORITY: &str = "priority";
}

/// A single header value.
///
/// Most headers are plain JSON values. The `return_address` header may also
/// carry a live target reference set by the original sender, so that replies
/// can be routed without a registry lookup.
#[derive(Clone)]
pub enum HeaderValue {
    Json(serde_json::Value),
    Target(Arc<dyn MessageTarget>),
}

impl HeaderValue {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            HeaderValue::Json(value) => Some(value),
            HeaderValue::Target(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(|value| value.as_str())
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(|value| value.as_i64())
    }

    pub fn as_target(&self) -> Option<Arc<dyn MessageTarget>> {
        match self {
            HeaderValue::Json(_) => None,
            HeaderValue::Target(target) => Some(target.clone()),
        }
    }
}

impl fmt::Debug for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Json(value) => write!(f, "{value}"),
            HeaderValue::Target(target) => write!(f, "<target {}>", target.name()),
        }
    }
}

impl PartialEq for HeaderValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HeaderValue::Json(a), HeaderValue::Json(b)) => a == b,
            (HeaderValue::Target(a), HeaderValue::Target(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            _ => false,
        }
    }
}

impl From<serde_json::Value> for HeaderValue {
    fn from(value: serde_json::Value) -> Self {
        HeaderValue::Json(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Json(serde_json::Value::String(value.to_string()))
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Json(serde_json::Value::String(value))
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Json(serde_json::Value::from(value))
    }
}

impl From<Uuid> for HeaderValue {
    fn from(value: Uuid) -> Self {
        HeaderValue::Json(serde_json::Value::String(value.to_string()))
    }
}

impl From<Arc<dyn MessageTarget>> for HeaderValue {
    fn from(target: Arc<dyn MessageTarget>) -> Self {
        HeaderValue::Target(target)
    }
}

/// Insertion-ordered, read-only header map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageHeaders {
    inner: IndexMap<String, HeaderValue>,
}

impl MessageHeaders {
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.inner.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The message id. Present on every built message.
    pub fn id(&self) -> Uuid {
        self.get(header::ID)
            .and_then(HeaderValue::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .unwrap_or_else(Uuid::nil)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.get(header::TIMESTAMP)
            .and_then(HeaderValue::as_str)
            .and_then(|raw| raw.parse().ok())
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.get(header::CORRELATION_ID)
            .and_then(HeaderValue::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    pub fn return_address(&self) -> Option<&HeaderValue> {
        self.get(header::RETURN_ADDRESS)
    }

    pub fn priority(&self) -> Option<i64> {
        self.get(header::PRIORITY).and_then(HeaderValue::as_i64)
    }
}

/// Immutable message envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    payload: serde_json::Value,
    headers: MessageHeaders,
}

impl Message {
    /// Build a message with the given payload and no custom headers.
    pub fn new(payload: impl Into<serde_json::Value>) -> Self {
        MessageBuilder::with_payload(payload).build()
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    pub fn id(&self) -> Uuid {
        self.headers.id()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message {}", self.id())
    }
}

/// Copy-on-write builder for `Message`.
///
/// `build()` always assigns a fresh `id` and `timestamp`; attempts to set
/// either through `set_header` are ignored.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    payload: serde_json::Value,
    headers: IndexMap<String, HeaderValue>,
}

impl MessageBuilder {
    pub fn with_payload(payload: impl Into<serde_json::Value>) -> Self {
        Self {
            payload: payload.into(),
            headers: IndexMap::new(),
        }
    }

    /// Start from an existing message, carrying its payload and headers.
    /// The source's `id` and `timestamp` are not carried; the built message
    /// gets its own.
    pub fn from_message(message: &Message) -> Self {
        let mut headers = IndexMap::new();
        for (name, value) in message.headers().iter() {
            if name == header::ID || name == header::TIMESTAMP {
                continue;
            }
            headers.insert(name.to_string(), value.clone());
        }
        Self {
            payload: message.payload().clone(),
            headers,
        }
    }

    pub fn payload(mut self, payload: impl Into<serde_json::Value>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn set_header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        let name = name.into();
        if name == header::ID || name == header::TIMESTAMP {
            tracing::debug!(header = %name, "ignoring attempt to set a build-time header");
            return self;
        }
        self.headers.insert(name, value.into());
        self
    }

    pub fn set_header_if_absent(
        self,
        name: impl Into<String>,
        value: impl Into<HeaderValue>,
    ) -> Self {
        let name = name.into();
        if self.headers.contains_key(&name) {
            return self;
        }
        self.set_header(name, value)
    }

    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers.shift_remove(name);
        self
    }

    /// Copy every header from `other` that is absent here. `id` and
    /// `timestamp` are never copied.
    pub fn copy_headers_if_absent(mut self, other: &MessageHeaders) -> Self {
        for (name, value) in other.iter() {
            if name == header::ID || name == header::TIMESTAMP {
                continue;
            }
            if !self.headers.contains_key(name) {
                self.headers.insert(name.to_string(), value.clone());
            }
        }
        self
    }

    pub fn set_correlation_id(self, id: Uuid) -> Self {
        self.set_header(header::CORRELATION_ID, id)
    }

    /// Name a reply destination for this message, resolved through the
    /// channel registry when a reply is produced.
    pub fn set_return_address(self, name: impl Into<String>) -> Self {
        self.set_header(header::RETURN_ADDRESS, name.into())
    }

    /// Attach a live reply destination, bypassing registry resolution.
    pub fn set_return_address_target(self, target: Arc<dyn MessageTarget>) -> Self {
        self.set_header(header::RETURN_ADDRESS, HeaderValue::Target(target))
    }

    pub fn set_priority(self, priority: i64) -> Self {
        self.set_header(header::PRIORITY, priority)
    }

    pub fn build(self) -> Message {
        let mut headers = IndexMap::with_capacity(self.headers.len() + 2);
        headers.insert(header::ID.to_string(), HeaderValue::from(Uuid::new_v4()));
        headers.insert(
            header::TIMESTAMP.to_string(),
            HeaderValue::from(Utc::now().to_rfc3339()),
        );
        headers.extend(self.headers);
        Message {
            payload: self.payload,
            headers: MessageHeaders { inner: headers },
        }
    }
}
