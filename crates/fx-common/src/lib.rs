//! FluxGate shared types
//!
//! This crate provides the types every other FluxGate crate builds on:
//! - Message: immutable envelope with payload and ordered headers
//! - MessageBuilder: copy-on-write construction and header mutation
//! - MessagingError: the error taxonomy for the routing core
//! - Capability traits: MessageTarget, PollableSource, ErrorHandler

pub mod error;
pub mod message;
pub mod traits;

pub use error::MessagingError;
pub use message::{header, HeaderValue, Message, MessageBuilder, MessageHeaders};
pub use traits::{ErrorHandler, MessageTarget, PollableSource};

pub type Result<T> = std::result::Result<T, MessagingError>;
