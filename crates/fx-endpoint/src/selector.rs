//! Message selectors
//!
//! A selector gates messages before the handler runs. A declined message is
//! a recorded non-delivery, never a handling failure.

use fx_common::Message;

pub trait MessageSelector: Send + Sync {
    fn accept(&self, message: &Message) -> bool;
}

/// Adapter turning a plain closure into a selector.
pub struct FnSelector<F>(F);

pub fn selector_fn<F>(f: F) -> FnSelector<F>
where
    F: Fn(&Message) -> bool + Send + Sync,
{
    FnSelector(f)
}

impl<F> MessageSelector for FnSelector<F>
where
    F: Fn(&Message) -> bool + Send + Sync,
{
    fn accept(&self, message: &Message) -> bool {
        (self.0)(message)
    }
}
