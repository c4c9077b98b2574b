//! ChannelRegistry - destination lookup by name

use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use fx_common::MessageTarget;

/// Name-to-destination lookup, passed as an explicit collaborator to
/// whatever needs to resolve destination names.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: DashMap<String, Arc<dyn MessageTarget>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a destination under its own name. Replacing an existing
    /// registration is allowed but logged.
    pub fn register(&self, target: Arc<dyn MessageTarget>) {
        let name = target.name().to_string();
        if self.channels.insert(name.clone(), target).is_some() {
            warn!(channel = %name, "replaced existing registry entry");
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn MessageTarget>> {
        self.channels.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueChannel;

    #[test]
    fn resolve_returns_registered_channel() {
        let registry = ChannelRegistry::new();
        registry.register(Arc::new(QueueChannel::new("orders", None)));
        assert!(registry.resolve("orders").is_some());
        assert!(registry.resolve("missing").is_none());
    }
}
