//! Transaction SPI
//!
//! The poller wraps each poll unit in one transaction scope when a manager
//! is configured. There is no default manager; absence means units run
//! non-transactionally. Policy attributes are passed through to the manager
//! unchanged.

use std::time::Duration;

use async_trait::async_trait;

use fx_common::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Required,
    RequiresNew,
    Supports,
    NotSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    Default,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone)]
pub struct TransactionPolicy {
    pub propagation: Propagation,
    pub isolation: Isolation,
    pub timeout: Option<Duration>,
    pub read_only: bool,
}

impl Default for TransactionPolicy {
    fn default() -> Self {
        Self {
            propagation: Propagation::Required,
            isolation: Isolation::Default,
            timeout: None,
            read_only: false,
        }
    }
}

/// One open transaction scope. Consumed by either outcome.
#[async_trait]
pub trait Transaction: Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self, policy: &TransactionPolicy) -> Result<Box<dyn Transaction>>;
}
