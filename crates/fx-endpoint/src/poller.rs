//! Poller - scheduled, bounded draining of a pollable source
//!
//! Each scheduler tick runs one invocation: a sequence of poll units, where
//! a unit receives one message and offers it to the target. The invocation
//! ends when the source reports empty or the per-invocation bound is
//! reached. With a transaction manager configured every unit runs in its own
//! transaction scope, so progress made by earlier units survives a later
//! unit's failure.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use fx_common::{ErrorHandler, MessageTarget, MessagingError, PollableSource, Result};

use crate::scheduler::ScheduledTask;
use crate::transaction::{TransactionManager, TransactionPolicy};
use crate::workers::WorkerPool;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Upper bound on poll units per invocation. Negative means unbounded:
    /// the invocation drains until the source reports empty.
    pub max_messages_per_poll: i64,
    /// Receive timeout per unit. `None` blocks indefinitely.
    pub receive_timeout: Option<std::time::Duration>,
    /// Timeout for offering a received message to the target.
    pub send_timeout: Option<std::time::Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_messages_per_poll: 1,
            receive_timeout: Some(std::time::Duration::from_millis(1000)),
            send_timeout: None,
        }
    }
}

/// Drains a pollable source into a target on each scheduler tick.
pub struct Poller {
    name: String,
    source: Arc<dyn PollableSource>,
    target: Arc<dyn MessageTarget>,
    config: PollerConfig,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    transaction_policy: TransactionPolicy,
    worker_pool: Option<Arc<WorkerPool>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl Poller {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn PollableSource>,
        target: Arc<dyn MessageTarget>,
        config: PollerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            target,
            config,
            transaction_manager: None,
            transaction_policy: TransactionPolicy::default(),
            worker_pool: None,
            error_handler: None,
        }
    }

    /// Run every poll unit inside its own transaction scope with the given
    /// policy.
    pub fn with_transaction(
        mut self,
        manager: Arc<dyn TransactionManager>,
        policy: TransactionPolicy,
    ) -> Self {
        self.transaction_manager = Some(manager);
        self.transaction_policy = policy;
        self
    }

    /// Submit whole invocations to `pool` instead of running them on the
    /// scheduler's task.
    pub fn with_worker_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.worker_pool = Some(pool);
        self
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn validate(&self) -> Result<()> {
        if self.config.max_messages_per_poll == 0 {
            return Err(MessagingError::Configuration(format!(
                "poller '{}' has max_messages_per_poll of zero",
                self.name
            )));
        }
        Ok(())
    }

    /// Run one invocation synchronously. Returns the number of units
    /// handled; the first unit failure aborts the rest of the invocation.
    pub async fn run_once(&self) -> Result<u64> {
        self.run_invocation().await
    }

    async fn run_invocation(&self) -> Result<u64> {
        let mut handled = 0u64;
        loop {
            if !self.poll_unit().await? {
                break;
            }
            handled += 1;
            let max = self.config.max_messages_per_poll;
            if max >= 0 && handled >= max as u64 {
                break;
            }
        }
        if handled > 0 {
            debug!(poller = %self.name, handled, "poll invocation complete");
        }
        Ok(handled)
    }

    async fn poll_unit(&self) -> Result<bool> {
        match &self.transaction_manager {
            None => self.receive_and_dispatch().await,
            Some(manager) => {
                let transaction = manager.begin(&self.transaction_policy).await?;
                match self.receive_and_dispatch().await {
                    Ok(handled) => {
                        transaction.commit().await?;
                        Ok(handled)
                    }
                    Err(unit_error) => {
                        if let Err(rollback_error) = transaction.rollback().await {
                            warn!(
                                poller = %self.name,
                                error = %rollback_error,
                                "rollback failed"
                            );
                        }
                        Err(unit_error)
                    }
                }
            }
        }
    }

    async fn receive_and_dispatch(&self) -> Result<bool> {
        let message = match self.source.receive(self.config.receive_timeout).await? {
            Some(message) => message,
            None => return Ok(false),
        };
        let accepted = self
            .target
            .send(message.clone(), self.config.send_timeout)
            .await?;
        if !accepted {
            return Err(MessagingError::delivery(message, self.target.name()));
        }
        Ok(true)
    }

    fn report_failure(&self, error: MessagingError) {
        match &self.error_handler {
            Some(handler) => handler.handle(error),
            None => error!(poller = %self.name, error = %error, "poll invocation failed"),
        }
    }
}

#[async_trait]
impl ScheduledTask for Poller {
    async fn run(self: Arc<Self>) {
        match &self.worker_pool {
            Some(pool) => {
                let poller = self.clone();
                pool.spawn(async move { poller.run_invocation().await.map(|_| ()) });
            }
            None => {
                if let Err(error) = self.run_invocation().await {
                    self.report_failure(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use fx_channel::QueueChannel;
    use fx_common::Message;

    struct Accepting {
        received: AtomicUsize,
    }

    impl Accepting {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MessageTarget for Accepting {
        fn name(&self) -> &str {
            "accepting"
        }

        async fn send(&self, _message: Message, _timeout: Option<Duration>) -> Result<bool> {
            self.received.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn short_timeout_config(max: i64) -> PollerConfig {
        PollerConfig {
            max_messages_per_poll: max,
            receive_timeout: Some(Duration::from_millis(10)),
            send_timeout: None,
        }
    }

    async fn fill(channel: &QueueChannel, count: usize) {
        for n in 0..count {
            channel.send(Message::new(n as i64), None).await.unwrap();
        }
    }

    #[tokio::test]
    async fn bounded_invocation_drains_at_most_the_configured_count() {
        let source = Arc::new(QueueChannel::new("source", None));
        fill(&source, 5).await;
        let target = Accepting::new();
        let poller = Poller::new("p", source.clone(), target.clone(), short_timeout_config(2));

        let handled = poller.run_once().await.unwrap();
        assert_eq!(handled, 2);
        assert_eq!(target.received.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unbounded_invocation_drains_until_empty() {
        let source = Arc::new(QueueChannel::new("source", None));
        fill(&source, 5).await;
        let target = Accepting::new();
        let poller = Poller::new("p", source.clone(), target.clone(), short_timeout_config(-1));

        let handled = poller.run_once().await.unwrap();
        assert_eq!(handled, 5);
    }

    #[tokio::test]
    async fn empty_source_handles_nothing() {
        let source = Arc::new(QueueChannel::new("source", None));
        let target = Accepting::new();
        let poller = Poller::new("p", source, target, short_timeout_config(-1));
        assert_eq!(poller.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn declined_dispatch_is_a_unit_failure() {
        struct Declining;

        #[async_trait]
        impl MessageTarget for Declining {
            fn name(&self) -> &str {
                "declining"
            }

            async fn send(&self, _message: Message, _timeout: Option<Duration>) -> Result<bool> {
                Ok(false)
            }
        }

        let source = Arc::new(QueueChannel::new("source", None));
        fill(&source, 1).await;
        let poller = Poller::new("p", source, Arc::new(Declining), short_timeout_config(-1));
        let result = poller.run_once().await;
        assert!(matches!(result, Err(MessagingError::Delivery { .. })));
    }

    #[test]
    fn zero_bound_fails_validation() {
        let source = Arc::new(QueueChannel::new("source", None));
        let poller = Poller::new(
            "p",
            source,
            Accepting::new(),
            PollerConfig {
                max_messages_per_poll: 0,
                ..PollerConfig::default()
            },
        );
        assert!(matches!(
            poller.validate(),
            Err(MessagingError::Configuration(_))
        ));
    }
}
