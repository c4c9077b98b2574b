//! FluxGate endpoint core
//!
//! This crate turns handlers into lifecycle-managed participants of a
//! message flow graph:
//! - Endpoint: start/stop/is_running around a handler and its input channel
//! - Poller: scheduled, bounded, optionally transactional source draining
//! - ReplyResolver: destination resolution and reply construction
//! - InterceptorChain / MessageSelector: pre/post hooks and message gating
//! - TokioScheduler / WorkerPool: scheduling and bounded concurrency
//! - EndpointManager: registration and startup-mode coordination

pub mod endpoint;
pub mod handler;
pub mod interceptor;
pub mod manager;
pub mod poller;
pub mod reply;
pub mod scheduler;
pub mod selector;
pub mod transaction;
pub mod workers;

pub use endpoint::{Endpoint, EndpointBuilder, StartupMode};
pub use handler::{handler_fn, FnHandler, MessageHandler};
pub use interceptor::{EndpointInterceptor, InterceptorChain};
pub use manager::EndpointManager;
pub use poller::{Poller, PollerConfig};
pub use reply::{Reply, ReplyBody, ReplyResolver, TargetRef};
pub use scheduler::{ScheduleHandle, ScheduledTask, Scheduler, TokioScheduler, Trigger};
pub use selector::{selector_fn, FnSelector, MessageSelector};
pub use transaction::{Isolation, Propagation, Transaction, TransactionManager, TransactionPolicy};
pub use workers::WorkerPool;
