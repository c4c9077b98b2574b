//! Endpoint - lifecycle-managed host for a handler
//!
//! An endpoint composes an input (a subscribable channel, or a pollable
//! source plus a scheduler), an invocation pipeline, and a reply resolver
//! behind a uniform start/stop/is_running lifecycle. The lifecycle flag and
//! one-time initialization are guarded by a single mutex; start and stop
//! never block on message I/O.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use fx_channel::{ChannelRegistry, SubscribableChannel};
use fx_common::{ErrorHandler, Message, MessageTarget, MessagingError, PollableSource, Result};

use crate::handler::MessageHandler;
use crate::interceptor::{EndpointInterceptor, InterceptorChain};
use crate::poller::{Poller, PollerConfig};
use crate::reply::{Reply, ReplyResolver, TargetRef};
use crate::scheduler::{ScheduleHandle, Scheduler, Trigger};
use crate::selector::MessageSelector;
use crate::transaction::{TransactionManager, TransactionPolicy};
use crate::workers::WorkerPool;

/// When an endpoint is started relative to wiring. Exactly one mode is
/// active per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Started only by an explicit `start()` call.
    Manual,
    /// Started as soon as the owning manager initializes.
    OnInit,
    /// Started on the later system-ready signal.
    OnContextEvent,
}

/// The consumer side of an endpoint: validation, interceptors, selector,
/// handler invocation, and reply resolution. Implements `MessageTarget` so
/// it can subscribe to channels and receive from dispatchers and pollers.
pub struct InvocationPipeline {
    name: String,
    handler: Arc<dyn MessageHandler>,
    selector: Option<Arc<dyn MessageSelector>>,
    interceptors: InterceptorChain,
    resolver: ReplyResolver,
    requires_reply: bool,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl InvocationPipeline {
    async fn invoke(&self, request: Message) -> Result<bool> {
        if request.payload().is_null() {
            return Err(MessagingError::Validation(
                "message payload must not be null".to_string(),
            ));
        }
        let request = match self.interceptors.apply_pre(request) {
            Some(message) => message,
            None => {
                debug!(endpoint = %self.name, "exchange vetoed by interceptor");
                return Ok(true);
            }
        };
        if let Some(selector) = &self.selector {
            if !selector.accept(&request) {
                debug!(
                    endpoint = %self.name,
                    message_id = %request.id(),
                    "message rejected by selector"
                );
                if let Some(handler) = &self.error_handler {
                    handler.handle(MessagingError::Rejected {
                        message: Box::new(request),
                    });
                }
                return Ok(false);
            }
        }
        let reply = match self.handler.handle(request.clone()).await {
            Ok(reply) => reply,
            Err(error) => return Err(MessagingError::handling(request, error.to_string())),
        };
        self.process_reply(reply, request).await
    }

    async fn process_reply(&self, reply: Reply, request: Message) -> Result<bool> {
        if reply.is_empty() {
            if self.requires_reply {
                return Err(MessagingError::handling(
                    request,
                    "handler produced no reply but one is required",
                ));
            }
            return Ok(true);
        }
        let (body, override_target) = reply.into_parts();
        let replies = self.resolver.build_replies(body, &request);
        let mut outgoing: Vec<Message> = replies
            .into_iter()
            .filter_map(|reply| self.interceptors.apply_post(reply))
            .collect();
        if outgoing.is_empty() {
            debug!(endpoint = %self.name, "all replies suppressed on the reply path");
            return Ok(true);
        }
        let target = match self.resolver.resolve_target(override_target.as_ref(), &request) {
            Some(target) => target,
            None => {
                let first = outgoing.swap_remove(0);
                return Err(MessagingError::reply_resolution(first, request));
            }
        };
        // Sends are tracked independently; the invocation succeeds when at
        // least one reply was delivered.
        let mut any_sent = false;
        let mut first_error = None;
        for reply in outgoing {
            match self.resolver.send_reply(&target, reply).await {
                Ok(()) => any_sent = true,
                Err(error) => match &self.error_handler {
                    Some(handler) => handler.handle(error),
                    None => {
                        warn!(endpoint = %self.name, error = %error, "reply send failed");
                        if first_error.is_none() {
                            first_error = Some(error);
                        }
                    }
                },
            }
        }
        if any_sent {
            Ok(true)
        } else if let Some(error) = first_error {
            Err(error)
        } else {
            Ok(false)
        }
    }
}

#[async_trait]
impl MessageTarget for InvocationPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    // The timeout parameter is not applied here; handler execution is
    // unbounded and reply sends use the resolver's configured send timeout.
    async fn send(&self, message: Message, _timeout: Option<Duration>) -> Result<bool> {
        match self.invoke(message).await {
            Ok(outcome) => Ok(outcome),
            Err(error @ MessagingError::Validation(_)) => Err(error),
            Err(error) => match &self.error_handler {
                Some(handler) => {
                    handler.handle(error);
                    Ok(false)
                }
                None => {
                    warn!(endpoint = %self.name, error = %error, "endpoint invocation failed");
                    Err(error)
                }
            },
        }
    }
}

enum EndpointInput {
    Subscribed(Arc<dyn SubscribableChannel>),
    Polled {
        poller: Arc<Poller>,
        scheduler: Arc<dyn Scheduler>,
        trigger: Trigger,
    },
}

struct LifecycleState {
    running: bool,
    initialized: bool,
}

/// Lifecycle-managed unit hosting a handler within the message flow.
pub struct Endpoint {
    name: String,
    startup: StartupMode,
    input: EndpointInput,
    pipeline: Arc<InvocationPipeline>,
    state: Mutex<LifecycleState>,
    schedule: Mutex<Option<ScheduleHandle>>,
}

impl Endpoint {
    pub fn builder(name: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn startup_mode(&self) -> StartupMode {
        self.startup
    }

    /// The endpoint's consumer seam, for submitting messages directly.
    pub fn as_target(&self) -> Arc<dyn MessageTarget> {
        self.pipeline.clone()
    }

    /// Append an interceptor. Safe to call while the endpoint is running;
    /// in-flight exchanges keep the chain they started with.
    pub fn add_interceptor(&self, interceptor: Arc<dyn EndpointInterceptor>) {
        self.pipeline.interceptors.add(interceptor);
    }

    /// Transition to running. A no-op when already running. Performs lazy
    /// one-time initialization first; an initialization failure is fatal and
    /// leaves the endpoint stopped.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.running {
            debug!(endpoint = %self.name, "start ignored, already running");
            return Ok(());
        }
        if !state.initialized {
            self.initialize()?;
            state.initialized = true;
        }
        match &self.input {
            EndpointInput::Subscribed(channel) => {
                channel.subscribe(self.pipeline.clone());
            }
            EndpointInput::Polled {
                poller,
                scheduler,
                trigger,
            } => {
                let handle = scheduler.schedule(poller.clone(), trigger.clone());
                *self.schedule.lock() = Some(handle);
            }
        }
        state.running = true;
        info!(endpoint = %self.name, "endpoint started");
        Ok(())
    }

    /// Transition to stopped. A no-op when already stopped. Cancelling the
    /// poll schedule requests interruption of an in-flight poll but does not
    /// wait for it.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.running {
            debug!(endpoint = %self.name, "stop ignored, already stopped");
            return;
        }
        match &self.input {
            EndpointInput::Subscribed(channel) => {
                let consumer: Arc<dyn MessageTarget> = self.pipeline.clone();
                channel.unsubscribe(&consumer);
            }
            EndpointInput::Polled { .. } => {
                if let Some(handle) = self.schedule.lock().take() {
                    handle.cancel(true);
                }
            }
        }
        state.running = false;
        info!(endpoint = %self.name, "endpoint stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn initialize(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MessagingError::Configuration(
                "endpoint name must not be empty".to_string(),
            ));
        }
        if let EndpointInput::Polled { poller, trigger, .. } = &self.input {
            poller.validate()?;
            if trigger.period.is_zero() {
                return Err(MessagingError::Configuration(format!(
                    "endpoint '{}' has a zero poll period",
                    self.name
                )));
            }
        }
        debug!(endpoint = %self.name, "endpoint initialized");
        Ok(())
    }
}

/// Assembles an endpoint from its collaborators.
pub struct EndpointBuilder {
    name: String,
    startup: StartupMode,
    input_channel: Option<Arc<dyn SubscribableChannel>>,
    poll_source: Option<(Arc<dyn PollableSource>, Arc<dyn Scheduler>, Trigger)>,
    poller_config: PollerConfig,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    transaction_policy: TransactionPolicy,
    worker_pool: Option<Arc<WorkerPool>>,
    handler: Option<Arc<dyn MessageHandler>>,
    output_target: Option<TargetRef>,
    registry: Option<Arc<ChannelRegistry>>,
    selector: Option<Arc<dyn MessageSelector>>,
    interceptors: Vec<Arc<dyn EndpointInterceptor>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    requires_reply: bool,
    split_composite: bool,
    send_timeout: Option<Duration>,
}

impl EndpointBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            startup: StartupMode::Manual,
            input_channel: None,
            poll_source: None,
            poller_config: PollerConfig::default(),
            transaction_manager: None,
            transaction_policy: TransactionPolicy::default(),
            worker_pool: None,
            handler: None,
            output_target: None,
            registry: None,
            selector: None,
            interceptors: Vec::new(),
            error_handler: None,
            requires_reply: false,
            split_composite: false,
            send_timeout: None,
        }
    }

    pub fn startup_mode(mut self, mode: StartupMode) -> Self {
        self.startup = mode;
        self
    }

    /// Consume from a push-based channel.
    pub fn input_channel(mut self, channel: Arc<dyn SubscribableChannel>) -> Self {
        self.input_channel = Some(channel);
        self
    }

    /// Consume by polling `source` on `trigger`, scheduled by `scheduler`.
    pub fn poll_source(
        mut self,
        source: Arc<dyn PollableSource>,
        scheduler: Arc<dyn Scheduler>,
        trigger: Trigger,
    ) -> Self {
        self.poll_source = Some((source, scheduler, trigger));
        self
    }

    pub fn poller_config(mut self, config: PollerConfig) -> Self {
        self.poller_config = config;
        self
    }

    /// Run each poll unit inside a transaction scope with the given policy.
    pub fn transactional(
        mut self,
        manager: Arc<dyn TransactionManager>,
        policy: TransactionPolicy,
    ) -> Self {
        self.transaction_manager = Some(manager);
        self.transaction_policy = policy;
        self
    }

    /// Hand whole poll invocations to `pool` instead of running them on the
    /// scheduler's task.
    pub fn worker_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.worker_pool = Some(pool);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Statically configured reply destination.
    pub fn output_channel(mut self, target: Arc<dyn MessageTarget>) -> Self {
        self.output_target = Some(TargetRef::direct(target));
        self
    }

    /// Statically configured reply destination by name, resolved through the
    /// registry at reply time.
    pub fn output_channel_name(mut self, name: impl Into<String>) -> Self {
        self.output_target = Some(TargetRef::named(name));
        self
    }

    pub fn registry(mut self, registry: Arc<ChannelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn selector(mut self, selector: Arc<dyn MessageSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn EndpointInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Fail the invocation when the handler produces no reply.
    pub fn requires_reply(mut self, requires: bool) -> Self {
        self.requires_reply = requires;
        self
    }

    /// Send composite results as independent replies instead of one
    /// array-payload reply.
    pub fn split_composite(mut self, split: bool) -> Self {
        self.split_composite = split;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Arc<Endpoint>> {
        let handler = self.handler.ok_or_else(|| {
            MessagingError::Configuration(format!("endpoint '{}' requires a handler", self.name))
        })?;
        if self.input_channel.is_some() && self.poll_source.is_some() {
            return Err(MessagingError::Configuration(format!(
                "endpoint '{}' cannot have both a subscribed and a polled input",
                self.name
            )));
        }
        if self.input_channel.is_some()
            && (self.transaction_manager.is_some() || self.worker_pool.is_some())
        {
            return Err(MessagingError::Configuration(format!(
                "endpoint '{}' polling options require a polled input",
                self.name
            )));
        }

        let mut resolver = ReplyResolver::new(self.name.clone())
            .with_split_composite(self.split_composite);
        if let Some(target) = self.output_target {
            resolver = resolver.with_output_target(target);
        }
        if let Some(registry) = self.registry {
            resolver = resolver.with_registry(registry);
        }
        if let Some(timeout) = self.send_timeout {
            resolver = resolver.with_send_timeout(timeout);
        }

        let pipeline = Arc::new(InvocationPipeline {
            name: self.name.clone(),
            handler,
            selector: self.selector,
            interceptors: InterceptorChain::from_vec(self.interceptors),
            resolver,
            requires_reply: self.requires_reply,
            error_handler: self.error_handler.clone(),
        });

        let input = if let Some(channel) = self.input_channel {
            EndpointInput::Subscribed(channel)
        } else if let Some((source, scheduler, trigger)) = self.poll_source {
            let mut poller = Poller::new(
                self.name.clone(),
                source,
                pipeline.clone() as Arc<dyn MessageTarget>,
                self.poller_config,
            );
            if let Some(manager) = self.transaction_manager {
                poller = poller.with_transaction(manager, self.transaction_policy);
            }
            if let Some(pool) = self.worker_pool {
                poller = poller.with_worker_pool(pool);
            }
            if let Some(handler) = self.error_handler {
                poller = poller.with_error_handler(handler);
            }
            EndpointInput::Polled {
                poller: Arc::new(poller),
                scheduler,
                trigger,
            }
        } else {
            return Err(MessagingError::Configuration(format!(
                "endpoint '{}' requires an input channel or a poll source",
                self.name
            )));
        };

        Ok(Arc::new(Endpoint {
            name: self.name,
            startup: self.startup,
            input,
            pipeline,
            state: Mutex::new(LifecycleState {
                running: false,
                initialized: false,
            }),
            schedule: Mutex::new(None),
        }))
    }
}
