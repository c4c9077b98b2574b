//! FluxGate Development Harness
//!
//! All-in-one binary for local development:
//! - Builds channels and endpoints from a TOML config (or an embedded default)
//! - Attaches demo handlers (uppercase transformer and a logging sink)
//! - Drives the endpoint lifecycle through the manager
//! - Generates periodic demo traffic until ctrl-c

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use fx_channel::{
    ChannelRegistry, DirectChannel, PriorityChannel, PublishSubscribeChannel, QueueChannel,
    SubscribableChannel,
};
use fx_common::{Message, MessageTarget, PollableSource};
use fx_config::{ChannelDef, ChannelKind, EndpointDef, RuntimeConfig, StartupDef};
use fx_endpoint::{
    handler_fn, Endpoint, EndpointManager, Isolation, MessageHandler, PollerConfig, Propagation,
    Reply, StartupMode, TokioScheduler, Transaction, TransactionManager, TransactionPolicy,
    Trigger, WorkerPool,
};

const DEFAULT_CONFIG: &str = r#"
[[channels]]
name = "inbound"
kind = "queue"

[[channels]]
name = "processed"
kind = "queue"

[[endpoints]]
name = "transform"
input_channel = "inbound"
output_channel = "processed"
startup = "on_init"

[endpoints.poller]
max_messages_per_poll = -1
receive_timeout_ms = 250
period_ms = 200

[[endpoints]]
name = "sink"
input_channel = "processed"
startup = "on_context_event"

[endpoints.poller]
max_messages_per_poll = -1
receive_timeout_ms = 250
period_ms = 200
"#;

/// FluxGate Development Harness
#[derive(Parser, Debug)]
#[command(name = "fx-dev")]
#[command(about = "FluxGate development harness - run an in-memory message flow")]
struct Args {
    /// Path to a TOML runtime config; the embedded demo config is used when
    /// omitted
    #[arg(long, env = "FLUXGATE_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Generate periodic demo traffic into the first queue channel
    #[arg(long, env = "FLUXGATE_DEMO_TRAFFIC", default_value = "true")]
    demo_traffic: bool,

    /// Demo traffic interval in milliseconds
    #[arg(long, env = "FLUXGATE_TRAFFIC_INTERVAL_MS", default_value = "1000")]
    traffic_interval_ms: u64,
}

/// Transaction manager that only logs scope boundaries. Stands in for a real
/// transactional resource during local development.
struct LoggingTransactionManager;

struct LoggingTransaction;

#[async_trait]
impl Transaction for LoggingTransaction {
    async fn commit(self: Box<Self>) -> fx_common::Result<()> {
        debug!("transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> fx_common::Result<()> {
        debug!("transaction rolled back");
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for LoggingTransactionManager {
    async fn begin(&self, policy: &TransactionPolicy) -> fx_common::Result<Box<dyn Transaction>> {
        debug!(?policy, "transaction begun");
        Ok(Box::new(LoggingTransaction))
    }
}

enum BuiltChannel {
    Queue(Arc<QueueChannel>),
    Priority(Arc<PriorityChannel>),
    Direct(Arc<DirectChannel>),
    Pubsub(Arc<PublishSubscribeChannel>),
}

impl BuiltChannel {
    fn as_target(&self) -> Arc<dyn MessageTarget> {
        match self {
            BuiltChannel::Queue(c) => c.clone(),
            BuiltChannel::Priority(c) => c.clone(),
            BuiltChannel::Direct(c) => c.clone(),
            BuiltChannel::Pubsub(c) => c.clone(),
        }
    }

    fn as_pollable(&self) -> Option<Arc<dyn PollableSource>> {
        match self {
            BuiltChannel::Queue(c) => Some(c.clone()),
            BuiltChannel::Priority(c) => Some(c.clone()),
            _ => None,
        }
    }

    fn as_subscribable(&self) -> Option<Arc<dyn SubscribableChannel>> {
        match self {
            BuiltChannel::Direct(c) => Some(c.clone()),
            BuiltChannel::Pubsub(c) => Some(c.clone()),
            _ => None,
        }
    }
}

fn build_channel(def: &ChannelDef) -> BuiltChannel {
    match def.kind {
        ChannelKind::Queue => {
            BuiltChannel::Queue(Arc::new(QueueChannel::new(def.name.clone(), def.capacity)))
        }
        ChannelKind::Priority => BuiltChannel::Priority(Arc::new(PriorityChannel::new(
            def.name.clone(),
            def.capacity,
        ))),
        ChannelKind::Direct => BuiltChannel::Direct(Arc::new(DirectChannel::new(def.name.clone()))),
        ChannelKind::Pubsub => {
            BuiltChannel::Pubsub(Arc::new(PublishSubscribeChannel::new(def.name.clone())))
        }
    }
}

fn startup_mode(def: StartupDef) -> StartupMode {
    match def {
        StartupDef::Manual => StartupMode::Manual,
        StartupDef::OnInit => StartupMode::OnInit,
        StartupDef::OnContextEvent => StartupMode::OnContextEvent,
    }
}

fn transaction_policy(def: &fx_config::TransactionDef) -> TransactionPolicy {
    TransactionPolicy {
        propagation: match def.propagation {
            fx_config::PropagationDef::Required => Propagation::Required,
            fx_config::PropagationDef::RequiresNew => Propagation::RequiresNew,
            fx_config::PropagationDef::Supports => Propagation::Supports,
            fx_config::PropagationDef::NotSupported => Propagation::NotSupported,
        },
        isolation: match def.isolation {
            fx_config::IsolationDef::Default => Isolation::Default,
            fx_config::IsolationDef::ReadCommitted => Isolation::ReadCommitted,
            fx_config::IsolationDef::RepeatableRead => Isolation::RepeatableRead,
            fx_config::IsolationDef::Serializable => Isolation::Serializable,
        },
        timeout: def.timeout_ms.map(Duration::from_millis),
        read_only: def.read_only,
    }
}

/// Demo handler for an endpoint name. The transformer uppercases string
/// payloads; everything else logs and consumes.
fn demo_handler(endpoint_name: &str) -> Arc<dyn MessageHandler> {
    match endpoint_name {
        "transform" => Arc::new(handler_fn(|request: Message| async move {
            let reply = match request.payload().as_str() {
                Some(text) => Reply::payload(text.to_uppercase()),
                None => Reply::payload(request.payload().clone()),
            };
            Ok(reply)
        })),
        _ => Arc::new(handler_fn(|request: Message| async move {
            info!(
                message_id = %request.id(),
                correlation_id = ?request.headers().correlation_id(),
                payload = %request.payload(),
                "message consumed"
            );
            Ok(Reply::none())
        })),
    }
}

fn build_endpoint(
    def: &EndpointDef,
    channels: &HashMap<String, BuiltChannel>,
    registry: &Arc<ChannelRegistry>,
    scheduler: &Arc<TokioScheduler>,
) -> Result<Arc<Endpoint>> {
    let input = channels
        .get(&def.input_channel)
        .with_context(|| format!("unknown input channel '{}'", def.input_channel))?;

    let mut builder = Endpoint::builder(def.name.clone())
        .startup_mode(startup_mode(def.startup))
        .registry(registry.clone())
        .requires_reply(def.requires_reply)
        .split_composite(def.split_composite)
        .handler(demo_handler(&def.name));

    if let Some(output) = &def.output_channel {
        builder = builder.output_channel_name(output.clone());
    }

    if let Some(source) = input.as_pollable() {
        let poller = def.poller.clone().unwrap_or_default();
        let trigger = Trigger {
            initial_delay: Duration::from_millis(poller.initial_delay_ms),
            period: Duration::from_millis(poller.period_ms),
            fixed_rate: poller.fixed_rate,
        };
        let receive_timeout = if poller.receive_timeout_ms < 0 {
            None
        } else {
            Some(Duration::from_millis(poller.receive_timeout_ms as u64))
        };
        builder = builder
            .poll_source(source, scheduler.clone(), trigger)
            .poller_config(PollerConfig {
                max_messages_per_poll: poller.max_messages_per_poll,
                receive_timeout,
                send_timeout: None,
            });
        if let Some(concurrency) = poller.worker_concurrency {
            builder = builder.worker_pool(Arc::new(WorkerPool::new(
                format!("{}.pool", def.name),
                concurrency,
            )));
        }
        if let Some(transaction) = &def.transaction {
            builder = builder.transactional(
                Arc::new(LoggingTransactionManager),
                transaction_policy(transaction),
            );
        }
    } else if let Some(channel) = input.as_subscribable() {
        builder = builder.input_channel(channel);
    } else {
        bail!("channel '{}' supports neither polling nor subscription", def.input_channel);
    }

    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting FluxGate Dev Harness");

    // 1. Load configuration
    let config = match &args.config {
        Some(path) => RuntimeConfig::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RuntimeConfig::from_toml_str(DEFAULT_CONFIG)?,
    };
    info!(
        channels = config.channels.len(),
        endpoints = config.endpoints.len(),
        "configuration loaded"
    );

    // 2. Build channels and the registry
    let registry = Arc::new(ChannelRegistry::new());
    let mut channels = HashMap::new();
    for def in &config.channels {
        let channel = build_channel(def);
        registry.register(channel.as_target());
        channels.insert(def.name.clone(), channel);
    }

    // 3. Build and register endpoints
    let scheduler = Arc::new(TokioScheduler::new());
    let manager = Arc::new(EndpointManager::new());
    for def in &config.endpoints {
        let endpoint = build_endpoint(def, &channels, &registry, &scheduler)?;
        manager.register(endpoint)?;
    }

    // 4. Start the flow
    manager.initialize()?;
    manager.signal_ready()?;
    info!(endpoints = ?manager.endpoint_names(), "flow running");

    // 5. Demo traffic into the first pollable channel
    if args.demo_traffic {
        let entry = config
            .channels
            .iter()
            .find(|def| def.kind.is_pollable())
            .and_then(|def| channels.get(&def.name).map(|c| c.as_target()));
        if let Some(target) = entry {
            let interval = Duration::from_millis(args.traffic_interval_ms.max(10));
            tokio::spawn(async move {
                let mut n: u64 = 0;
                loop {
                    n += 1;
                    let message = Message::new(format!("demo message {n}"));
                    if let Err(e) = target.send(message, Some(Duration::from_secs(1))).await {
                        tracing::warn!(error = %e, "demo traffic send failed");
                    }
                    tokio::time::sleep(interval).await;
                }
            });
            info!(interval_ms = args.traffic_interval_ms, "demo traffic enabled");
        }
    }

    // 6. Run until ctrl-c
    signal::ctrl_c().await?;
    info!("shutting down");
    manager.stop_all();

    Ok(())
}
