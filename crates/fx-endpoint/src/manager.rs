//! EndpointManager - registration and startup coordination
//!
//! Owns the endpoints of a runtime, starts them according to their startup
//! mode, and stops everything on shutdown. `initialize()` starts the
//! on-init endpoints; `signal_ready()` is the later system-ready event that
//! starts the on-context-event ones. Both phases latch, so an endpoint
//! registered after its phase has passed starts immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info};

use fx_common::{MessagingError, Result};

use crate::endpoint::{Endpoint, StartupMode};

#[derive(Default)]
pub struct EndpointManager {
    endpoints: DashMap<String, Arc<Endpoint>>,
    initialized: AtomicBool,
    ready: AtomicBool,
}

impl EndpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint under its name. Duplicate names are a
    /// configuration error.
    pub fn register(&self, endpoint: Arc<Endpoint>) -> Result<()> {
        let name = endpoint.name().to_string();
        if self.endpoints.contains_key(&name) {
            return Err(MessagingError::Configuration(format!(
                "endpoint '{name}' is already registered"
            )));
        }
        let start_now = match endpoint.startup_mode() {
            StartupMode::Manual => false,
            StartupMode::OnInit => self.initialized.load(Ordering::SeqCst),
            StartupMode::OnContextEvent => self.ready.load(Ordering::SeqCst),
        };
        self.endpoints.insert(name, endpoint.clone());
        if start_now {
            endpoint.start()?;
        }
        Ok(())
    }

    /// Start every on-init endpoint. Returns the first start failure after
    /// attempting all of them.
    pub fn initialize(&self) -> Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        info!(endpoints = self.endpoints.len(), "initializing endpoints");
        self.start_matching(StartupMode::OnInit)
    }

    /// The system-ready signal: start every on-context-event endpoint.
    pub fn signal_ready(&self) -> Result<()> {
        self.ready.store(true, Ordering::SeqCst);
        self.start_matching(StartupMode::OnContextEvent)
    }

    fn start_matching(&self, mode: StartupMode) -> Result<()> {
        let mut first_error = None;
        for entry in self.endpoints.iter() {
            let endpoint = entry.value();
            if endpoint.startup_mode() != mode {
                continue;
            }
            if let Err(e) = endpoint.start() {
                error!(endpoint = %endpoint.name(), error = %e, "failed to start endpoint");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Start one endpoint by name. Returns false for an unknown name.
    pub fn start(&self, name: &str) -> Result<bool> {
        match self.endpoints.get(name) {
            Some(entry) => {
                entry.value().start()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop one endpoint by name. Returns false for an unknown name.
    pub fn stop(&self, name: &str) -> bool {
        match self.endpoints.get(name) {
            Some(entry) => {
                entry.value().stop();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        info!(endpoints = self.endpoints.len(), "stopping all endpoints");
        for entry in self.endpoints.iter() {
            entry.value().stop();
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.endpoints
            .get(name)
            .map(|entry| entry.value().is_running())
            .unwrap_or(false)
    }

    pub fn endpoint(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.get(name).map(|entry| entry.value().clone())
    }

    pub fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
