//! FluxGate configuration
//!
//! TOML-backed declaration of channels and endpoints. Handlers are code and
//! are attached at assembly time; this crate only describes the wiring and
//! validates it for internal consistency.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Pollable FIFO buffer.
    Queue,
    /// Pollable, ordered by the priority header.
    Priority,
    /// Push-based point-to-point channel.
    Direct,
    /// Push-based fan-out channel.
    Pubsub,
}

impl ChannelKind {
    pub fn is_pollable(self) -> bool {
        matches!(self, ChannelKind::Queue | ChannelKind::Priority)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDef {
    pub name: String,
    pub kind: ChannelKind,
    #[serde(default)]
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StartupDef {
    Manual,
    #[default]
    OnInit,
    OnContextEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PropagationDef {
    #[default]
    Required,
    RequiresNew,
    Supports,
    NotSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationDef {
    #[default]
    Default,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransactionDef {
    #[serde(default)]
    pub propagation: PropagationDef,
    #[serde(default)]
    pub isolation: IsolationDef,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerDef {
    /// Upper bound per invocation; negative means drain until empty.
    #[serde(default = "default_max_messages_per_poll")]
    pub max_messages_per_poll: i64,
    /// Per-unit receive timeout; negative means block indefinitely.
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: i64,
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    #[serde(default)]
    pub initial_delay_ms: u64,
    #[serde(default)]
    pub fixed_rate: bool,
    /// Hand invocations to a worker pool of this size instead of the
    /// scheduler's task.
    #[serde(default)]
    pub worker_concurrency: Option<usize>,
}

fn default_max_messages_per_poll() -> i64 {
    1
}

fn default_receive_timeout_ms() -> i64 {
    1000
}

fn default_period_ms() -> u64 {
    1000
}

impl Default for PollerDef {
    fn default() -> Self {
        Self {
            max_messages_per_poll: default_max_messages_per_poll(),
            receive_timeout_ms: default_receive_timeout_ms(),
            period_ms: default_period_ms(),
            initial_delay_ms: 0,
            fixed_rate: false,
            worker_concurrency: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDef {
    pub name: String,
    pub input_channel: String,
    #[serde(default)]
    pub output_channel: Option<String>,
    #[serde(default)]
    pub startup: StartupDef,
    #[serde(default)]
    pub requires_reply: bool,
    #[serde(default)]
    pub split_composite: bool,
    #[serde(default)]
    pub poller: Option<PollerDef>,
    #[serde(default)]
    pub transaction: Option<TransactionDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub channels: Vec<ChannelDef>,
    #[serde(default)]
    pub endpoints: Vec<EndpointDef>,
}

impl RuntimeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: RuntimeConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelDef> {
        self.channels.iter().find(|channel| channel.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        let mut channel_names = HashSet::new();
        for channel in &self.channels {
            if channel.name.trim().is_empty() {
                return Err(ConfigError::Invalid("channel with empty name".to_string()));
            }
            if !channel_names.insert(channel.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate channel name '{}'",
                    channel.name
                )));
            }
        }

        let mut endpoint_names = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(ConfigError::Invalid("endpoint with empty name".to_string()));
            }
            if !endpoint_names.insert(endpoint.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate endpoint name '{}'",
                    endpoint.name
                )));
            }
            let input = self.channel(&endpoint.input_channel).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "endpoint '{}' references unknown input channel '{}'",
                    endpoint.name, endpoint.input_channel
                ))
            })?;
            if let Some(output) = &endpoint.output_channel {
                if self.channel(output).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "endpoint '{}' references unknown output channel '{output}'",
                        endpoint.name
                    )));
                }
            }
            if input.kind.is_pollable() {
                let poller = endpoint.poller.as_ref().ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "endpoint '{}' consumes pollable channel '{}' and needs a [endpoints.poller] block",
                        endpoint.name, endpoint.input_channel
                    ))
                })?;
                if poller.period_ms == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "endpoint '{}' has a zero poll period",
                        endpoint.name
                    )));
                }
                if poller.max_messages_per_poll == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "endpoint '{}' has max_messages_per_poll of zero",
                        endpoint.name
                    )));
                }
            } else {
                if endpoint.poller.is_some() {
                    return Err(ConfigError::Invalid(format!(
                        "endpoint '{}' consumes push-based channel '{}' and cannot have a poller",
                        endpoint.name, endpoint.input_channel
                    )));
                }
                if endpoint.transaction.is_some() {
                    return Err(ConfigError::Invalid(format!(
                        "endpoint '{}' requires a pollable input for transactional consumption",
                        endpoint.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [[channels]]
        name = "inbound"
        kind = "queue"
        capacity = 100

        [[channels]]
        name = "outbound"
        kind = "direct"

        [[endpoints]]
        name = "mover"
        input_channel = "inbound"
        output_channel = "outbound"
        startup = "on_init"
        split_composite = true

        [endpoints.poller]
        max_messages_per_poll = -1
        receive_timeout_ms = 250
        period_ms = 50

        [endpoints.transaction]
        propagation = "requires_new"
        isolation = "read_committed"
        timeout_ms = 5000
    "#;

    #[test]
    fn sample_config_parses() {
        let config = RuntimeConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.endpoints.len(), 1);

        let endpoint = &config.endpoints[0];
        assert_eq!(endpoint.startup, StartupDef::OnInit);
        assert!(endpoint.split_composite);

        let poller = endpoint.poller.as_ref().unwrap();
        assert_eq!(poller.max_messages_per_poll, -1);
        assert_eq!(poller.period_ms, 50);

        let transaction = endpoint.transaction.as_ref().unwrap();
        assert_eq!(transaction.propagation, PropagationDef::RequiresNew);
        assert_eq!(transaction.isolation, IsolationDef::ReadCommitted);
        assert_eq!(transaction.timeout_ms, Some(5000));
    }

    #[test]
    fn unknown_input_channel_is_rejected() {
        let raw = r#"
            [[endpoints]]
            name = "orphan"
            input_channel = "missing"
        "#;
        let result = RuntimeConfig::from_toml_str(raw);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn duplicate_channel_names_are_rejected() {
        let raw = r#"
            [[channels]]
            name = "dup"
            kind = "queue"

            [[channels]]
            name = "dup"
            kind = "direct"
        "#;
        let result = RuntimeConfig::from_toml_str(raw);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn pollable_input_requires_a_poller_block() {
        let raw = r#"
            [[channels]]
            name = "inbound"
            kind = "queue"

            [[endpoints]]
            name = "mover"
            input_channel = "inbound"
        "#;
        let result = RuntimeConfig::from_toml_str(raw);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn push_input_rejects_a_poller_block() {
        let raw = r#"
            [[channels]]
            name = "inbound"
            kind = "direct"

            [[endpoints]]
            name = "mover"
            input_channel = "inbound"

            [endpoints.poller]
            period_ms = 100
        "#;
        let result = RuntimeConfig::from_toml_str(raw);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_poll_period_is_rejected() {
        let raw = r#"
            [[channels]]
            name = "inbound"
            kind = "queue"

            [[endpoints]]
            name = "mover"
            input_channel = "inbound"

            [endpoints.poller]
            period_ms = 0
        "#;
        let result = RuntimeConfig::from_toml_str(raw);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn loads_from_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = RuntimeConfig::from_path(file.path()).unwrap();
        assert_eq!(config.endpoints.len(), 1);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = RuntimeConfig::from_path("/nonexistent/fluxgate.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
