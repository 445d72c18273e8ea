//! Pipeline components
//!
//! A component is one step of a hook's chain: a validator that rejects
//! forged or replayed deliveries, a filter, or an action with a side
//! effect. Each component type owns a private partition of the store
//! (see [`crate::store::Partition`]) holding its per-hook configuration
//! and any state it accumulates.

pub mod email;
pub mod execute;
pub mod forward;
pub mod github;
pub mod log;
pub mod mailgun;
pub mod rate_limit;
pub mod registry;
pub mod template;
pub mod write_file;

pub use registry::{ComponentInfo, ComponentRegistry};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::hooks::{Hook, Request};
use crate::store::{Partition, StorageError};

/// Configuration parameters as submitted by an operator.
pub type Params = BTreeMap<String, String>;

/// A component rejected its configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, ConfigError::Storage(_))
    }
}

/// A component failed to process a delivery. Any variant halts the chain.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The delivery itself was refused (bad signature, replay, over limit).
    #[error("{0}")]
    Rejected(String),

    /// A required configuration field is absent.
    #[error("{0} not initialized")]
    NotConfigured(&'static str),

    /// A downstream service failed or answered with an error status.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ProcessError {
    pub fn rejected(message: impl Into<String>) -> Self {
        ProcessError::Rejected(message.into())
    }

    /// Infrastructure faults are logged separately from rejections.
    pub fn is_storage(&self) -> bool {
        matches!(self, ProcessError::Storage(_))
    }
}

/// A pluggable pipeline step.
///
/// Implementations are stateless apart from what they keep in the
/// partition they are handed; the same instance serves every hook.
#[async_trait]
pub trait Component: Send + Sync {
    /// Human-readable name.
    fn display_name(&self) -> &str;

    /// Identifier of the configuration form, or `None` when the component
    /// takes no configuration.
    fn config_template(&self) -> Option<&str>;

    /// Names of the persisted configuration fields.
    fn config_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether `process` writes to the partition.
    fn writes_state(&self) -> bool {
        false
    }

    /// Current configuration. Missing or unreadable fields come back empty.
    async fn current_params(&self, _hook: &Hook, partition: &Partition<'_>) -> Params {
        let mut params = Params::new();
        for field in self.config_fields() {
            params.insert(field.to_string(), partition.field_or_empty(field).await);
        }
        params
    }

    /// Validate and persist configuration. Calling it again overwrites.
    async fn init(
        &self,
        hook: &Hook,
        params: &Params,
        partition: &Partition<'_>,
    ) -> Result<(), ConfigError>;

    /// Handle one delivery.
    async fn process(
        &self,
        hook: &Hook,
        request: &Request,
        partition: &Partition<'_>,
    ) -> Result<(), ProcessError>;
}

/// Runtime settings shared by the built-in components.
#[derive(Debug, Clone)]
pub struct ComponentSettings {
    pub forward_timeout: Duration,
    pub email_timeout: Duration,
    pub execute_timeout: Duration,
    /// Mailgun API origin, without the version path
    pub mailgun_api_base: String,
    /// Directory for write-file artifacts
    pub artifact_dir: PathBuf,
    /// User-Agent sent on outbound requests
    pub user_agent: String,
}

pub const DEFAULT_USER_AGENT: &str = concat!("hookrelay/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_MAILGUN_API_BASE: &str = "https://api.mailgun.net";

impl Default for ComponentSettings {
    fn default() -> Self {
        Self {
            forward_timeout: Duration::from_secs(30),
            email_timeout: Duration::from_secs(30),
            execute_timeout: Duration::from_secs(60),
            mailgun_api_base: DEFAULT_MAILGUN_API_BASE.to_string(),
            artifact_dir: PathBuf::from("log"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Read a required parameter, trimmed.
pub(crate) fn required_param<'a>(
    params: &'a Params,
    field: &'static str,
) -> Result<&'a str, ConfigError> {
    match params.get(field).map(|v| v.trim()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(field)),
    }
}

/// Read a required field from the partition.
pub(crate) async fn required_field(
    partition: &Partition<'_>,
    field: &'static str,
) -> Result<String, ProcessError> {
    match partition.field(field).await? {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ProcessError::NotConfigured(field)),
    }
}
