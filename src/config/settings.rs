//! Typed gateway configuration
//!
//! Every section and field is optional in the file; serde fills in the
//! defaults. [`GatewayConfig::validate`] checks cross-field constraints that
//! serde cannot express.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{state_dir, ConfigError};
use crate::components::{ComponentSettings, DEFAULT_MAILGUN_API_BASE, DEFAULT_USER_AGENT};
use crate::logging::{LogConfig, LogFormat, LogOutput};
use crate::pipeline::dispatch::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use crate::pipeline::DispatcherConfig;
use crate::server::http::{HttpConfig, DEFAULT_MAX_BODY_BYTES};
use crate::server::AdminConfig;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:9000";
pub const DEFAULT_ADMIN_LISTEN: &str = "127.0.0.1:9001";
pub const DEFAULT_STORE_FILE: &str = "hookrelay.db";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub ingress: IngressSettings,
    #[serde(default)]
    pub admin: AdminSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub components: ComponentsSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Ingress listen address
    pub listen: String,
    /// Admin API listen address
    pub admin_listen: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            admin_listen: DEFAULT_ADMIN_LISTEN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressSettings {
    pub max_body_bytes: usize,
}

impl Default for IngressSettings {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminSettings {
    pub enabled: bool,
    pub token: Option<String>,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Database file; defaults to `hookrelay.db` in the state directory
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: crate::store::DEFAULT_BUSY_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub delivery_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            delivery_timeout_secs: crate::pipeline::DEFAULT_DELIVERY_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComponentsSettings {
    pub forward_timeout_secs: u64,
    pub email_timeout_secs: u64,
    pub execute_timeout_secs: u64,
    pub mailgun_api_base: String,
    /// Write-file output directory; defaults to `log` in the state directory
    pub artifact_dir: Option<PathBuf>,
    pub user_agent: String,
}

impl Default for ComponentsSettings {
    fn default() -> Self {
        let defaults = ComponentSettings::default();
        Self {
            forward_timeout_secs: defaults.forward_timeout.as_secs(),
            email_timeout_secs: defaults.email_timeout.as_secs(),
            execute_timeout_secs: defaults.execute_timeout.as_secs(),
            mailgun_api_base: DEFAULT_MAILGUN_API_BASE.to_string(),
            artifact_dir: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `plaintext` or `json`
    pub format: String,
    pub level: String,
    /// Log file; stdout when unset
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: "plaintext".to_string(),
            level: "info".to_string(),
            file: None,
        }
    }
}

fn invalid(path: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        path: path.to_string(),
        message: message.into(),
    }
}

fn parse_addr(path: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|e| invalid(path, format!("invalid socket address {value:?}: {e}")))
}

impl GatewayConfig {
    /// Deserialize and validate a raw config value.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let config: GatewayConfig =
            serde_json::from_value(value).map_err(|e| invalid(".", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_addr(".gateway.listen", &self.gateway.listen)?;
        parse_addr(".gateway.adminListen", &self.gateway.admin_listen)?;

        if self.ingress.max_body_bytes == 0 {
            return Err(invalid(".ingress.maxBodyBytes", "must be positive"));
        }
        if self.pipeline.workers == 0 {
            return Err(invalid(".pipeline.workers", "must be at least 1"));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(invalid(".pipeline.queueCapacity", "must be at least 1"));
        }
        if self.pipeline.delivery_timeout_secs == 0 {
            return Err(invalid(".pipeline.deliveryTimeoutSecs", "must be positive"));
        }

        let timeouts = [
            (
                ".components.forwardTimeoutSecs",
                self.components.forward_timeout_secs,
            ),
            (
                ".components.emailTimeoutSecs",
                self.components.email_timeout_secs,
            ),
            (
                ".components.executeTimeoutSecs",
                self.components.execute_timeout_secs,
            ),
        ];
        for (path, secs) in timeouts {
            if secs == 0 {
                return Err(invalid(path, "must be positive"));
            }
        }

        match url::Url::parse(&self.components.mailgun_api_base) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            _ => {
                return Err(invalid(
                    ".components.mailgunApiBase",
                    "must be an http(s) URL",
                ))
            }
        }

        self.logging
            .format
            .parse::<LogFormat>()
            .map_err(|e| invalid(".logging.format", e))?;
        self.logging
            .level
            .parse::<tracing::Level>()
            .map_err(|e| invalid(".logging.level", e.to_string()))?;

        Ok(())
    }

    /// Apply `HOOKRELAY_ADMIN_TOKEN`, `HOOKRELAY_LISTEN` and
    /// `HOOKRELAY_ADMIN_LISTEN`, then re-validate.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(token) = std::env::var("HOOKRELAY_ADMIN_TOKEN") {
            self.admin.token = Some(token);
        }
        if let Ok(listen) = std::env::var("HOOKRELAY_LISTEN") {
            self.gateway.listen = listen;
        }
        if let Ok(listen) = std::env::var("HOOKRELAY_ADMIN_LISTEN") {
            self.gateway.admin_listen = listen;
        }
        self.validate()
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr(".gateway.listen", &self.gateway.listen)
    }

    /// Admin listener settings, or `None` when the admin API is disabled.
    pub fn admin_listener(&self) -> Result<Option<(AdminConfig, SocketAddr)>, ConfigError> {
        if !self.admin.enabled {
            return Ok(None);
        }
        let addr = parse_addr(".gateway.adminListen", &self.gateway.admin_listen)?;
        let token = self.admin.token.clone().filter(|t| !t.is_empty());
        Ok(Some((AdminConfig { token }, addr)))
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            max_body_bytes: self.ingress.max_body_bytes,
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.pipeline.workers,
            queue_capacity: self.pipeline.queue_capacity,
        }
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.delivery_timeout_secs)
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| state_dir().join(DEFAULT_STORE_FILE))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.store.busy_timeout_ms)
    }

    pub fn component_settings(&self) -> ComponentSettings {
        ComponentSettings {
            forward_timeout: Duration::from_secs(self.components.forward_timeout_secs),
            email_timeout: Duration::from_secs(self.components.email_timeout_secs),
            execute_timeout: Duration::from_secs(self.components.execute_timeout_secs),
            mailgun_api_base: self.components.mailgun_api_base.clone(),
            artifact_dir: self
                .components
                .artifact_dir
                .clone()
                .unwrap_or_else(|| state_dir().join("log")),
            user_agent: self.components.user_agent.clone(),
        }
    }

    /// Logging settings. Invalid values fall back to the defaults; they are
    /// rejected earlier by [`GatewayConfig::validate`].
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            format: self.logging.format.parse().unwrap_or_default(),
            output: match &self.logging.file {
                Some(path) => LogOutput::File(path.clone()),
                None => LogOutput::Stdout,
            },
            default_level: self.logging.level.parse().unwrap_or(tracing::Level::INFO),
        }
    }
}
