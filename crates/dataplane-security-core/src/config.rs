//! Configuration types for a data-plane node.
//!
//! Configuration is loaded from YAML files and validated before use.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

/// Default ZooKeeper SASL service name.
pub const DEFAULT_ZOOKEEPER_SERVICE_NAME: &str = "zookeeper";

/// Default ZooKeeper SASL login context name.
pub const DEFAULT_ZOOKEEPER_LOGIN_CONTEXT: &str = "Client";

/// Smallest frame that can carry a message header (magic + id).
pub const MIN_FRAME_SIZE: usize = 5;

/// Root configuration for a node.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Data-plane listener configuration.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Security configuration.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Data-plane listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Address to bind to, e.g., "0.0.0.0:6121".
    #[serde(default = "default_listen_address")]
    pub address: String,

    /// Maximum number of concurrent peer connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum accepted frame size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// Security configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Whether peer authentication with the secure cookie is enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Shared secret carried on protected data-plane messages.
    /// Supports environment variable expansion: "${NODE_SECURE_COOKIE}"
    #[serde(default)]
    pub cookie: Option<String>,

    /// Kerberos login configuration.
    #[serde(default)]
    pub kerberos: KerberosConfig,

    /// ZooKeeper SASL client configuration.
    #[serde(default)]
    pub zookeeper: ZooKeeperConfig,

    /// Opaque options handed to the identity provider.
    #[serde(default)]
    pub provider: BTreeMap<String, String>,
}

/// Kerberos login configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KerberosConfig {
    /// Path to the keytab file. Must be set together with `principal`.
    pub keytab: Option<PathBuf>,

    /// Principal to log in as. Must be set together with `keytab`.
    /// Supports environment variable expansion.
    pub principal: Option<String>,

    /// Whether login contexts may fall back to the ticket cache.
    #[serde(default = "default_use_ticket_cache")]
    pub use_ticket_cache: bool,

    /// Login contexts that receive a Kerberos entry (e.g. "Client", "KafkaClient").
    #[serde(default)]
    pub login_contexts: Vec<String>,
}

/// ZooKeeper SASL client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZooKeeperConfig {
    /// Expected ZooKeeper service name.
    #[serde(default = "default_zookeeper_service_name")]
    pub service_name: String,

    /// Login context used by the ZooKeeper client.
    #[serde(default = "default_zookeeper_login_context")]
    pub login_context_name: String,

    /// Disable SASL for the ZooKeeper client.
    #[serde(default)]
    pub sasl_disable: bool,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether to enable the metrics endpoint.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Address for the metrics HTTP server.
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format (for production).
    #[serde(default)]
    pub json: bool,
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable `VAR_NAME`.
/// If the variable is not set, replaces with an empty string.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

// Default value functions

fn default_listen_address() -> String {
    "0.0.0.0:6121".to_string()
}

fn default_max_connections() -> usize {
    1000
}

fn default_max_frame_size() -> usize {
    100 * 1024 * 1024
}

fn default_use_ticket_cache() -> bool {
    true
}

fn default_zookeeper_service_name() -> String {
    DEFAULT_ZOOKEEPER_SERVICE_NAME.to_string()
}

fn default_zookeeper_login_context() -> String {
    DEFAULT_ZOOKEEPER_LOGIN_CONTEXT.to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9249".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            max_connections: default_max_connections(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for KerberosConfig {
    fn default() -> Self {
        Self {
            keytab: None,
            principal: None,
            use_ticket_cache: default_use_ticket_cache(),
            login_contexts: Vec::new(),
        }
    }
}

impl Default for ZooKeeperConfig {
    fn default() -> Self {
        Self {
            service_name: default_zookeeper_service_name(),
            login_context_name: default_zookeeper_login_context(),
            sasl_disable: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl SecurityConfig {
    /// Resolve the secure cookie used on the data plane.
    ///
    /// Returns `None` when security is disabled. Environment variables in the
    /// configured value are expanded.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecureCookie`] if security is enabled but
    /// the cookie is unset or expands to an empty string.
    pub fn secure_cookie(&self) -> ConfigResult<Option<String>> {
        if !self.enabled {
            return Ok(None);
        }
        match self.cookie.as_deref().map(expand_env_vars) {
            Some(cookie) if !cookie.is_empty() => Ok(Some(cookie)),
            _ => Err(ConfigError::MissingSecureCookie),
        }
    }

    /// Apply a cookie passed on the command line.
    ///
    /// The override only takes effect when security is enabled.
    /// Returns whether the cookie was applied.
    pub fn apply_cookie_override(&mut self, cookie: Option<String>) -> bool {
        match cookie {
            Some(cookie) if self.enabled => {
                self.cookie = Some(cookie);
                true
            }
            _ => false,
        }
    }

    /// Get the principal with environment variables expanded.
    #[must_use]
    pub fn principal(&self) -> Option<String> {
        self.kerberos
            .principal
            .as_deref()
            .map(expand_env_vars)
            .filter(|p| !p.trim().is_empty())
    }
}

// Configuration loading and validation

impl NodeConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Keytab and principal consistency is checked when the
    /// [`SecurityConfiguration`](crate::security::SecurityConfiguration) is built.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation check fails.
    pub fn validate(&self) -> ConfigResult<()> {
        self.listen.validate()
    }
}

impl ListenConfig {
    /// Validate the listener configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not `host:port` or the frame
    /// limit cannot hold a message header.
    pub fn validate(&self) -> ConfigResult<()> {
        let parts: Vec<&str> = self.address.rsplitn(2, ':').collect();
        if parts.len() != 2 || parts[0].parse::<u16>().is_err() {
            return Err(ConfigError::InvalidAddress(self.address.clone()));
        }

        if self.max_frame_size < MIN_FRAME_SIZE {
            return Err(ConfigError::FrameSizeTooSmall {
                min: MIN_FRAME_SIZE,
                actual: self.max_frame_size,
            });
        }

        Ok(())
    }
}
