//! Validated inputs for establishing the process security context.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{SecurityConfig, DEFAULT_ZOOKEEPER_LOGIN_CONTEXT, DEFAULT_ZOOKEEPER_SERVICE_NAME};
use crate::error::{ConfigError, ConfigResult};

/// Immutable security settings consumed by the module chain.
///
/// Keytab and principal are either both present or both absent, and a
/// present keytab always refers to an existing regular file. Both checks run
/// when the value is built, never when it is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityConfiguration {
    keytab: Option<PathBuf>,
    principal: Option<String>,
    use_ticket_cache: bool,
    login_contexts: Vec<String>,
    zookeeper_service_name: String,
    zookeeper_login_context: String,
    zookeeper_sasl_disabled: bool,
    provider_options: BTreeMap<String, String>,
}

impl SecurityConfiguration {
    /// Start building a configuration with default values.
    #[must_use]
    pub fn builder() -> SecurityConfigurationBuilder {
        SecurityConfigurationBuilder::default()
    }

    /// Build from the `security` section of the node configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if only one of keytab and principal is set, or if the
    /// keytab is not an existing regular file.
    pub fn from_config(config: &SecurityConfig) -> ConfigResult<Self> {
        let mut builder = Self::builder()
            .use_ticket_cache(config.kerberos.use_ticket_cache)
            .login_contexts(config.kerberos.login_contexts.iter().cloned())
            .zookeeper_service_name(config.zookeeper.service_name.clone())
            .zookeeper_login_context(config.zookeeper.login_context_name.clone())
            .zookeeper_sasl_disabled(config.zookeeper.sasl_disable);
        for (key, value) in &config.provider {
            builder = builder.provider_option(key.clone(), value.clone());
        }
        builder
            .credentials(config.kerberos.keytab.clone(), config.principal())
            .build()
    }

    /// Path to the keytab, if credentials are configured.
    #[must_use]
    pub fn keytab(&self) -> Option<&Path> {
        self.keytab.as_deref()
    }

    /// Principal to log in as, if credentials are configured.
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Whether keytab and principal are both configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.keytab.is_some() && self.principal.is_some()
    }

    /// Whether login contexts may use the ticket cache.
    #[must_use]
    pub fn use_ticket_cache(&self) -> bool {
        self.use_ticket_cache
    }

    /// Login contexts that receive Kerberos entries.
    #[must_use]
    pub fn login_contexts(&self) -> &[String] {
        &self.login_contexts
    }

    /// Expected ZooKeeper service name.
    #[must_use]
    pub fn zookeeper_service_name(&self) -> &str {
        &self.zookeeper_service_name
    }

    /// Login context name used by the ZooKeeper client.
    #[must_use]
    pub fn zookeeper_login_context(&self) -> &str {
        &self.zookeeper_login_context
    }

    /// Whether SASL is disabled for the ZooKeeper client.
    #[must_use]
    pub fn zookeeper_sasl_disabled(&self) -> bool {
        self.zookeeper_sasl_disabled
    }

    /// Options passed through to the identity provider.
    #[must_use]
    pub fn provider_options(&self) -> &BTreeMap<String, String> {
        &self.provider_options
    }
}

impl Default for SecurityConfiguration {
    fn default() -> Self {
        Self {
            keytab: None,
            principal: None,
            use_ticket_cache: true,
            login_contexts: Vec::new(),
            zookeeper_service_name: DEFAULT_ZOOKEEPER_SERVICE_NAME.to_string(),
            zookeeper_login_context: DEFAULT_ZOOKEEPER_LOGIN_CONTEXT.to_string(),
            zookeeper_sasl_disabled: false,
            provider_options: BTreeMap::new(),
        }
    }
}

/// Builder for [`SecurityConfiguration`].
#[derive(Debug, Default)]
pub struct SecurityConfigurationBuilder {
    inner: SecurityConfiguration,
}

impl SecurityConfigurationBuilder {
    /// Set keytab and principal. Empty values count as absent.
    #[must_use]
    pub fn credentials(mut self, keytab: Option<PathBuf>, principal: Option<String>) -> Self {
        self.inner.keytab = keytab.filter(|k| !k.as_os_str().is_empty());
        self.inner.principal = principal.filter(|p| !p.trim().is_empty());
        self
    }

    #[must_use]
    pub fn use_ticket_cache(mut self, enabled: bool) -> Self {
        self.inner.use_ticket_cache = enabled;
        self
    }

    #[must_use]
    pub fn login_contexts<I, S>(mut self, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.login_contexts = contexts.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn zookeeper_service_name(mut self, name: impl Into<String>) -> Self {
        self.inner.zookeeper_service_name = name.into();
        self
    }

    #[must_use]
    pub fn zookeeper_login_context(mut self, name: impl Into<String>) -> Self {
        self.inner.zookeeper_login_context = name.into();
        self
    }

    #[must_use]
    pub fn zookeeper_sasl_disabled(mut self, disabled: bool) -> Self {
        self.inner.zookeeper_sasl_disabled = disabled;
        self
    }

    #[must_use]
    pub fn provider_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.provider_options.insert(key.into(), value.into());
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IncompleteCredentials`] when exactly one of
    /// keytab and principal is set, and [`ConfigError::InvalidKeytab`] when the
    /// keytab is not an existing regular file.
    pub fn build(self) -> ConfigResult<SecurityConfiguration> {
        validate_credentials(self.inner.keytab.as_deref(), self.inner.principal.as_deref())?;
        debug!(
            keytab = ?self.inner.keytab,
            principal = ?self.inner.principal,
            "security configuration built"
        );
        Ok(self.inner)
    }
}

fn validate_credentials(keytab: Option<&Path>, principal: Option<&str>) -> ConfigResult<()> {
    match (keytab, principal) {
        (None, None) => Ok(()),
        (Some(path), Some(_)) => {
            if path.is_file() {
                Ok(())
            } else {
                warn!(keytab = %path.display(), "not a valid keytab file");
                Err(ConfigError::InvalidKeytab {
                    path: path.to_path_buf(),
                })
            }
        }
        (keytab, principal) => {
            if keytab.is_none() {
                warn!("keytab is missing or empty");
            }
            if principal.is_none() {
                warn!("principal is missing or empty");
            }
            Err(ConfigError::IncompleteCredentials {
                keytab: keytab.is_some(),
                principal: principal.is_some(),
            })
        }
    }
}
