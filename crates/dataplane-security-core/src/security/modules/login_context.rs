//! Installs the process login configuration with Kerberos entries for each
//! configured login context.

use std::sync::Arc;

use tracing::{debug, info};

use super::SecurityModule;
use crate::error::SecurityResult;
use crate::security::configuration::SecurityConfiguration;
use crate::security::login_config::{
    keytab_entry, ticket_cache_entry, AuthEntry, DynamicConfiguration, LoginConfigSlot,
    LoginConfiguration, TICKET_CACHE_ENV,
};
use crate::security::properties::PropertyStore;

/// Property some clients probe for an external login configuration file.
/// Set to an empty value so they use the installed configuration instead.
pub const LOGIN_CONFIG_PROPERTY: &str = "java.security.auth.login.config";

/// Wraps the current login configuration in a [`DynamicConfiguration`] and
/// registers Kerberos entries under every configured login context.
#[derive(Debug)]
pub struct LoginContextModule {
    slot: Arc<LoginConfigSlot>,
    properties: Arc<PropertyStore>,
    prior_config: Option<Option<Arc<dyn LoginConfiguration>>>,
    prior_property: Option<Option<String>>,
    installed: Option<Arc<DynamicConfiguration>>,
}

impl LoginContextModule {
    #[must_use]
    pub fn new(slot: Arc<LoginConfigSlot>, properties: Arc<PropertyStore>) -> Self {
        Self {
            slot,
            properties,
            prior_config: None,
            prior_property: None,
            installed: None,
        }
    }

    /// The configuration installed by this module, while installed.
    #[must_use]
    pub fn installed_configuration(&self) -> Option<&Arc<DynamicConfiguration>> {
        self.installed.as_ref()
    }

    /// Kerberos entries for the configured credentials, ticket cache first.
    fn kerberos_entries(config: &SecurityConfiguration) -> Vec<AuthEntry> {
        let mut entries = Vec::new();
        if config.use_ticket_cache() {
            let cache = std::env::var(TICKET_CACHE_ENV).ok();
            entries.push(ticket_cache_entry(cache.as_deref()));
        }
        if let (Some(keytab), Some(principal)) = (config.keytab(), config.principal()) {
            entries.push(keytab_entry(keytab, principal));
        }
        entries
    }
}

impl SecurityModule for LoginContextModule {
    fn name(&self) -> &'static str {
        "login-context"
    }

    fn install(&mut self, config: &SecurityConfiguration) -> SecurityResult<()> {
        let prior = self.slot.get();
        let dynamic = Arc::new(DynamicConfiguration::new(prior.clone()));

        let entries = Self::kerberos_entries(config);
        for context in config.login_contexts() {
            debug!(context = %context, entries = entries.len(), "registering login context");
            dynamic.add_entries(context, entries.iter().cloned());
        }

        self.prior_config = Some(prior);
        self.slot
            .replace(Some(Arc::clone(&dynamic) as Arc<dyn LoginConfiguration>));
        self.installed = Some(dynamic);

        self.prior_property = Some(self.properties.get(LOGIN_CONFIG_PROPERTY));
        self.properties.set(LOGIN_CONFIG_PROPERTY, "");

        info!(
            contexts = ?config.login_contexts(),
            "login configuration installed"
        );
        Ok(())
    }

    fn uninstall(&mut self) -> SecurityResult<()> {
        if let Some(prior) = self.prior_config.take() {
            self.slot.replace(prior);
        }
        if let Some(prior) = self.prior_property.take() {
            self.properties.restore(LOGIN_CONFIG_PROPERTY, prior);
        }
        self.installed = None;
        Ok(())
    }
}
