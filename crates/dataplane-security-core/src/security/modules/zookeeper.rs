//! Installs the process-wide ZooKeeper SASL client properties.

use std::sync::Arc;

use tracing::debug;

use super::SecurityModule;
use crate::config::{DEFAULT_ZOOKEEPER_LOGIN_CONTEXT, DEFAULT_ZOOKEEPER_SERVICE_NAME};
use crate::error::SecurityResult;
use crate::security::configuration::SecurityConfiguration;
use crate::security::properties::PropertyStore;

/// Whether the ZooKeeper client uses SASL.
pub const ZK_ENABLE_CLIENT_SASL: &str = "zookeeper.sasl.client";

/// Expected ZooKeeper service name.
pub const ZK_SASL_CLIENT_USERNAME: &str = "zookeeper.sasl.client.username";

/// Login context name used by the ZooKeeper client.
pub const ZK_LOGIN_CONTEXT_NAME: &str = "zookeeper.sasl.clientconfig";

/// Sets the ZooKeeper SASL properties that differ from ZooKeeper's own
/// defaults, remembering prior values so uninstall can restore them.
#[derive(Debug)]
pub struct ZooKeeperModule {
    properties: Arc<PropertyStore>,
    prior_sasl_client: Option<Option<String>>,
    prior_service_name: Option<Option<String>>,
    prior_login_context_name: Option<Option<String>>,
}

impl ZooKeeperModule {
    #[must_use]
    pub fn new(properties: Arc<PropertyStore>) -> Self {
        Self {
            properties,
            prior_sasl_client: None,
            prior_service_name: None,
            prior_login_context_name: None,
        }
    }

    fn restore(&self, key: &str, prior: Option<Option<String>>) {
        if let Some(value) = prior {
            debug!(property = key, value = ?value, "restoring property");
            self.properties.restore(key, value);
        }
    }
}

impl SecurityModule for ZooKeeperModule {
    fn name(&self) -> &'static str {
        "zookeeper"
    }

    fn install(&mut self, config: &SecurityConfiguration) -> SecurityResult<()> {
        self.prior_sasl_client = Some(self.properties.get(ZK_ENABLE_CLIENT_SASL));
        if config.zookeeper_sasl_disabled() {
            self.properties.set(ZK_ENABLE_CLIENT_SASL, "false");
        }

        self.prior_service_name = Some(self.properties.get(ZK_SASL_CLIENT_USERNAME));
        if config.zookeeper_service_name() != DEFAULT_ZOOKEEPER_SERVICE_NAME {
            self.properties
                .set(ZK_SASL_CLIENT_USERNAME, config.zookeeper_service_name());
        }

        self.prior_login_context_name = Some(self.properties.get(ZK_LOGIN_CONTEXT_NAME));
        if config.zookeeper_login_context() != DEFAULT_ZOOKEEPER_LOGIN_CONTEXT {
            self.properties
                .set(ZK_LOGIN_CONTEXT_NAME, config.zookeeper_login_context());
        }

        debug!(
            service_name = config.zookeeper_service_name(),
            login_context = config.zookeeper_login_context(),
            sasl_disabled = config.zookeeper_sasl_disabled(),
            "zookeeper sasl properties installed"
        );
        Ok(())
    }

    fn uninstall(&mut self) -> SecurityResult<()> {
        let prior = self.prior_sasl_client.take();
        self.restore(ZK_ENABLE_CLIENT_SASL, prior);
        let prior = self.prior_service_name.take();
        self.restore(ZK_SASL_CLIENT_USERNAME, prior);
        let prior = self.prior_login_context_name.take();
        self.restore(ZK_LOGIN_CONTEXT_NAME, prior);
        Ok(())
    }
}
