//! Installable security modules and the chain that runs them.
//!
//! Each module contributes one piece of the process security environment
//! (login user, login contexts, ZooKeeper SASL properties) and can undo it.
//! The [`ModuleChain`] installs modules strictly in registration order.
//!
//! # Failure policy
//!
//! When a module fails to install, the chain stops, uninstalls the failing
//! module and every module it already installed in reverse order, and
//! returns [`SecurityError::ModuleInstall`] naming the failing module.

pub mod identity_login;
pub mod login_context;
pub mod zookeeper;

pub use identity_login::IdentityLoginModule;
pub use login_context::{LoginContextModule, LOGIN_CONFIG_PROPERTY};
pub use zookeeper::{
    ZooKeeperModule, ZK_ENABLE_CLIENT_SASL, ZK_LOGIN_CONTEXT_NAME, ZK_SASL_CLIENT_USERNAME,
};

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::configuration::SecurityConfiguration;
use super::identity::IdentityProvider;
use super::login_config::LoginConfigSlot;
use super::properties::PropertyStore;
use crate::error::{SecurityError, SecurityResult};

/// A unit of process security setup.
pub trait SecurityModule: Send + Sync + fmt::Debug {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Install the module.
    fn install(&mut self, config: &SecurityConfiguration) -> SecurityResult<()>;

    /// Undo [`install`](Self::install).
    ///
    /// Must be safe to call after a partial or failed install, and more than once.
    fn uninstall(&mut self) -> SecurityResult<()>;
}

/// Ordered list of security modules.
#[derive(Debug, Default)]
pub struct ModuleChain {
    modules: Vec<Box<dyn SecurityModule>>,
    installed: usize,
}

impl ModuleChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard chain: identity login, login contexts, ZooKeeper SASL.
    #[must_use]
    pub fn standard(
        provider: Arc<dyn IdentityProvider>,
        login_slot: Arc<LoginConfigSlot>,
        properties: Arc<PropertyStore>,
    ) -> Self {
        Self::new()
            .with_module(IdentityLoginModule::new(provider))
            .with_module(LoginContextModule::new(login_slot, Arc::clone(&properties)))
            .with_module(ZooKeeperModule::new(properties))
    }

    /// Append a module.
    #[must_use]
    pub fn with_module(mut self, module: impl SecurityModule + 'static) -> Self {
        self.push(Box::new(module));
        self
    }

    /// Append a boxed module.
    pub fn push(&mut self, module: Box<dyn SecurityModule>) {
        self.modules.push(module);
    }

    /// Names of the registered modules, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Number of modules currently installed.
    #[must_use]
    pub fn installed_count(&self) -> usize {
        self.installed
    }

    /// Install all modules in order.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::ModuleInstall`] for the first module that
    /// fails. Modules installed before it are uninstalled first.
    pub fn install(&mut self, config: &SecurityConfiguration) -> SecurityResult<()> {
        for index in self.installed..self.modules.len() {
            let module = &mut self.modules[index];
            let name = module.name();
            debug!(module = name, "installing security module");

            if let Err(e) = module.install(config) {
                error!(module = name, error = %e, "security module installation failed");
                if let Err(cleanup) = module.uninstall() {
                    warn!(module = name, error = %cleanup, "failed to clean up partially installed module");
                }
                self.rollback();
                return Err(SecurityError::ModuleInstall {
                    module: name,
                    source: Box::new(e),
                });
            }

            self.installed = index + 1;
            info!(module = name, "security module installed");
        }
        Ok(())
    }

    /// Uninstall installed modules in reverse order.
    ///
    /// Every installed module is attempted even if one fails.
    ///
    /// # Errors
    ///
    /// Returns the first uninstall failure.
    pub fn uninstall(&mut self) -> SecurityResult<()> {
        let mut first_error = None;
        while self.installed > 0 {
            self.installed -= 1;
            let module = &mut self.modules[self.installed];
            match module.uninstall() {
                Ok(()) => debug!(module = module.name(), "security module uninstalled"),
                Err(e) => {
                    warn!(module = module.name(), error = %e, "security module uninstall failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn rollback(&mut self) {
        if let Err(e) = self.uninstall() {
            warn!(error = %e, "rollback of installed security modules incomplete");
        }
    }
}
