//! The process security context and the cell it is installed into.
//!
//! Bootstrap calls [`SecurityContextCell::install`] once. Afterwards any task
//! can fetch the installed [`SecurityContext`] and run work as its identity
//! with [`SecurityContext::run_secured`].
//!
//! ```
//! use std::sync::Arc;
//! use dataplane_security_core::security::{
//!     AmbientIdentityProvider, IdentityProvider, LoginConfigSlot, ModuleChain,
//!     PropertyStore, SecurityConfiguration, SecurityContextCell,
//! };
//!
//! let provider: Arc<dyn IdentityProvider> = Arc::new(AmbientIdentityProvider::new());
//! let chain = ModuleChain::standard(
//!     Arc::clone(&provider),
//!     Arc::new(LoginConfigSlot::new()),
//!     Arc::new(PropertyStore::new()),
//! );
//!
//! let cell = SecurityContextCell::new();
//! let context = cell
//!     .install(&SecurityConfiguration::default(), provider, chain)
//!     .unwrap();
//!
//! let answer: Result<u32, std::io::Error> = Ok(42);
//! assert_eq!(context.run_secured(|| answer).unwrap(), 42);
//! cell.reset().unwrap();
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::configuration::SecurityConfiguration;
use super::identity::{Identity, IdentityProvider};
use super::modules::ModuleChain;
use crate::error::{ProviderError, SecuredError, SecurityResult};

/// An installed identity plus the provider that can impersonate it.
pub struct SecurityContext {
    identity: Identity,
    provider: Arc<dyn IdentityProvider>,
}

impl SecurityContext {
    #[must_use]
    pub fn new(identity: Identity, provider: Arc<dyn IdentityProvider>) -> Self {
        Self { identity, provider }
    }

    /// The identity operations run as.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Run `op` as the installed identity.
    ///
    /// # Errors
    ///
    /// Returns [`SecuredError::Operation`] carrying `op`'s own error unchanged,
    /// or [`SecuredError::Impersonation`] if the provider could not attach the
    /// identity. In the latter case `op` may not have run.
    pub fn run_secured<T, E, F>(&self, op: F) -> Result<T, SecuredError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut outcome = None;
        self.provider
            .run_as(&self.identity, Box::new(|| outcome = Some(op())))
            .map_err(SecuredError::Impersonation)?;

        match outcome {
            Some(result) => result.map_err(SecuredError::Operation),
            None => Err(SecuredError::Impersonation(ProviderError::Impersonation {
                user: self.identity.user_name().to_string(),
                message: "provider returned without running the operation".to_string(),
            })),
        }
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Installed {
    context: Arc<SecurityContext>,
    /// Chains of every install since the last reset, oldest first.
    chains: Vec<ModuleChain>,
}

/// Holds at most one installed [`SecurityContext`].
#[derive(Debug, Default)]
pub struct SecurityContextCell {
    current: RwLock<Option<Installed>>,
}

impl SecurityContextCell {
    /// Create an empty cell. Tests use private cells.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cell shared by the whole process.
    #[must_use]
    pub fn global() -> &'static SecurityContextCell {
        static GLOBAL: OnceLock<SecurityContextCell> = OnceLock::new();
        GLOBAL.get_or_init(SecurityContextCell::new)
    }

    /// Run `chain` and install the provider's login user as the process identity.
    ///
    /// A second install replaces the context of the first with a warning.
    /// The replaced chain stays installed until [`reset`](Self::reset), which
    /// undoes every chain newest first.
    ///
    /// # Errors
    ///
    /// Returns the chain's install error, or a provider error if no login
    /// user is available afterwards. The cell is left unchanged on error.
    pub fn install(
        &self,
        config: &SecurityConfiguration,
        provider: Arc<dyn IdentityProvider>,
        mut chain: ModuleChain,
    ) -> SecurityResult<Arc<SecurityContext>> {
        chain.install(config)?;

        let identity = match provider.login_user() {
            Ok(identity) => identity,
            Err(e) => {
                if let Err(cleanup) = chain.uninstall() {
                    warn!(error = %cleanup, "failed to uninstall modules after login lookup failure");
                }
                return Err(e.into());
            }
        };

        let context = Arc::new(SecurityContext::new(identity, provider));
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut chains = match current.take() {
            Some(previous) => {
                warn!(
                    previous = %previous.context.identity(),
                    "overriding previously installed security context"
                );
                previous.chains
            }
            None => Vec::new(),
        };
        chains.push(chain);
        *current = Some(Installed {
            context: Arc::clone(&context),
            chains,
        });

        info!(user = %context.identity(), "security context installed");
        Ok(context)
    }

    /// The installed context, if any.
    #[must_use]
    pub fn installed(&self) -> Option<Arc<SecurityContext>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|installed| Arc::clone(&installed.context))
    }

    /// Uninstall the modules of every install in reverse order and clear the cell.
    ///
    /// # Errors
    ///
    /// Returns the first module uninstall failure. Every chain is still
    /// attempted and the cell is cleared regardless.
    pub fn reset(&self) -> SecurityResult<()> {
        let taken = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match taken {
            Some(installed) => {
                debug!(
                    user = %installed.context.identity(),
                    chains = installed.chains.len(),
                    "resetting security context"
                );
                let mut first_error = None;
                for mut chain in installed.chains.into_iter().rev() {
                    if let Err(e) = chain.uninstall() {
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SecurityError;
    use crate::security::login_config::LoginConfigSlot;
    use crate::security::modules::ZK_SASL_CLIENT_USERNAME;
    use crate::security::properties::PropertyStore;
    use crate::testing::{MockIdentityProvider, ProviderCall};

    fn standard_chain(
        provider: &Arc<MockIdentityProvider>,
        properties: &Arc<PropertyStore>,
    ) -> ModuleChain {
        ModuleChain::standard(
            Arc::clone(provider) as Arc<dyn IdentityProvider>,
            Arc::new(LoginConfigSlot::new()),
            Arc::clone(properties),
        )
    }

    #[test]
    fn test_install_and_run_secured() {
        let provider = Arc::new(MockIdentityProvider::new(false));
        let properties = Arc::new(PropertyStore::new());
        let cell = SecurityContextCell::new();

        let context = cell
            .install(
                &SecurityConfiguration::default(),
                Arc::clone(&provider) as Arc<dyn IdentityProvider>,
                standard_chain(&provider, &properties),
            )
            .unwrap();

        assert!(cell.installed().is_some());
        let result: Result<&str, SecuredError<std::io::Error>> = context.run_secured(|| Ok("done"));
        assert_eq!(result.unwrap(), "done");
        assert!(provider
            .calls()
            .contains(&ProviderCall::RunAs(context.identity().user_name().to_string())));
    }

    #[test]
    fn test_run_secured_returns_operation_error_unchanged() {
        let provider = Arc::new(MockIdentityProvider::new(false));
        provider.login_from_ambient().unwrap();
        let context = SecurityContext::new(
            provider.login_user().unwrap(),
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
        );

        let result: Result<(), SecuredError<String>> =
            context.run_secured(|| Err("operation failed".to_string()));

        match result {
            Err(SecuredError::Operation(message)) => assert_eq!(message, "operation failed"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_run_secured_reports_impersonation_failure() {
        let provider = Arc::new(MockIdentityProvider::new(false).failing_impersonation());
        provider.login_from_ambient().unwrap();
        let context = SecurityContext::new(
            provider.login_user().unwrap(),
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
        );

        let mut ran = false;
        let result: Result<(), SecuredError<String>> = context.run_secured(|| {
            ran = true;
            Ok(())
        });

        assert!(matches!(
            result,
            Err(SecuredError::Impersonation(ProviderError::Impersonation { .. }))
        ));
        assert!(!ran);
    }

    #[test]
    fn test_second_install_overrides() {
        let cell = SecurityContextCell::new();
        let properties = Arc::new(PropertyStore::new());

        let first = Arc::new(MockIdentityProvider::new(false).with_user_name("first"));
        cell.install(
            &SecurityConfiguration::default(),
            Arc::clone(&first) as Arc<dyn IdentityProvider>,
            standard_chain(&first, &properties),
        )
        .unwrap();

        let second = Arc::new(MockIdentityProvider::new(false).with_user_name("second"));
        cell.install(
            &SecurityConfiguration::default(),
            Arc::clone(&second) as Arc<dyn IdentityProvider>,
            standard_chain(&second, &properties),
        )
        .unwrap();

        assert_eq!(cell.installed().unwrap().identity().user_name(), "second");
    }

    #[test]
    fn test_reset_after_override_restores_original_properties() {
        let cell = SecurityContextCell::new();
        let properties = Arc::new(PropertyStore::new());
        let slot = Arc::new(LoginConfigSlot::new());
        let provider = Arc::new(MockIdentityProvider::new(false));

        for service in ["zk-a", "zk-b"] {
            let config = SecurityConfiguration::builder()
                .zookeeper_service_name(service)
                .login_contexts(["Client"])
                .build()
                .unwrap();
            let chain = ModuleChain::standard(
                Arc::clone(&provider) as Arc<dyn IdentityProvider>,
                Arc::clone(&slot),
                Arc::clone(&properties),
            );
            cell.install(
                &config,
                Arc::clone(&provider) as Arc<dyn IdentityProvider>,
                chain,
            )
            .unwrap();
        }
        assert_eq!(
            properties.get(ZK_SASL_CLIENT_USERNAME).as_deref(),
            Some("zk-b")
        );

        cell.reset().unwrap();

        assert!(cell.installed().is_none());
        assert_eq!(properties.get(ZK_SASL_CLIENT_USERNAME), None);
        assert!(slot.get().is_none());
    }

    #[test]
    fn test_failed_install_leaves_cell_empty() {
        let cell = SecurityContextCell::new();
        let properties = Arc::new(PropertyStore::new());
        let provider = Arc::new(MockIdentityProvider::new(true));

        let err = cell
            .install(
                &SecurityConfiguration::default(),
                Arc::clone(&provider) as Arc<dyn IdentityProvider>,
                standard_chain(&provider, &properties),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            SecurityError::ModuleInstall {
                module: "identity-login",
                ..
            }
        ));
        assert!(cell.installed().is_none());
    }

    #[test]
    fn test_reset_uninstalls_modules() {
        let cell = SecurityContextCell::new();
        let properties = Arc::new(PropertyStore::new());
        let provider = Arc::new(MockIdentityProvider::new(false));
        let config = SecurityConfiguration::builder()
            .zookeeper_service_name("zk-service")
            .build()
            .unwrap();

        cell.install(
            &config,
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
            standard_chain(&provider, &properties),
        )
        .unwrap();
        assert_eq!(
            properties.get(ZK_SASL_CLIENT_USERNAME).as_deref(),
            Some("zk-service")
        );

        cell.reset().unwrap();
        assert!(cell.installed().is_none());
        assert_eq!(properties.get(ZK_SASL_CLIENT_USERNAME), None);

        // Nothing installed, nothing to undo
        cell.reset().unwrap();
    }
}
