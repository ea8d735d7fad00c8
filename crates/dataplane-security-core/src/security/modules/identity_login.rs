//! Installs the process login user through the identity provider.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::SecurityModule;
use crate::error::{SecurityError, SecurityResult};
use crate::security::configuration::SecurityConfiguration;
use crate::security::identity::{Identity, IdentityProvider, TOKEN_FILE_LOCATION_ENV};

/// Logs in from the keytab when strong authentication is enforced and
/// credentials are configured, otherwise as the ambient user.
#[derive(Debug)]
pub struct IdentityLoginModule {
    provider: Arc<dyn IdentityProvider>,
    token_file_env: String,
    login_user: Option<Identity>,
}

impl IdentityLoginModule {
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            token_file_env: TOKEN_FILE_LOCATION_ENV.to_string(),
            login_user: None,
        }
    }

    /// Read the delegation token location from a different variable.
    #[must_use]
    pub fn with_token_file_env(mut self, name: impl Into<String>) -> Self {
        self.token_file_env = name.into();
        self
    }

    /// The login user resolved by the last install.
    #[must_use]
    pub fn login_user(&self) -> Option<&Identity> {
        self.login_user.as_ref()
    }

    fn login_from_keytab(&self, principal: &str, keytab: &Path) -> SecurityResult<()> {
        let keytab = absolute(keytab);
        self.provider.login_from_keytab(principal, &keytab)?;
        info!(principal, keytab = %keytab.display(), "logged in from keytab");
        self.add_stored_tokens()
    }

    fn add_stored_tokens(&self) -> SecurityResult<()> {
        let Some(location) = std::env::var_os(&self.token_file_env) else {
            debug!(variable = %self.token_file_env, "no delegation token file location set");
            return Ok(());
        };

        if !self.provider.supports_token_files() {
            warn!(
                variable = %self.token_file_env,
                "identity provider cannot read delegation token files, skipping"
            );
            return Ok(());
        }

        let path = PathBuf::from(location);
        let tokens = self.provider.read_token_storage_file(&path)?;
        debug!(file = %path.display(), count = tokens.len(), "adding stored delegation tokens");
        self.provider.add_tokens(tokens)?;
        Ok(())
    }

    fn check_credentials(&self, enforced: bool, user: &Identity) -> SecurityResult<()> {
        if !enforced || user.has_strong_credentials() {
            return Ok(());
        }

        if user.has_delegation_token() {
            info!(
                user = %user,
                "login user has no Kerberos credentials, continuing with delegation token"
            );
            return Ok(());
        }

        error!(
            user = %user,
            "strong authentication is enabled but login user has no Kerberos credentials"
        );
        Err(SecurityError::MissingStrongCredentials {
            user: user.user_name().to_string(),
        })
    }
}

impl SecurityModule for IdentityLoginModule {
    fn name(&self) -> &'static str {
        "identity-login"
    }

    fn install(&mut self, config: &SecurityConfiguration) -> SecurityResult<()> {
        self.provider.configure(config.provider_options())?;
        let enforced = self.provider.is_security_enabled();

        match (enforced, config.keytab(), config.principal()) {
            (true, Some(keytab), Some(principal)) => self.login_from_keytab(principal, keytab)?,
            _ => {
                // Ticket cache or OS login; stored tokens are picked up by the provider.
                self.provider.login_from_ambient()?;
            }
        }

        let user = self.provider.login_user()?;
        self.check_credentials(enforced, &user)?;

        info!(user = %user, "login user set");
        self.login_user = Some(user);
        Ok(())
    }

    fn uninstall(&mut self) -> SecurityResult<()> {
        self.login_user = None;
        Ok(())
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
