//! Mock identity provider for security bootstrap tests.
//!
//! Behaves like a minimal Kerberos-backed provider:
//! - Keytab login yields a user with strong credentials
//! - Ambient login yields a user without them, carrying any configured tokens
//! - Every call is recorded for later assertions

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{ProviderError, ProviderResult};
use crate::security::identity::{Identity, IdentityProvider, Token};

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Configure,
    LoginFromKeytab { principal: String, keytab: PathBuf },
    LoginFromAmbient,
    ReadTokenFile(PathBuf),
    AddTokens(usize),
    /// User name the operation was run as.
    RunAs(String),
}

/// Identity provider double with configurable behavior.
#[derive(Debug)]
pub struct MockIdentityProvider {
    security_enabled: bool,
    user_name: String,
    ambient_tokens: Vec<Token>,
    token_files: bool,
    fail_keytab_login: bool,
    fail_impersonation: bool,
    login_user: Mutex<Option<Identity>>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl MockIdentityProvider {
    /// Create a provider that reports strong authentication as `security_enabled`.
    #[must_use]
    pub fn new(security_enabled: bool) -> Self {
        Self {
            security_enabled,
            user_name: "mock-user".to_string(),
            ambient_tokens: Vec::new(),
            token_files: true,
            fail_keytab_login: false,
            fail_impersonation: false,
            login_user: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// User name reported by ambient login.
    #[must_use]
    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = name.into();
        self
    }

    /// Tokens carried by the ambient login user.
    #[must_use]
    pub fn with_ambient_tokens(mut self, tokens: Vec<Token>) -> Self {
        self.ambient_tokens = tokens;
        self
    }

    #[must_use]
    pub fn without_token_file_support(mut self) -> Self {
        self.token_files = false;
        self
    }

    #[must_use]
    pub fn failing_keytab_login(mut self) -> Self {
        self.fail_keytab_login = true;
        self
    }

    #[must_use]
    pub fn failing_impersonation(mut self) -> Self {
        self.fail_impersonation = true;
        self
    }

    /// All calls received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: ProviderCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn set_login_user(&self, identity: Identity) {
        *self
            .login_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(identity);
    }
}

impl IdentityProvider for MockIdentityProvider {
    fn configure(&self, _options: &BTreeMap<String, String>) -> ProviderResult<()> {
        self.record(ProviderCall::Configure);
        Ok(())
    }

    fn is_security_enabled(&self) -> bool {
        self.security_enabled
    }

    fn login_from_keytab(&self, principal: &str, keytab: &Path) -> ProviderResult<()> {
        self.record(ProviderCall::LoginFromKeytab {
            principal: principal.to_string(),
            keytab: keytab.to_path_buf(),
        });
        if self.fail_keytab_login {
            return Err(ProviderError::LoginFailed {
                principal: principal.to_string(),
                message: "keytab rejected".to_string(),
            });
        }
        self.set_login_user(Identity::new(principal, true));
        Ok(())
    }

    fn login_from_ambient(&self) -> ProviderResult<()> {
        self.record(ProviderCall::LoginFromAmbient);
        self.set_login_user(
            Identity::new(self.user_name.clone(), false).with_tokens(self.ambient_tokens.clone()),
        );
        Ok(())
    }

    fn login_user(&self) -> ProviderResult<Identity> {
        self.login_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ProviderError::NoLoginUser)
    }

    fn supports_token_files(&self) -> bool {
        self.token_files
    }

    /// Reads one token per line as `KIND service`.
    fn read_token_storage_file(&self, path: &Path) -> ProviderResult<Vec<Token>> {
        self.record(ProviderCall::ReadTokenFile(path.to_path_buf()));
        let content = std::fs::read_to_string(path).map_err(|e| ProviderError::TokenStorage {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(content
            .lines()
            .filter_map(|line| line.trim().split_once(' '))
            .map(|(kind, service)| Token::new(kind, service.trim()))
            .collect())
    }

    fn add_tokens(&self, tokens: Vec<Token>) -> ProviderResult<()> {
        self.record(ProviderCall::AddTokens(tokens.len()));
        let mut guard = self
            .login_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let user = guard.take().ok_or(ProviderError::NoLoginUser)?;
        *guard = Some(user.with_tokens(tokens));
        Ok(())
    }

    fn run_as(&self, identity: &Identity, op: Box<dyn FnOnce() + '_>) -> ProviderResult<()> {
        if self.fail_impersonation {
            return Err(ProviderError::Impersonation {
                user: identity.user_name().to_string(),
                message: "impersonation disabled".to_string(),
            });
        }
        self.record(ProviderCall::RunAs(identity.user_name().to_string()));
        op();
        Ok(())
    }
}
