//! Identities and the boundary to the external identity provider.
//!
//! The node never handles Kerberos tickets itself. It decides *when* and
//! *with what parameters* the [`IdentityProvider`] logs in, and what to do
//! with the [`Identity`] it gets back.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// Environment variable naming the delegation token storage file.
pub const TOKEN_FILE_LOCATION_ENV: &str = "HADOOP_TOKEN_FILE_LOCATION";

/// Token kind accepted in place of Kerberos credentials.
pub const DELEGATION_TOKEN_KIND: &str = "HDFS_DELEGATION_TOKEN";

/// A credential token attached to an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    /// Token kind, e.g. `HDFS_DELEGATION_TOKEN`.
    pub kind: String,
    /// Service the token was issued for.
    pub service: String,
}

impl Token {
    pub fn new(kind: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            service: service.into(),
        }
    }

    /// Whether this token substitutes for Kerberos credentials.
    #[must_use]
    pub fn is_delegation_token(&self) -> bool {
        self.kind == DELEGATION_TOKEN_KIND
    }
}

/// The identity a process runs as after login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    user_name: String,
    strong_credentials: bool,
    tokens: Vec<Token>,
}

impl Identity {
    /// Create an identity without tokens.
    pub fn new(user_name: impl Into<String>, strong_credentials: bool) -> Self {
        Self {
            user_name: user_name.into(),
            strong_credentials,
            tokens: Vec::new(),
        }
    }

    /// Attach tokens to the identity.
    #[must_use]
    pub fn with_tokens(mut self, tokens: impl IntoIterator<Item = Token>) -> Self {
        self.tokens.extend(tokens);
        self
    }

    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Whether the identity holds Kerberos credentials.
    #[must_use]
    pub fn has_strong_credentials(&self) -> bool {
        self.strong_credentials
    }

    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Whether any attached token substitutes for Kerberos credentials.
    #[must_use]
    pub fn has_delegation_token(&self) -> bool {
        self.tokens.iter().any(Token::is_delegation_token)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let auth = if self.strong_credentials {
            "KERBEROS"
        } else {
            "SIMPLE"
        };
        write!(f, "{} (auth:{auth})", self.user_name)
    }
}

/// Adapter to the external identity source.
///
/// Implementations are process-global in spirit: a successful login replaces
/// the provider's login user, which [`login_user`](Self::login_user) returns.
pub trait IdentityProvider: Send + Sync + fmt::Debug {
    /// Apply provider-specific options before any login.
    fn configure(&self, _options: &BTreeMap<String, String>) -> ProviderResult<()> {
        Ok(())
    }

    /// Whether strong (Kerberos) authentication is enforced.
    fn is_security_enabled(&self) -> bool;

    /// Log in non-interactively from a keytab.
    fn login_from_keytab(&self, principal: &str, keytab: &Path) -> ProviderResult<()>;

    /// Log in as the ambient user (ticket cache, OS login).
    fn login_from_ambient(&self) -> ProviderResult<()>;

    /// The current login user.
    fn login_user(&self) -> ProviderResult<Identity>;

    /// Whether the provider can read delegation token storage files.
    fn supports_token_files(&self) -> bool {
        true
    }

    /// Read the tokens stored in a delegation token file.
    fn read_token_storage_file(&self, path: &Path) -> ProviderResult<Vec<Token>>;

    /// Attach tokens to the current login user.
    fn add_tokens(&self, tokens: Vec<Token>) -> ProviderResult<()>;

    /// Run `op` with `identity` attached for the duration of the call.
    fn run_as(&self, identity: &Identity, op: Box<dyn FnOnce() + '_>) -> ProviderResult<()>;
}

/// Provider for nodes without Kerberos.
///
/// Strong authentication is never enforced; ambient login resolves the OS
/// user from the environment and operations run directly.
#[derive(Debug, Default)]
pub struct AmbientIdentityProvider {
    login_user: RwLock<Option<Identity>>,
}

impl AmbientIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn os_user() -> String {
        ["USER", "USERNAME", "LOGNAME"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl IdentityProvider for AmbientIdentityProvider {
    fn is_security_enabled(&self) -> bool {
        false
    }

    fn login_from_keytab(&self, _principal: &str, _keytab: &Path) -> ProviderResult<()> {
        Err(ProviderError::Unsupported("keytab login"))
    }

    fn login_from_ambient(&self) -> ProviderResult<()> {
        let identity = Identity::new(Self::os_user(), false);
        debug!(user = %identity, "ambient login");
        *self
            .login_user
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(identity);
        Ok(())
    }

    fn login_user(&self) -> ProviderResult<Identity> {
        self.login_user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ProviderError::NoLoginUser)
    }

    fn supports_token_files(&self) -> bool {
        false
    }

    fn read_token_storage_file(&self, _path: &Path) -> ProviderResult<Vec<Token>> {
        Err(ProviderError::Unsupported("token storage files"))
    }

    fn add_tokens(&self, tokens: Vec<Token>) -> ProviderResult<()> {
        let mut guard = self
            .login_user
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let user = guard.take().ok_or(ProviderError::NoLoginUser)?;
        *guard = Some(user.with_tokens(tokens));
        Ok(())
    }

    fn run_as(&self, _identity: &Identity, op: Box<dyn FnOnce() + '_>) -> ProviderResult<()> {
        op();
        Ok(())
    }
}
