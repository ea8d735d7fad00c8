//! Domain error types for node security bootstrap and the data-plane protocol.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.

use std::path::PathBuf;

use thiserror::Error;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Only one of keytab and principal was supplied.
    #[error("requires both keytab and principal to be provided (keytab: {keytab}, principal: {principal})")]
    IncompleteCredentials { keytab: bool, principal: bool },

    /// The keytab path does not point to an existing regular file.
    #[error("invalid keytab file passed: {}", path.display())]
    InvalidKeytab { path: PathBuf },

    /// Security is enabled but no secure cookie was configured.
    #[error("security is enabled but no secure cookie is configured")]
    MissingSecureCookie,

    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Invalid address format.
    #[error("invalid address format: {0} (expected 'host:port')")]
    InvalidAddress(String),

    /// Frame size limit too small to carry a message header.
    #[error("max_frame_size must be at least {min}, got {actual}")]
    FrameSizeTooSmall { min: usize, actual: usize },
}

/// Errors raised by an external identity provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Login with the supplied credentials failed.
    #[error("login failed for '{principal}': {message}")]
    LoginFailed { principal: String, message: String },

    /// No user has been logged in yet.
    #[error("no login user available")]
    NoLoginUser,

    /// The delegation token storage file could not be read.
    #[error("failed to read token storage file '{}': {message}", path.display())]
    TokenStorage { path: PathBuf, message: String },

    /// Running an operation as the given identity failed.
    #[error("cannot act as '{user}': {message}")]
    Impersonation { user: String, message: String },

    /// The provider does not implement the requested operation.
    #[error("operation not supported by identity provider: {0}")]
    Unsupported(&'static str),
}

/// Errors raised while installing or uninstalling the security context.
#[derive(Error, Debug)]
pub enum SecurityError {
    /// A module of the chain failed to install.
    #[error("security module '{module}' failed to install: {source}")]
    ModuleInstall {
        module: &'static str,
        #[source]
        source: Box<SecurityError>,
    },

    /// A module failed to uninstall.
    #[error("security module '{module}' failed to uninstall: {message}")]
    ModuleUninstall { module: &'static str, message: String },

    /// Strong authentication is enforced but the login user has no strong
    /// credentials and no delegation token.
    #[error("strong authentication is enabled but the current login user '{user}' does not have Kerberos credentials")]
    MissingStrongCredentials { user: String },

    /// The identity provider failed.
    #[error("identity provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The security configuration was rejected.
    #[error("invalid security configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Failure of an operation executed through `SecurityContext::run_secured`.
///
/// The operation's own error is carried unchanged; failures of the identity
/// provider to attach the identity are reported separately.
#[derive(Error, Debug)]
pub enum SecuredError<E> {
    /// The operation itself failed.
    #[error(transparent)]
    Operation(E),

    /// The provider could not run the operation as the installed identity.
    #[error("impersonation failed: {0}")]
    Impersonation(#[source] ProviderError),
}

/// Errors raised while encoding or decoding data-plane frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The sender attached no cookie but the receiver requires one.
    #[error("Cookie length does not match with source cookie. Invalid secure cookie passed.")]
    CookieLengthMismatch,

    /// The sender attached a cookie that differs from the receiver's.
    #[error("Invalid secure cookie passed.")]
    InvalidCookie,

    /// Frame does not start with the protocol magic number.
    #[error("network stream corrupted: received incorrect magic number {0:#010x}")]
    BadMagic(u32),

    /// Unknown message identifier.
    #[error("received unknown message id {0}")]
    UnknownMessageId(u8),

    /// Frame is larger than the configured limit.
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame ended before a field could be read.
    #[error("truncated frame: {0}")]
    Truncated(&'static str),

    /// Bytes remained after the last field of a message.
    #[error("{remaining} unexpected trailing bytes in {kind} frame")]
    TrailingBytes { kind: &'static str, remaining: usize },

    /// A string field did not contain valid UTF-8.
    #[error("invalid utf-8 in field '{0}'")]
    InvalidUtf8(&'static str),

    /// Underlying transport error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error is a secure-cookie authentication failure.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::CookieLengthMismatch | Self::InvalidCookie)
    }
}

/// Errors that occur while running a node.
#[derive(Error, Debug)]
pub enum NodeError {
    /// TCP/IO connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Data-plane protocol failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Security bootstrap failure.
    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    /// Configuration failure.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Shutdown signal received.
    #[error("node shutting down")]
    Shutdown,
}

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for security bootstrap operations.
pub type SecurityResult<T> = std::result::Result<T, SecurityError>;

/// Result type alias for identity provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_error_texts_are_stable() {
        assert_eq!(
            ProtocolError::CookieLengthMismatch.to_string(),
            "Cookie length does not match with source cookie. Invalid secure cookie passed."
        );
        assert_eq!(
            ProtocolError::InvalidCookie.to_string(),
            "Invalid secure cookie passed."
        );
    }

    #[test]
    fn test_authentication_failure_classification() {
        assert!(ProtocolError::CookieLengthMismatch.is_authentication_failure());
        assert!(ProtocolError::InvalidCookie.is_authentication_failure());
        assert!(!ProtocolError::UnknownMessageId(9).is_authentication_failure());
    }

    #[test]
    fn test_module_install_error_names_module() {
        let err = SecurityError::ModuleInstall {
            module: "zookeeper",
            source: Box::new(SecurityError::MissingStrongCredentials {
                user: "alice".to_string(),
            }),
        };
        let text = err.to_string();
        assert!(text.contains("zookeeper"));
        assert!(text.contains("alice"));
    }

    #[test]
    fn test_node_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "test");
        let node_err: NodeError = io_err.into();
        assert!(matches!(node_err, NodeError::Connection(_)));
    }

    #[test]
    fn test_secured_error_is_transparent_for_operation() {
        let err: SecuredError<std::io::Error> =
            SecuredError::Operation(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.to_string(), "boom");
    }
}
