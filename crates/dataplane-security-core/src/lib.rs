//! Data-plane Security Core Library
//!
//! This library establishes the security identity of a processing node and
//! authenticates the node's internal data-plane traffic with a shared secret.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`security`] - Security module chain, login configuration and process identity
//! - [`network`] - Data-plane wire codec with secure cookie authentication
//! - [`metrics`] - Prometheus metrics collection
//!
//! # Example
//!
//! ```rust,ignore
//! use dataplane_security_core::config::NodeConfig;
//! use dataplane_security_core::security::SecurityConfiguration;
//!
//! // Load configuration
//! let config = NodeConfig::from_file("node.yaml")?;
//! let security = SecurityConfiguration::from_config(&config.security)?;
//!
//! // Install the security context, then start the data plane
//! // ...
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod network;
pub mod security;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use config::NodeConfig;
pub use error::{
    ConfigError, NodeError, ProtocolError, ProviderError, Result, SecuredError, SecurityError,
};
pub use metrics::SecurityMetrics;
pub use network::{DataPlaneCodec, DataPlaneListener, DataPlaneMessage, RequestHandler};
pub use security::{SecurityConfiguration, SecurityContext, SecurityContextCell};
