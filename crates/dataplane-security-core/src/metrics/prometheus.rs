//! Prometheus metrics for data-plane authentication and security bootstrap.

use prometheus::{IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{ProtocolError, SecurityError};

/// Security metrics collection.
pub struct SecurityMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// Rejected protected messages by failure reason.
    pub cookie_failures: IntCounterVec,

    /// Protected messages that passed cookie validation, by message kind.
    pub protected_messages: IntCounterVec,

    /// Non-authentication decode failures by error type.
    pub decode_errors: IntCounterVec,

    /// Current active data-plane connections.
    pub active_connections: IntGauge,

    /// Security module installs by module and outcome.
    pub module_installs: IntCounterVec,
}

impl SecurityMetrics {
    /// Create a new metrics collection.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let cookie_failures = IntCounterVec::new(
            Opts::new(
                "dataplane_cookie_failures_total",
                "Protected messages rejected by secure cookie validation",
            ),
            &["reason"],
        )
        .expect("metric creation should succeed");

        let protected_messages = IntCounterVec::new(
            Opts::new(
                "dataplane_protected_messages_total",
                "Protected messages accepted after secure cookie validation",
            ),
            &["kind"],
        )
        .expect("metric creation should succeed");

        let decode_errors = IntCounterVec::new(
            Opts::new(
                "dataplane_decode_errors_total",
                "Frame decode failures other than cookie rejections",
            ),
            &["error_type"],
        )
        .expect("metric creation should succeed");

        let active_connections = IntGauge::new(
            "dataplane_active_connections",
            "Current number of active data-plane connections",
        )
        .expect("metric creation should succeed");

        let module_installs = IntCounterVec::new(
            Opts::new(
                "security_module_installs_total",
                "Security module install attempts by module and outcome",
            ),
            &["module", "outcome"],
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(cookie_failures.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(protected_messages.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(decode_errors.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(active_connections.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(module_installs.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            cookie_failures,
            protected_messages,
            decode_errors,
            active_connections,
            module_installs,
        }
    }

    /// Record a protected message that passed validation.
    pub fn record_protected_message(&self, kind: &str) {
        self.protected_messages.with_label_values(&[kind]).inc();
    }

    /// Record a frame decode failure, split by cookie rejections and the rest.
    pub fn record_decode_error(&self, error: &ProtocolError) {
        match error {
            ProtocolError::CookieLengthMismatch => self
                .cookie_failures
                .with_label_values(&["length_mismatch"])
                .inc(),
            ProtocolError::InvalidCookie => {
                self.cookie_failures.with_label_values(&["invalid"]).inc();
            }
            other => self
                .decode_errors
                .with_label_values(&[error_type(other)])
                .inc(),
        }
    }

    /// Record the outcome of installing a module chain.
    ///
    /// `modules` are the chain's module names in order. A failed install is
    /// rolled back, so no module counts as a success then: the failing module
    /// counts as `failure`, modules installed before it (or all of them when
    /// the failure came after the chain) as `rolled_back`.
    pub fn record_chain_install(&self, modules: &[&str], error: Option<&SecurityError>) {
        let failed = match error {
            None => {
                for &module in modules {
                    self.module_installs
                        .with_label_values(&[module, "success"])
                        .inc();
                }
                return;
            }
            Some(SecurityError::ModuleInstall { module, .. }) => Some(*module),
            Some(_) => None,
        };

        for &module in modules {
            if Some(module) == failed {
                self.module_installs
                    .with_label_values(&[module, "failure"])
                    .inc();
                return;
            }
            self.module_installs
                .with_label_values(&[module, "rolled_back"])
                .inc();
        }
    }

    pub fn inc_connections(&self) {
        self.active_connections.inc();
    }

    pub fn dec_connections(&self) {
        self.active_connections.dec();
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for SecurityMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn error_type(error: &ProtocolError) -> &'static str {
    match error {
        ProtocolError::CookieLengthMismatch | ProtocolError::InvalidCookie => "cookie",
        ProtocolError::BadMagic(_) => "bad_magic",
        ProtocolError::UnknownMessageId(_) => "unknown_message",
        ProtocolError::FrameTooLarge { .. } => "frame_too_large",
        ProtocolError::Truncated(_) => "truncated",
        ProtocolError::TrailingBytes { .. } => "trailing_bytes",
        ProtocolError::InvalidUtf8(_) => "invalid_utf8",
        ProtocolError::Io(_) => "io",
    }
}
