//! Metrics collection for the data-plane security node.
//!
//! Provides Prometheus-compatible metrics for secure cookie validation,
//! connections and security bootstrap.

pub mod prometheus;

pub use prometheus::SecurityMetrics;
