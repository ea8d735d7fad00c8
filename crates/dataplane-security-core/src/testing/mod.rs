//! Test utilities for the data-plane security node.
//!
//! - [`MockIdentityProvider`] - A recording identity provider for bootstrap tests
//! - [`TestNode`] - A listener on an ephemeral port with a recording request handler
//!
//! # Example
//!
//! ```rust,ignore
//! use dataplane_security_core::testing::TestNode;
//!
//! #[tokio::test]
//! async fn test_close_request() {
//!     let node = TestNode::start(Some("secret")).await;
//!     let mut client = node.connect(Some("secret")).await;
//!     // ...
//! }
//! ```

pub mod harness;
pub mod mock_identity;

pub use harness::{RecordingHandler, TestNode};
pub use mock_identity::{MockIdentityProvider, ProviderCall};
