//! Network layer for the data plane.
//!
//! This module provides:
//! - Wire messages exchanged between nodes
//! - Secure cookie authentication of protected messages
//! - The frame codec that applies it
//! - TCP listener and per-connection message loop

pub mod codec;
pub mod connection;
pub mod cookie;
pub mod listener;
pub mod message;

pub use codec::{DataPlaneCodec, DEFAULT_MAX_FRAME_SIZE};
pub use connection::{ConnectionHandler, RequestHandler};
pub use cookie::SecureCookieAuthenticator;
pub use listener::DataPlaneListener;
pub use message::{
    DataPlaneMessage, ExecutionAttemptId, InputChannelId, IntermediateResultPartitionId,
    MessageKind, ResultPartitionId, MAGIC_NUMBER,
};
