//! Test harness for end-to-end data-plane tests.
//!
//! Provides a running listener on an ephemeral port with:
//! - A recording request handler
//! - Metrics for asserting on cookie failures
//! - Helpers for connecting clients with a chosen cookie

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::config::ListenConfig;
use crate::error::Result;
use crate::metrics::SecurityMetrics;
use crate::network::{DataPlaneCodec, DataPlaneListener, DataPlaneMessage, RequestHandler};

/// Request handler that records every request it receives.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    requests: RwLock<Vec<DataPlaneMessage>>,
}

impl RecordingHandler {
    /// All requests received so far.
    pub async fn requests(&self) -> Vec<DataPlaneMessage> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl RequestHandler for RecordingHandler {
    async fn handle(
        &self,
        _peer: SocketAddr,
        request: DataPlaneMessage,
    ) -> Result<Option<DataPlaneMessage>> {
        self.requests.write().await.push(request);
        Ok(None)
    }
}

/// A data-plane listener running on `127.0.0.1` for the duration of a test.
pub struct TestNode {
    address: SocketAddr,
    /// The handler behind the listener.
    pub handler: Arc<RecordingHandler>,
    /// Metrics recorded by the listener.
    pub metrics: Arc<SecurityMetrics>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl TestNode {
    /// Start a node that requires `secure_cookie`, or none.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot bind.
    pub async fn start(secure_cookie: Option<&str>) -> Self {
        let handler = Arc::new(RecordingHandler::default());
        let metrics = Arc::new(SecurityMetrics::new());
        let config = ListenConfig {
            address: "127.0.0.1:0".to_string(),
            ..ListenConfig::default()
        };

        let listener = DataPlaneListener::bind(
            &config,
            secure_cookie.map(str::to_string),
            Arc::clone(&handler) as Arc<dyn RequestHandler>,
        )
        .await
        .expect("Failed to bind test listener")
        .with_metrics(Arc::clone(&metrics));

        let address = listener.local_addr().expect("Failed to read local address");
        let shutdown_tx = listener.shutdown_handle();
        let task = tokio::spawn(async move { listener.run().await });

        Self {
            address,
            handler,
            metrics,
            shutdown_tx,
            task,
        }
    }

    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Connect a client whose codec stamps `secure_cookie`.
    ///
    /// # Panics
    ///
    /// Panics if the connection fails.
    pub async fn connect(&self, secure_cookie: Option<&str>) -> Framed<TcpStream, DataPlaneCodec> {
        let stream = TcpStream::connect(self.address)
            .await
            .expect("Failed to connect to test node");
        Framed::new(stream, DataPlaneCodec::new(secure_cookie.map(str::to_string)))
    }

    /// Stop the listener and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}
