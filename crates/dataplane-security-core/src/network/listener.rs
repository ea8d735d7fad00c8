//! TCP listener for data-plane connections.
//!
//! The listener accepts connections and spawns a task for each one,
//! delegating to the connection handler for message processing. Every
//! connection gets its own codec built from the node's secure cookie.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ListenConfig;
use crate::error::{NodeError, Result};
use crate::metrics::SecurityMetrics;

use super::codec::DataPlaneCodec;
use super::connection::{ConnectionHandler, RequestHandler};

/// TCP listener that accepts data-plane connections.
pub struct DataPlaneListener {
    listener: TcpListener,
    max_connections: usize,
    codec: DataPlaneCodec,
    handler: Arc<dyn RequestHandler>,
    metrics: Option<Arc<SecurityMetrics>>,
    shutdown_tx: broadcast::Sender<()>,
    active_connections: Arc<AtomicUsize>,
}

impl DataPlaneListener {
    /// Bind to the configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the listen address fails.
    pub async fn bind(
        config: &ListenConfig,
        secure_cookie: Option<String>,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&config.address).await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            listener,
            max_connections: config.max_connections,
            codec: DataPlaneCodec::new(secure_cookie).with_max_frame_size(config.max_frame_size),
            handler,
            metrics: None,
            shutdown_tx,
            active_connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<SecurityMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The bound address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get a shutdown handle to signal the listener to stop.
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Get the current number of active connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Accept connections until shutdown.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; accept errors are logged and skipped.
    #[instrument(skip(self), fields(address = ?self.listener.local_addr().ok()))]
    pub async fn run(&self) -> Result<()> {
        info!(
            authenticated = self.codec.authenticator().has_secret(),
            "data plane listening"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let current = self.active_connections.load(Ordering::Relaxed);

                            if current >= self.max_connections {
                                warn!(
                                    peer = %addr,
                                    active = current,
                                    max = self.max_connections,
                                    "connection rejected: limit reached"
                                );
                                continue;
                            }

                            self.active_connections.fetch_add(1, Ordering::Relaxed);
                            debug!(peer = %addr, active = current + 1, "accepted connection");
                            self.spawn_connection(socket, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        let active = self.active_connections.load(Ordering::Relaxed);
        if active > 0 {
            info!(active, "connections still open at shutdown");
        }

        Ok(())
    }

    fn spawn_connection(&self, socket: tokio::net::TcpStream, addr: SocketAddr) {
        let mut handler = ConnectionHandler::new(
            self.codec.clone(),
            Arc::clone(&self.handler),
            self.shutdown_tx.subscribe(),
        );
        if let Some(metrics) = &self.metrics {
            metrics.inc_connections();
            handler = handler.with_metrics(Arc::clone(metrics));
        }
        let metrics = self.metrics.clone();
        let active_connections = Arc::clone(&self.active_connections);

        tokio::spawn(async move {
            if let Err(e) = handler.handle(socket, addr).await {
                match &e {
                    NodeError::Shutdown => {
                        debug!(peer = %addr, "connection closed: shutdown");
                    }
                    NodeError::Protocol(p) if p.is_authentication_failure() => {
                        warn!(peer = %addr, error = %e, "connection closed: authentication failed");
                    }
                    NodeError::Connection(io_err)
                        if io_err.kind() == std::io::ErrorKind::UnexpectedEof =>
                    {
                        debug!(peer = %addr, "peer disconnected");
                    }
                    _ => {
                        error!(peer = %addr, error = %e, "connection error");
                    }
                }
            }
            if let Some(metrics) = metrics {
                metrics.dec_connections();
            }
            active_connections.fetch_sub(1, Ordering::Relaxed);
        });
    }
}
