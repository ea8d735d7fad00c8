//! Per-connection message loop.
//!
//! Decodes inbound frames, dispatches requests to the [`RequestHandler`] and
//! writes its responses back. Protected requests only reach the handler
//! after the codec has validated their secure cookie.
//!
//! A decode error ends the connection. Before closing, the peer is sent a
//! fatal [`DataPlaneMessage::ErrorResponse`] carrying the error text.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

use crate::error::{NodeError, ProtocolError, Result};
use crate::metrics::SecurityMetrics;

use super::codec::DataPlaneCodec;
use super::message::DataPlaneMessage;

/// Error class reported to peers whose cookie was rejected.
pub const AUTHENTICATION_ERROR_CLASS: &str = "SecureCookieException";

/// Error class reported to peers that sent a malformed frame.
pub const PROTOCOL_ERROR_CLASS: &str = "ProtocolException";

/// Application logic behind the data-plane endpoint.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one authenticated request, optionally returning a response.
    ///
    /// # Errors
    ///
    /// Returning an error closes the connection.
    async fn handle(
        &self,
        peer: SocketAddr,
        request: DataPlaneMessage,
    ) -> Result<Option<DataPlaneMessage>>;
}

/// Handles messages for a single peer connection.
pub struct ConnectionHandler {
    codec: DataPlaneCodec,
    handler: Arc<dyn RequestHandler>,
    metrics: Option<Arc<SecurityMetrics>>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    #[must_use]
    pub fn new(
        codec: DataPlaneCodec,
        handler: Arc<dyn RequestHandler>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            codec,
            handler,
            metrics: None,
            shutdown_rx,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<SecurityMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Process messages until the peer disconnects, sends a close request,
    /// or shutdown is signalled.
    ///
    /// # Errors
    ///
    /// Returns the decode error that closed the connection, a handler error,
    /// a transport error, or [`NodeError::Shutdown`].
    #[instrument(skip(self, stream), fields(peer = %peer))]
    pub async fn handle<S>(mut self, stream: S, peer: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!("peer connected");
        let mut framed = Framed::new(stream, self.codec.clone());

        loop {
            tokio::select! {
                result = framed.next() => {
                    match result {
                        Some(Ok(message)) => {
                            let kind = message.kind();
                            if kind.is_protected() {
                                if let Some(metrics) = &self.metrics {
                                    metrics.record_protected_message(kind.name());
                                }
                            }
                            debug!(kind = %kind, "received message");

                            if matches!(message, DataPlaneMessage::CloseRequest) {
                                debug!("close requested by peer");
                                break;
                            }

                            if let Some(response) = self.handler.handle(peer, message).await? {
                                framed.send(response).await?;
                            }
                        }
                        Some(Err(e)) => {
                            if let Some(metrics) = &self.metrics {
                                metrics.record_decode_error(&e);
                            }
                            return Err(Self::reject(&mut framed, e).await);
                        }
                        None => {
                            debug!("peer disconnected");
                            break;
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    debug!("shutdown during connection handling");
                    return Err(NodeError::Shutdown);
                }
            }
        }

        Ok(())
    }

    /// Report a decode error to the peer as a fatal error response.
    async fn reject<S>(framed: &mut Framed<S, DataPlaneCodec>, error: ProtocolError) -> NodeError
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if matches!(error, ProtocolError::Io(_)) {
            return error.into();
        }

        let error_class = if error.is_authentication_failure() {
            AUTHENTICATION_ERROR_CLASS
        } else {
            PROTOCOL_ERROR_CLASS
        };
        warn!(error = %error, error_class, "closing connection after decode error");

        let response = DataPlaneMessage::fatal_error(error_class, error.to_string());
        if let Err(send_error) = framed.send(response).await {
            debug!(error = %send_error, "failed to send error response");
        }
        error.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::InputChannelId;
    use tokio::io::duplex;

    #[derive(Default)]
    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(
            &self,
            _peer: SocketAddr,
            request: DataPlaneMessage,
        ) -> Result<Option<DataPlaneMessage>> {
            Ok(Some(DataPlaneMessage::fatal_error(
                "Echo",
                request.kind().name(),
            )))
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:6121".parse().unwrap()
    }

    fn spawn_server(
        cookie: Option<&str>,
        metrics: Arc<SecurityMetrics>,
    ) -> (
        tokio::io::DuplexStream,
        broadcast::Sender<()>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let (client, server) = duplex(64 * 1024);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handler = ConnectionHandler::new(
            DataPlaneCodec::new(cookie.map(str::to_string)),
            Arc::new(EchoHandler),
            shutdown_rx,
        )
        .with_metrics(metrics);
        let task = tokio::spawn(handler.handle(server, peer()));
        (client, shutdown_tx, task)
    }

    #[tokio::test]
    async fn test_dispatches_authenticated_request() {
        let metrics = Arc::new(SecurityMetrics::new());
        let (client, _shutdown, task) = spawn_server(Some("foo"), Arc::clone(&metrics));
        let mut client = Framed::new(client, DataPlaneCodec::new(Some("foo".to_string())));

        client
            .send(DataPlaneMessage::CancelPartitionRequest {
                receiver_id: InputChannelId::random(),
            })
            .await
            .unwrap();
        let response = client.next().await.unwrap().unwrap();
        assert_eq!(
            response,
            DataPlaneMessage::fatal_error("Echo", "CancelPartitionRequest")
        );

        client.send(DataPlaneMessage::CloseRequest).await.unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(
            metrics
                .protected_messages
                .with_label_values(&["CancelPartitionRequest"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_rejects_wrong_cookie_with_fatal_error() {
        let metrics = Arc::new(SecurityMetrics::new());
        let (client, _shutdown, task) = spawn_server(Some("foo"), Arc::clone(&metrics));
        // Responses are unprotected, so the client's secret does not matter for reading
        let mut client = Framed::new(client, DataPlaneCodec::new(Some("bar".to_string())));

        client.send(DataPlaneMessage::CloseRequest).await.unwrap();

        let response = client.next().await.unwrap().unwrap();
        assert!(response.is_fatal_error());
        assert_eq!(
            response,
            DataPlaneMessage::fatal_error(AUTHENTICATION_ERROR_CLASS, "Invalid secure cookie passed.")
        );

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(NodeError::Protocol(ProtocolError::InvalidCookie))
        ));
        assert_eq!(
            metrics.cookie_failures.with_label_values(&["invalid"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_rejects_missing_cookie() {
        let metrics = Arc::new(SecurityMetrics::new());
        let (client, _shutdown, task) = spawn_server(Some("foo"), metrics);
        let mut client = Framed::new(client, DataPlaneCodec::new(None));

        client.send(DataPlaneMessage::CloseRequest).await.unwrap();

        let response = client.next().await.unwrap().unwrap();
        match response {
            DataPlaneMessage::ErrorResponse { message, .. } => assert_eq!(
                message,
                "Cookie length does not match with source cookie. Invalid secure cookie passed."
            ),
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(matches!(
            task.await.unwrap(),
            Err(NodeError::Protocol(ProtocolError::CookieLengthMismatch))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_ends_connection() {
        let metrics = Arc::new(SecurityMetrics::new());
        let (_client, shutdown, task) = spawn_server(None, metrics);

        shutdown.send(()).unwrap();
        assert!(matches!(task.await.unwrap(), Err(NodeError::Shutdown)));
    }

    #[tokio::test]
    async fn test_peer_disconnect_ends_connection() {
        let metrics = Arc::new(SecurityMetrics::new());
        let (client, _shutdown, task) = spawn_server(None, metrics);

        drop(client);
        task.await.unwrap().unwrap();
    }
}
