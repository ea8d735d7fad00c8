//! Secure cookie authentication tests.
//!
//! Codec-level checks run sender and receiver codecs against each other;
//! the TCP tests go through a real listener using `TestNode`.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder};

use dataplane_security_core::error::ProtocolError;
use dataplane_security_core::network::{
    DataPlaneCodec, DataPlaneMessage, InputChannelId, ResultPartitionId,
};
use dataplane_security_core::testing::TestNode;

fn codec(cookie: Option<&str>) -> DataPlaneCodec {
    DataPlaneCodec::new(cookie.map(str::to_string))
}

fn transfer(
    sender: Option<&str>,
    receiver: Option<&str>,
    message: DataPlaneMessage,
) -> Result<Option<DataPlaneMessage>, ProtocolError> {
    let mut buf = BytesMut::new();
    codec(sender).encode(message, &mut buf)?;
    codec(receiver).decode(&mut buf)
}

fn protected_messages() -> Vec<DataPlaneMessage> {
    vec![
        DataPlaneMessage::PartitionRequest {
            partition_id: ResultPartitionId::random(),
            queue_index: 17,
            receiver_id: InputChannelId::random(),
        },
        DataPlaneMessage::TaskEventRequest {
            event: Bytes::from_static(&[0, 0, 0, 42]),
            partition_id: ResultPartitionId::random(),
            receiver_id: InputChannelId::random(),
        },
        DataPlaneMessage::CancelPartitionRequest {
            receiver_id: InputChannelId::random(),
        },
        DataPlaneMessage::CloseRequest,
    ]
}

// =============================================================================
// Codec-level validation
// =============================================================================

#[test]
fn test_matching_cookies_deliver_every_protected_kind() {
    for message in protected_messages() {
        let decoded = transfer(Some("foo"), Some("foo"), message.clone()).unwrap();
        assert_eq!(decoded, Some(message));
    }
}

#[test]
fn test_receiver_without_secret_accepts_any_cookie() {
    for sender in [None, Some("foo"), Some("bar")] {
        for message in protected_messages() {
            let decoded = transfer(sender, None, message.clone()).unwrap();
            assert_eq!(decoded, Some(message));
        }
    }
}

#[test]
fn test_sender_without_cookie_gets_length_mismatch() {
    let message = DataPlaneMessage::TaskEventRequest {
        event: Bytes::from_static(b"event"),
        partition_id: ResultPartitionId::random(),
        receiver_id: InputChannelId::random(),
    };

    let err = transfer(None, Some("foo"), message).unwrap_err();
    assert!(matches!(err, ProtocolError::CookieLengthMismatch));
    assert_eq!(
        err.to_string(),
        "Cookie length does not match with source cookie. Invalid secure cookie passed."
    );
}

#[test]
fn test_sender_with_wrong_cookie_gets_invalid_cookie() {
    let message = DataPlaneMessage::TaskEventRequest {
        event: Bytes::from_static(b"event"),
        partition_id: ResultPartitionId::random(),
        receiver_id: InputChannelId::random(),
    };

    let err = transfer(Some("bar"), Some("foo"), message).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidCookie));
    assert_eq!(err.to_string(), "Invalid secure cookie passed.");
    assert!(err.is_authentication_failure());
}

#[test]
fn test_responses_are_not_authenticated() {
    let responses = vec![
        DataPlaneMessage::BufferResponse {
            sequence_number: 3,
            receiver_id: InputChannelId::random(),
            buffer: Bytes::from(vec![7u8; 256]),
        },
        DataPlaneMessage::fatal_error("IllegalStateException", "Illegal illegal illegal"),
    ];

    for message in responses {
        let decoded = transfer(None, Some("foo"), message.clone()).unwrap();
        assert_eq!(decoded, Some(message));
    }
}

// =============================================================================
// Over TCP
// =============================================================================

#[tokio::test]
async fn test_authenticated_requests_reach_handler() {
    let node = TestNode::start(Some("secret")).await;
    let mut client = node.connect(Some("secret")).await;

    let receiver_id = InputChannelId::random();
    let request = DataPlaneMessage::PartitionRequest {
        partition_id: ResultPartitionId::random(),
        queue_index: 0,
        receiver_id,
    };
    client.send(request.clone()).await.unwrap();
    client.send(DataPlaneMessage::CloseRequest).await.unwrap();

    // Connection closes after the close request
    let next = timeout(Duration::from_secs(2), client.next()).await.unwrap();
    assert!(next.is_none());

    assert_eq!(node.handler.requests().await, vec![request]);
    assert_eq!(
        node.metrics
            .protected_messages
            .with_label_values(&["PartitionRequest"])
            .get(),
        1
    );

    node.shutdown().await;
}

#[tokio::test]
async fn test_wrong_cookie_closes_connection_with_fatal_error() {
    let node = TestNode::start(Some("secret")).await;
    let mut client = node.connect(Some("guess")).await;

    client
        .send(DataPlaneMessage::CancelPartitionRequest {
            receiver_id: InputChannelId::random(),
        })
        .await
        .unwrap();

    let response = timeout(Duration::from_secs(2), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match response {
        DataPlaneMessage::ErrorResponse {
            receiver_id,
            message,
            ..
        } => {
            assert!(receiver_id.is_none());
            assert_eq!(message, "Invalid secure cookie passed.");
        }
        other => panic!("expected fatal error response, got {other:?}"),
    }

    let next = timeout(Duration::from_secs(2), client.next()).await.unwrap();
    assert!(next.is_none());
    assert!(node.handler.requests().await.is_empty());
    assert_eq!(
        node.metrics
            .cookie_failures
            .with_label_values(&["invalid"])
            .get(),
        1
    );

    node.shutdown().await;
}

#[tokio::test]
async fn test_missing_cookie_closes_connection() {
    let node = TestNode::start(Some("secret")).await;
    let mut client = node.connect(None).await;

    client.send(DataPlaneMessage::CloseRequest).await.unwrap();

    let response = timeout(Duration::from_secs(2), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(response.is_fatal_error());
    assert_eq!(
        node.metrics
            .cookie_failures
            .with_label_values(&["length_mismatch"])
            .get(),
        1
    );

    node.shutdown().await;
}

#[tokio::test]
async fn test_node_without_secret_accepts_any_client() {
    let node = TestNode::start(None).await;
    let mut client = node.connect(Some("anything")).await;

    let request = DataPlaneMessage::CancelPartitionRequest {
        receiver_id: InputChannelId::random(),
    };
    client.send(request.clone()).await.unwrap();
    client.send(DataPlaneMessage::CloseRequest).await.unwrap();

    let next = timeout(Duration::from_secs(2), client.next()).await.unwrap();
    assert!(next.is_none());
    assert_eq!(node.handler.requests().await, vec![request]);

    node.shutdown().await;
}
