//! Data-plane messages exchanged between nodes.
//!
//! Only the messages needed to carry the authentication envelope are
//! modelled. Request kinds sent by consumers to producers are protected by
//! the secure cookie; responses flowing back are not.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;

use crate::error::ProtocolError;

/// Magic number at the start of every frame body.
pub const MAGIC_NUMBER: u32 = 0xBADC_0FFE;

/// Bytes of a frame after the length prefix that precede the message body.
pub const FRAME_HEADER_LENGTH: usize = 4 + 1;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            lower: u64,
            upper: u64,
        }

        impl $name {
            #[must_use]
            pub fn new(lower: u64, upper: u64) -> Self {
                Self { lower, upper }
            }

            /// Generate a random identifier.
            #[must_use]
            pub fn random() -> Self {
                let mut rng = rand::thread_rng();
                Self::new(rng.gen(), rng.gen())
            }

            fn write_to(&self, dst: &mut BytesMut) {
                dst.put_u64(self.lower);
                dst.put_u64(self.upper);
            }

            fn read_from(src: &mut Bytes) -> Result<Self, ProtocolError> {
                ensure(src, 16, stringify!($name))?;
                Ok(Self::new(src.get_u64(), src.get_u64()))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:016x}{:016x}", self.lower, self.upper)
            }
        }
    };
}

define_id!(
    /// Identifies the receiving input channel of a consumer task.
    InputChannelId
);
define_id!(
    /// Identifies an intermediate result partition.
    IntermediateResultPartitionId
);
define_id!(
    /// Identifies one execution attempt of a task.
    ExecutionAttemptId
);

/// A result partition produced by a specific execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultPartitionId {
    pub partition_id: IntermediateResultPartitionId,
    pub producer_id: ExecutionAttemptId,
}

impl ResultPartitionId {
    #[must_use]
    pub fn new(partition_id: IntermediateResultPartitionId, producer_id: ExecutionAttemptId) -> Self {
        Self {
            partition_id,
            producer_id,
        }
    }

    #[must_use]
    pub fn random() -> Self {
        Self::new(
            IntermediateResultPartitionId::random(),
            ExecutionAttemptId::random(),
        )
    }

    fn write_to(&self, dst: &mut BytesMut) {
        self.partition_id.write_to(dst);
        self.producer_id.write_to(dst);
    }

    fn read_from(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            IntermediateResultPartitionId::read_from(src)?,
            ExecutionAttemptId::read_from(src)?,
        ))
    }
}

impl fmt::Display for ResultPartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition_id, self.producer_id)
    }
}

/// Message kinds and their wire identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    BufferResponse,
    ErrorResponse,
    PartitionRequest,
    TaskEventRequest,
    CancelPartitionRequest,
    CloseRequest,
}

impl MessageKind {
    /// Wire identifier of the kind.
    #[must_use]
    pub fn id(self) -> u8 {
        match self {
            Self::BufferResponse => 0,
            Self::ErrorResponse => 1,
            Self::PartitionRequest => 2,
            Self::TaskEventRequest => 3,
            Self::CancelPartitionRequest => 4,
            Self::CloseRequest => 5,
        }
    }

    /// Whether messages of this kind carry and require the secure cookie.
    #[must_use]
    pub fn is_protected(self) -> bool {
        !matches!(self, Self::BufferResponse | Self::ErrorResponse)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::BufferResponse => "BufferResponse",
            Self::ErrorResponse => "ErrorResponse",
            Self::PartitionRequest => "PartitionRequest",
            Self::TaskEventRequest => "TaskEventRequest",
            Self::CancelPartitionRequest => "CancelPartitionRequest",
            Self::CloseRequest => "CloseRequest",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Ok(match id {
            0 => Self::BufferResponse,
            1 => Self::ErrorResponse,
            2 => Self::PartitionRequest,
            3 => Self::TaskEventRequest,
            4 => Self::CancelPartitionRequest,
            5 => Self::CloseRequest,
            other => return Err(ProtocolError::UnknownMessageId(other)),
        })
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A data-plane message.
///
/// The secure cookie is not part of the message; the codec attaches it to
/// protected kinds on encode and strips it on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataPlaneMessage {
    /// A buffer of records for a receiving input channel.
    BufferResponse {
        sequence_number: i32,
        receiver_id: InputChannelId,
        buffer: Bytes,
    },

    /// An error reported to a receiver, or to the whole connection when
    /// `receiver_id` is `None`.
    ErrorResponse {
        receiver_id: Option<InputChannelId>,
        error_class: String,
        message: String,
    },

    /// Request to start consuming a result partition subpartition.
    PartitionRequest {
        partition_id: ResultPartitionId,
        queue_index: i32,
        receiver_id: InputChannelId,
    },

    /// A serialized task event sent to the producer of a partition.
    TaskEventRequest {
        event: Bytes,
        partition_id: ResultPartitionId,
        receiver_id: InputChannelId,
    },

    /// Request to stop sending to a receiver.
    CancelPartitionRequest { receiver_id: InputChannelId },

    /// Request to close the connection.
    CloseRequest,
}

impl DataPlaneMessage {
    /// An error that applies to the whole connection.
    #[must_use]
    pub fn fatal_error(error_class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ErrorResponse {
            receiver_id: None,
            error_class: error_class.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::BufferResponse { .. } => MessageKind::BufferResponse,
            Self::ErrorResponse { .. } => MessageKind::ErrorResponse,
            Self::PartitionRequest { .. } => MessageKind::PartitionRequest,
            Self::TaskEventRequest { .. } => MessageKind::TaskEventRequest,
            Self::CancelPartitionRequest { .. } => MessageKind::CancelPartitionRequest,
            Self::CloseRequest => MessageKind::CloseRequest,
        }
    }

    /// Whether this message carries and requires the secure cookie.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.kind().is_protected()
    }

    /// Whether this is an error response for the whole connection.
    #[must_use]
    pub fn is_fatal_error(&self) -> bool {
        matches!(
            self,
            Self::ErrorResponse {
                receiver_id: None,
                ..
            }
        )
    }

    /// Write the message body, without header or cookie.
    pub(crate) fn encode_body(&self, dst: &mut BytesMut) {
        match self {
            Self::BufferResponse {
                sequence_number,
                receiver_id,
                buffer,
            } => {
                receiver_id.write_to(dst);
                dst.put_i32(*sequence_number);
                // Buffer runs to the end of the frame
                dst.extend_from_slice(buffer);
            }
            Self::ErrorResponse {
                receiver_id,
                error_class,
                message,
            } => {
                match receiver_id {
                    Some(id) => {
                        dst.put_u8(1);
                        id.write_to(dst);
                    }
                    None => dst.put_u8(0),
                }
                put_string(dst, error_class);
                put_string(dst, message);
            }
            Self::PartitionRequest {
                partition_id,
                queue_index,
                receiver_id,
            } => {
                partition_id.write_to(dst);
                dst.put_i32(*queue_index);
                receiver_id.write_to(dst);
            }
            Self::TaskEventRequest {
                event,
                partition_id,
                receiver_id,
            } => {
                put_bytes(dst, event);
                partition_id.write_to(dst);
                receiver_id.write_to(dst);
            }
            Self::CancelPartitionRequest { receiver_id } => receiver_id.write_to(dst),
            Self::CloseRequest => {}
        }
    }

    /// Read a message body of the given kind. For protected kinds the
    /// cookie field is left in `src`.
    pub(crate) fn decode_body(kind: MessageKind, src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(match kind {
            MessageKind::BufferResponse => {
                let receiver_id = InputChannelId::read_from(src)?;
                ensure(src, 4, "sequence_number")?;
                let sequence_number = src.get_i32();
                Self::BufferResponse {
                    sequence_number,
                    receiver_id,
                    buffer: src.split_off(0),
                }
            }
            MessageKind::ErrorResponse => {
                ensure(src, 1, "receiver_flag")?;
                let receiver_id = match src.get_u8() {
                    0 => None,
                    _ => Some(InputChannelId::read_from(src)?),
                };
                Self::ErrorResponse {
                    receiver_id,
                    error_class: get_string(src, "error_class")?,
                    message: get_string(src, "message")?,
                }
            }
            MessageKind::PartitionRequest => {
                let partition_id = ResultPartitionId::read_from(src)?;
                ensure(src, 4, "queue_index")?;
                let queue_index = src.get_i32();
                Self::PartitionRequest {
                    partition_id,
                    queue_index,
                    receiver_id: InputChannelId::read_from(src)?,
                }
            }
            MessageKind::TaskEventRequest => Self::TaskEventRequest {
                event: get_bytes(src, "event")?,
                partition_id: ResultPartitionId::read_from(src)?,
                receiver_id: InputChannelId::read_from(src)?,
            },
            MessageKind::CancelPartitionRequest => Self::CancelPartitionRequest {
                receiver_id: InputChannelId::read_from(src)?,
            },
            MessageKind::CloseRequest => Self::CloseRequest,
        })
    }
}

pub(crate) fn ensure(src: &Bytes, needed: usize, field: &'static str) -> Result<(), ProtocolError> {
    if src.remaining() < needed {
        return Err(ProtocolError::Truncated(field));
    }
    Ok(())
}

pub(crate) fn put_bytes(dst: &mut BytesMut, value: &[u8]) {
    dst.put_u32(value.len() as u32);
    dst.extend_from_slice(value);
}

pub(crate) fn get_bytes(src: &mut Bytes, field: &'static str) -> Result<Bytes, ProtocolError> {
    ensure(src, 4, field)?;
    let len = src.get_u32() as usize;
    ensure(src, len, field)?;
    Ok(src.split_to(len))
}

fn put_string(dst: &mut BytesMut, value: &str) {
    put_bytes(dst, value.as_bytes());
}

fn get_string(src: &mut Bytes, field: &'static str) -> Result<String, ProtocolError> {
    let bytes = get_bytes(src, field)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
}
