//! Data-plane frame codec.
//!
//! Implements tokio's `Decoder` and `Encoder` traits for the data-plane wire
//! format and applies secure cookie authentication to protected messages.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::cookie::SecureCookieAuthenticator;
use super::message::{DataPlaneMessage, MessageKind, FRAME_HEADER_LENGTH, MAGIC_NUMBER};
use crate::error::ProtocolError;

/// Maximum frame size (100 MB by default).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Codec for data-plane frames.
///
/// Frames are laid out as:
/// - 4 bytes: frame length (big-endian, excludes these 4 bytes)
/// - 4 bytes: magic number `0xBADC0FFE`
/// - 1 byte: message id
/// - N bytes: message body, followed by the cookie field for protected kinds
///
/// A cookie validation failure is returned as a decode error. `Framed`
/// streams end after the first decode error, so the connection does not
/// deliver further messages.
#[derive(Debug, Clone)]
pub struct DataPlaneCodec {
    max_frame_size: usize,
    authenticator: SecureCookieAuthenticator,
}

impl DataPlaneCodec {
    /// Create a codec for an endpoint with the given secret.
    #[must_use]
    pub fn new(secure_cookie: Option<String>) -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            authenticator: SecureCookieAuthenticator::new(secure_cookie),
        }
    }

    /// Set a custom max frame size.
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    #[must_use]
    pub fn authenticator(&self) -> &SecureCookieAuthenticator {
        &self.authenticator
    }
}

impl Decoder for DataPlaneCodec {
    type Item = DataPlaneMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least 4 bytes for the length prefix
        if src.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        if length < FRAME_HEADER_LENGTH {
            return Err(ProtocolError::Truncated("frame header"));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let mut frame = src.split_to(length).freeze();

        let magic = frame.get_u32();
        if magic != MAGIC_NUMBER {
            return Err(ProtocolError::BadMagic(magic));
        }

        let kind = MessageKind::try_from(frame.get_u8())?;
        let message = DataPlaneMessage::decode_body(kind, &mut frame)?;

        if kind.is_protected() {
            let cookie = SecureCookieAuthenticator::read_cookie(&mut frame)?;
            self.authenticator.validate(cookie.as_deref())?;
        }

        if frame.has_remaining() {
            return Err(ProtocolError::TrailingBytes {
                kind: kind.name(),
                remaining: frame.remaining(),
            });
        }

        trace!(kind = %kind, length, "decoded frame");
        Ok(Some(message))
    }
}

impl Encoder<DataPlaneMessage> for DataPlaneCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: DataPlaneMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();

        // Length is patched in once the body is written
        dst.put_u32(0);
        dst.put_u32(MAGIC_NUMBER);
        dst.put_u8(item.kind().id());
        item.encode_body(dst);
        if item.is_protected() {
            self.authenticator.stamp(dst);
        }

        let length = dst.len() - start - 4;
        if length > self.max_frame_size {
            dst.truncate(start);
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }
        dst[start..start + 4].copy_from_slice(&(length as u32).to_be_bytes());

        Ok(())
    }
}
