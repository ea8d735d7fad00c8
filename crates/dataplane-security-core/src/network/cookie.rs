//! Secure cookie stamping and validation.
//!
//! Every protected message ends with a cookie field: a `u32` length followed
//! by the cookie's UTF-8 bytes. A length of zero means "no cookie".
//!
//! The receiver validates the incoming cookie against its own secret:
//!
//! | local secret | incoming | result |
//! |---|---|---|
//! | none | anything | accepted, cookie ignored |
//! | set | none | [`ProtocolError::CookieLengthMismatch`] |
//! | set | different | [`ProtocolError::InvalidCookie`] |
//! | set | equal | accepted |

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use super::message::{get_bytes, put_bytes};
use crate::error::ProtocolError;

/// Attaches and checks the shared secret of one connection endpoint.
///
/// The secret is fixed at construction and never renegotiated.
#[derive(Clone)]
pub struct SecureCookieAuthenticator {
    secret: Option<Bytes>,
}

impl SecureCookieAuthenticator {
    /// Create an authenticator. An empty secret is treated as no secret.
    #[must_use]
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret
                .filter(|s| !s.is_empty())
                .map(|s| Bytes::from(s.into_bytes())),
        }
    }

    /// Whether a local secret is configured.
    #[must_use]
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Append the cookie field for an outbound protected message.
    pub fn stamp(&self, dst: &mut BytesMut) {
        match &self.secret {
            Some(secret) => put_bytes(dst, secret),
            None => dst.put_u32(0),
        }
    }

    /// Read the cookie field of an inbound protected message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] if the field is incomplete.
    pub fn read_cookie(src: &mut Bytes) -> Result<Option<Bytes>, ProtocolError> {
        let cookie = get_bytes(src, "secure_cookie")?;
        Ok((!cookie.is_empty()).then_some(cookie))
    }

    /// Check an incoming cookie against the local secret.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::CookieLengthMismatch`] when a secret is
    /// required but none was sent, and [`ProtocolError::InvalidCookie`] when
    /// the cookies differ.
    pub fn validate(&self, incoming: Option<&[u8]>) -> Result<(), ProtocolError> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };

        match incoming {
            None => {
                warn!("protected message without secure cookie rejected");
                Err(ProtocolError::CookieLengthMismatch)
            }
            Some(cookie) if !constant_time_eq(secret, cookie) => {
                warn!("protected message with invalid secure cookie rejected");
                Err(ProtocolError::InvalidCookie)
            }
            Some(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for SecureCookieAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCookieAuthenticator")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Compare two byte strings without short-circuiting on the first difference.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamped(secret: Option<&str>) -> Bytes {
        let mut buf = BytesMut::new();
        SecureCookieAuthenticator::new(secret.map(str::to_string)).stamp(&mut buf);
        buf.freeze()
    }

    #[test]
    fn test_stamp_with_secret() {
        let bytes = stamped(Some("foo"));
        assert_eq!(&bytes[..], &[0, 0, 0, 3, b'f', b'o', b'o']);
    }

    #[test]
    fn test_stamp_without_secret() {
        assert_eq!(&stamped(None)[..], &[0, 0, 0, 0]);
        assert_eq!(&stamped(Some(""))[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_read_cookie() {
        let mut bytes = stamped(Some("foo"));
        let cookie = SecureCookieAuthenticator::read_cookie(&mut bytes).unwrap();
        assert_eq!(cookie.as_deref(), Some(&b"foo"[..]));

        let mut bytes = stamped(None);
        assert!(SecureCookieAuthenticator::read_cookie(&mut bytes)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_read_truncated_cookie() {
        let mut bytes = Bytes::from_static(&[0, 0, 0, 5, b'a']);
        assert!(matches!(
            SecureCookieAuthenticator::read_cookie(&mut bytes),
            Err(ProtocolError::Truncated("secure_cookie"))
        ));
    }

    #[test]
    fn test_no_local_secret_accepts_anything() {
        let auth = SecureCookieAuthenticator::new(None);
        assert!(!auth.has_secret());
        assert!(auth.validate(None).is_ok());
        assert!(auth.validate(Some(b"anything")).is_ok());
    }

    #[test]
    fn test_missing_cookie_is_length_mismatch() {
        let auth = SecureCookieAuthenticator::new(Some("foo".to_string()));
        let err = auth.validate(None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cookie length does not match with source cookie. Invalid secure cookie passed."
        );
    }

    #[test]
    fn test_different_cookie_is_invalid() {
        let auth = SecureCookieAuthenticator::new(Some("foo".to_string()));
        let err = auth.validate(Some(b"bar")).unwrap_err();
        assert_eq!(err.to_string(), "Invalid secure cookie passed.");

        let err = auth.validate(Some(b"foobar")).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidCookie));
    }

    #[test]
    fn test_matching_cookie_accepted() {
        let auth = SecureCookieAuthenticator::new(Some("foo".to_string()));
        assert!(auth.validate(Some(b"foo")).is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let auth = SecureCookieAuthenticator::new(Some("hunter2".to_string()));
        assert!(!format!("{auth:?}").contains("hunter2"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"", b""));
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
