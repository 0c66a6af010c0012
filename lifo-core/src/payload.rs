//! Opaque stack payloads.

use crate::error::{LifoError, Result};
use bytes::Bytes;
use std::ops::Deref;

/// Largest payload the 7-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = 0x7F;

/// An immutable byte sequence of 0 to [`MAX_PAYLOAD_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload(Bytes);

impl Payload {
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() > MAX_PAYLOAD_LEN {
            return Err(LifoError::PayloadTooLarge(bytes.len()));
        }
        Ok(Self(bytes))
    }

    /// Length as it appears in the low 7 bits of a header byte.
    #[inline]
    #[must_use]
    pub fn wire_len(&self) -> u8 {
        // new() guarantees len <= 0x7F
        (self.0.len() & MAX_PAYLOAD_LEN) as u8
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&'static [u8]> for Payload {
    type Error = LifoError;

    fn try_from(value: &'static [u8]) -> Result<Self> {
        Self::new(Bytes::from_static(value))
    }
}

impl TryFrom<Vec<u8>> for Payload {
    type Error = LifoError;

    fn try_from(value: Vec<u8>) -> Result<Self> {
        Self::new(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_bounds() {
        assert!(Payload::new(Bytes::new()).is_ok());
        assert!(Payload::new(vec![0u8; MAX_PAYLOAD_LEN]).is_ok());

        let err = Payload::new(vec![0u8; MAX_PAYLOAD_LEN + 1]).unwrap_err();
        assert!(matches!(err, LifoError::PayloadTooLarge(128)));
    }

    #[test]
    fn test_wire_len() {
        let payload = Payload::try_from(&b"AB"[..]).unwrap();
        assert_eq!(payload.wire_len(), 2);
        assert_eq!(&*payload, b"AB");

        let full = Payload::new(vec![7u8; MAX_PAYLOAD_LEN]).unwrap();
        assert_eq!(full.wire_len(), 0x7F);
    }
}
