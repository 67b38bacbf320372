//! Data descriptors for posted work requests.
//!
//! A [`Data`] owns a byte buffer with a fixed maximum size. Ownership moves
//! into the transport when a send or receive is posted and comes back to the
//! caller through the completion callback, which makes the "caller owns the
//! buffer between post and completion" contract a property of the types.

use crate::error::{CoreError, Result};
use bytes::{Bytes, BytesMut};

/// Payload buffer handed to a send or receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    buf: BytesMut,
    max_size: usize,
}

impl Data {
    /// Creates an empty descriptor able to hold up to `max_size` bytes.
    ///
    /// Use this for receives.
    #[must_use]
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_size),
            max_size,
        }
    }

    /// Creates a descriptor holding a copy of `bytes`.
    ///
    /// The maximum size equals the payload length.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(bytes),
            max_size: bytes.len(),
        }
    }

    /// Number of valid payload bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Maximum number of bytes the descriptor accepts.
    #[inline]
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns true if no payload bytes are held.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the payload.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Replaces the payload with a copy of `src`.
    ///
    /// # Errors
    /// Returns `BufferTooShort` if `src` exceeds the maximum size. The
    /// previous payload is left untouched in that case.
    pub fn fill_from(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > self.max_size {
            return Err(CoreError::BufferTooShort {
                required: src.len(),
                available: self.max_size,
            });
        }
        self.buf.clear();
        self.buf.extend_from_slice(src);
        Ok(())
    }

    /// Drops the payload, keeping the maximum size.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Consumes the descriptor and returns the payload as frozen bytes.
    #[must_use]
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

impl AsRef<[u8]> for Data {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl From<Vec<u8>> for Data {
    fn from(bytes: Vec<u8>) -> Self {
        let max_size = bytes.len();
        Self {
            buf: BytesMut::from(&bytes[..]),
            max_size,
        }
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Self::from_slice(s.as_bytes())
    }
}
