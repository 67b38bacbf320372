//! Error types for transport operations.

use shmqp_core::{CoreError, State};
use thiserror::Error;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// IO error, including failed System V IPC calls.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Descriptor or attribute error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The connection rendezvous did not complete in time.
    #[error("connection timeout")]
    ConnectTimeout,

    /// A blocking post or wait exceeded the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// Transport was destroyed locally or the peer went away.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport has not been connected yet.
    #[error("transport not connected")]
    NotConnected,

    /// Operation is not valid in the current state.
    #[error("invalid state: expected {expected}, found {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: State,
        /// State the transport is in.
        actual: State,
    },

    /// Operation belongs to the other role.
    #[error("operation requires the {expected} role")]
    WrongRole {
        /// Role the operation requires.
        expected: shmqp_core::Role,
    },

    /// Frame too large for the mailbox or the receive buffer.
    #[error("frame too large: {size} bytes exceeds maximum {max} bytes")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// IPC error.
    #[error("IPC error: {message}")]
    Ipc {
        /// Error message.
        message: String,
    },
}

impl TransportError {
    /// Creates a frame too large error.
    pub fn frame_too_large(size: usize, max: usize) -> Self {
        Self::FrameTooLarge { size, max }
    }

    /// Creates an IPC error.
    pub fn ipc(message: impl Into<String>) -> Self {
        Self::Ipc {
            message: message.into(),
        }
    }

    /// Wraps the current `errno` with context about the failed call.
    pub(crate) fn last_os_error(call: &str) -> Self {
        let err = std::io::Error::last_os_error();
        Self::Io(std::io::Error::new(err.kind(), format!("{call}: {err}")))
    }

    /// Returns true if the error means the peer or local side tore down.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}
