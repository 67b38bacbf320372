//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types.
//!
//! ```ignore
//! use shmqp::prelude::*;
//! ```

// Core types
pub use shmqp_core::error::{CoreError, Result as CoreResult};
pub use shmqp_core::{AccessFlags, Data, MemoryRegion, RemoteLocation, Role, State};

// Transport types
pub use shmqp_transport::config::{
    DEFAULT_MAILBOX_CAPACITY, DEFAULT_NAMESPACE, DEFAULT_QUEUE_DEPTH, DEFAULT_TIMEOUT,
};
pub use shmqp_transport::{
    CompletionCallback, DisconnectCallback, ErrorCallback, Transport, TransportAttributes,
    TransportError, TransportSettings,
};
