//! # shmqp
//!
//! Software RDMA queue-pair emulation over shared memory.
//!
//! Code written against a verbs-style API (register memory, post sends and
//! receives, get completions through callbacks) runs unchanged between two
//! local processes, without RDMA hardware. Messages travel through a single
//! shared memory mailbox guarded by System V semaphores.
//!
//! ## Features
//!
//! - **Verbs-style API** - `post_send`/`post_receive` with completion and
//!   error callbacks, plus blocking `wait_*` variants
//! - **Bounded work queues** - posting blocks when the queue is full, up to
//!   the configured timeout
//! - **Namespaced resources** - several pairs can share a machine
//! - **Disconnect detection** - the peer's teardown fires a callback once
//!
//! ## Quick Start
//!
//! ```ignore
//! use shmqp::prelude::*;
//!
//! let server = Transport::init(TransportAttributes::server().namespace("demo"))?;
//! server.bind()?;
//! let server = server.accept_one()?;
//! server.finalize_accept()?;
//!
//! let mr = server.register_memory(&[], AccessFlags::LOCAL_WRITE);
//! let request = server.wait_receive(Data::with_capacity(4096), &mr)?;
//! server.wait_send(request, &mr)?;
//! server.destroy()?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`] - data descriptors, roles, states, memory registration records
//! - [`transport`] - the transport endpoint, work queues and IPC primitives

pub mod prelude;

/// Core value types.
pub mod core {
    pub use shmqp_core::*;
}

/// Shared memory transport.
pub mod transport {
    pub use shmqp_transport::*;
}

// Re-export commonly used items at the crate root
pub use shmqp_core::{AccessFlags, Data, MemoryRegion, RemoteLocation, Role, State};
pub use shmqp_transport::{Transport, TransportAttributes, TransportError};
