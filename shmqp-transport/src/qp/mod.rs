//! Queue pair emulation.
//!
//! A [`Transport`] is one endpoint. Posting a send or receive parks a context
//! in the local work queue; the endpoint's sender and receiver threads move
//! the bytes through the shared mailbox and hand the data back through the
//! context's callbacks.
//!
//! # Example
//!
//! ```ignore
//! use shmqp_transport::{Transport, TransportAttributes};
//! use shmqp_core::{AccessFlags, Data};
//!
//! let client = Transport::init(TransportAttributes::client().namespace("demo"))?;
//! client.connect()?;
//! client.finalize_connect()?;
//!
//! let mr = client.register_memory(&[], AccessFlags::LOCAL_WRITE);
//! client.wait_send(Data::from("hello"), &mr)?;
//! client.destroy()?;
//! ```

pub mod context;
mod transport;
mod worker;

pub use context::{CompletionCallback, ErrorCallback};
pub use transport::Transport;
