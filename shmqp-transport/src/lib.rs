//! # shmqp Transport
//!
//! Shared memory transport emulating an RDMA queue pair.
//!
//! This crate provides:
//! - [`qp`] - the [`Transport`] endpoint and its worker threads
//! - [`queue`] - bounded local work queues
//! - [`ipc`] - shared mailbox, System V semaphores and signal channels
//! - [`config`] - transport attributes and their defaults

pub mod config;
pub mod error;
pub mod ipc;
pub mod qp;
pub mod queue;

pub use config::{DisconnectCallback, TransportAttributes, TransportSettings};
pub use error::TransportError;
pub use qp::{CompletionCallback, ErrorCallback, Transport};
