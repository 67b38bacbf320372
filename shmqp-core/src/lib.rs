//! # shmqp Core
//!
//! Core value types shared by the shmqp transport and its callers.
//!
//! This crate provides:
//! - [`Data`] descriptors that carry payloads through posted work requests
//! - [`Role`] and [`State`] of a transport endpoint
//! - [`MemoryRegion`] and [`RemoteLocation`] registration stand-ins
//! - Error types for descriptor operations

pub mod data;
pub mod error;
pub mod memory;
pub mod types;

pub use data::Data;
pub use error::{CoreError, Result};
pub use memory::{AccessFlags, MemoryRegion, RemoteLocation};
pub use types::{Role, State};
