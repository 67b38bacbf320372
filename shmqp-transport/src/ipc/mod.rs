//! IPC (Inter-Process Communication) primitives.
//!
//! Shared memory mailbox plus System V semaphores that together carry one
//! message at a time between a server and a client process.

pub mod keys;
pub mod mailbox;
pub mod sem;
pub mod shm;
pub mod signal;

pub use keys::IpcKeys;
pub use mailbox::Mailbox;
pub use sem::SemaphoreSet;
pub use shm::{SharedMemory, SharedMemoryConfig};
pub use signal::SignalChannel;
