//! Shared identifier derivation.
//!
//! Both peers compute the same System V keys and mailbox path from the
//! namespace they were configured with, so several client/server pairs can
//! share a machine as long as their namespaces differ.

use shmqp_core::Role;
use std::path::{Path, PathBuf};

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Keys and paths shared by one client/server pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcKeys {
    base: libc::key_t,
    mailbox_path: PathBuf,
}

impl IpcKeys {
    /// Offset of the mailbox semaphore set (gate, vacancy, attached).
    pub const MAILBOX_OFFSET: libc::key_t = 0;
    /// Offset of the server-outbound signal set.
    pub const SERVER_SEND_OFFSET: libc::key_t = 1;
    /// Offset of the client-outbound signal set.
    pub const CLIENT_SEND_OFFSET: libc::key_t = 2;

    /// Derives the keys for `namespace`, placing the mailbox file in `shm_dir`.
    #[must_use]
    pub fn derive(namespace: &str, shm_dir: &Path) -> Self {
        Self {
            base: base_key(namespace),
            mailbox_path: shm_dir.join(format!("shmqp-{namespace}.mbox")),
        }
    }

    /// Key of the mailbox semaphore set.
    #[must_use]
    pub fn mailbox_sem(&self) -> libc::key_t {
        self.base + Self::MAILBOX_OFFSET
    }

    /// Key of the signal set `role` raises when it has sent a message.
    #[must_use]
    pub fn send_signal(&self, role: Role) -> libc::key_t {
        match role {
            Role::Server => self.base + Self::SERVER_SEND_OFFSET,
            Role::Client => self.base + Self::CLIENT_SEND_OFFSET,
        }
    }

    /// Key of the signal set `role` waits on for incoming messages.
    #[must_use]
    pub fn recv_signal(&self, role: Role) -> libc::key_t {
        self.send_signal(role.peer())
    }

    /// Path of the mailbox backing file.
    #[must_use]
    pub fn mailbox_path(&self) -> &Path {
        &self.mailbox_path
    }
}

/// FNV-1a over the namespace, shifted so the three keys never hit
/// `IPC_PRIVATE` (0) or go negative.
fn base_key(namespace: &str) -> libc::key_t {
    let mut hash = FNV_OFFSET;
    for byte in namespace.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    // Clear the low nibble for the per-set offsets and the sign bit.
    let base = (hash & 0x7fff_fff0) as libc::key_t;
    if base == 0 { 0x10 } else { base }
}
