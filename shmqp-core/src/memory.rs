//! Memory registration stand-ins.
//!
//! Hardware queue pairs require buffers to be registered before use and hand
//! out keys that a peer combines with an address to reach remote memory. The
//! shared memory transport copies through a mailbox instead, so these records
//! only carry values for API compatibility.

use bitflags::bitflags;

bitflags! {
    /// Memory access flags for region registration.
    ///
    /// Bit values follow the verbs `IBV_ACCESS_*` constants so callers can
    /// pass the same masks they would hand to real hardware.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        /// Enable local write access.
        const LOCAL_WRITE = 1;
        /// Enable remote write access.
        const REMOTE_WRITE = 1 << 1;
        /// Enable remote read access.
        const REMOTE_READ = 1 << 2;
        /// Enable remote atomic operation access.
        const REMOTE_ATOMIC = 1 << 3;
    }
}

/// A registered memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    addr: u64,
    length: u64,
    access: AccessFlags,
    lkey: u32,
    rkey: u32,
}

impl MemoryRegion {
    /// Creates a region record. `key` is used as both local and remote key.
    #[must_use]
    pub const fn new(addr: u64, length: u64, access: AccessFlags, key: u32) -> Self {
        Self {
            addr,
            length,
            access,
            lkey: key,
            rkey: key,
        }
    }

    /// Start address of the region.
    #[must_use]
    pub const fn addr(&self) -> u64 {
        self.addr
    }

    /// Length of the region in bytes.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Access flags granted at registration.
    #[must_use]
    pub const fn access(&self) -> AccessFlags {
        self.access
    }

    /// Local key.
    #[must_use]
    pub const fn lkey(&self) -> u32 {
        self.lkey
    }

    /// Remote key.
    #[must_use]
    pub const fn rkey(&self) -> u32 {
        self.rkey
    }

    /// Returns true if `[addr, addr + len)` lies inside the region.
    #[must_use]
    pub fn contains(&self, addr: u64, len: u64) -> bool {
        let Some(end) = addr.checked_add(len) else {
            return false;
        };
        addr >= self.addr && end <= self.addr.saturating_add(self.length)
    }

    /// Builds a remote location for `addr` with a size hint.
    ///
    /// The record is a plain value; `addr` is not checked against the
    /// region. Use [`contains`](Self::contains) for that.
    #[must_use]
    pub const fn remote_location(&self, addr: u64, size: u32) -> RemoteLocation {
        RemoteLocation {
            raddr: addr,
            rkey: self.rkey,
            size,
        }
    }
}

/// Address, key and size hint a peer would use to reach remote memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteLocation {
    /// Remote address.
    pub raddr: u64,
    /// Remote key of the owning region.
    pub rkey: u32,
    /// Size hint in bytes.
    pub size: u32,
}
