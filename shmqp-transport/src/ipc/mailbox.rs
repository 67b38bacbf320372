//! Shared mailbox.
//!
//! One shared memory record per client/server pair, laid out as
//!
//! ```text
//! offset 0: size  u32 little-endian
//! offset 4: data  [u8; capacity]
//! ```
//!
//! guarded by a two-semaphore set:
//!
//! - **gate** (semaphore 0): binary, 1 = free. Held for the whole copy, since
//!   the mailbox is a value buffer and not a handoff reference.
//! - **vacancy** (semaphore 1): 1 while the mailbox holds no unconsumed
//!   message. `publish` takes it, `consume`/`discard` give it back, so at most
//!   one message is ever in flight across both directions.
//! - **attached** (semaphore 2): number of endpoints that finished setup.
//!   Only ever raised, so waiting for it to reach two cannot miss a wakeup.

use crate::error::TransportError;
use crate::ipc::sem::SemaphoreSet;
use crate::ipc::shm::{SharedMemory, SharedMemoryConfig};
use parking_lot::Mutex;
use shmqp_core::{CoreError, Data};
use std::path::Path;
use std::time::{Duration, Instant};

/// The shared message slot and its semaphores.
#[derive(Debug)]
pub struct Mailbox {
    region: Mutex<SharedMemory>,
    sems: SemaphoreSet,
    capacity: usize,
}

impl Mailbox {
    /// Size of the length prefix.
    pub const HEADER_SIZE: usize = 4;
    /// Index of the gate semaphore.
    pub const GATE: u16 = 0;
    /// Index of the vacancy semaphore.
    pub const VACANCY: u16 = 1;
    /// Index of the attached-endpoints semaphore.
    pub const ATTACHED: u16 = 2;

    /// Maps the mailbox at `path` and joins (or creates) its semaphore set.
    ///
    /// The side that creates the semaphore set marks the mailbox vacant. The
    /// gate starts held; callers raise it once setup is complete.
    ///
    /// # Errors
    /// Returns IO error if the region cannot be mapped or the set opened.
    pub fn open(path: &Path, capacity: usize, sem_key: libc::key_t) -> Result<Self, TransportError> {
        let region = SharedMemory::open(
            path,
            SharedMemoryConfig {
                size: Self::HEADER_SIZE + capacity,
                create: true,
            },
        )?;
        let sems = match SemaphoreSet::open(sem_key, 3) {
            Ok(sems) => sems,
            Err(err) => {
                if let Err(unlink_err) = region.unlink() {
                    tracing::debug!(error = %unlink_err, "mailbox file cleanup failed");
                }
                return Err(err);
            }
        };
        if sems.created() {
            sems.op(Self::VACANCY, 1)?;
        }
        tracing::debug!(
            path = %path.display(),
            capacity,
            sem_key,
            created = sems.created(),
            "mailbox opened"
        );
        Ok(Self {
            region: Mutex::new(region),
            sems,
            capacity,
        })
    }

    /// Largest payload the mailbox accepts.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Releases the gate once.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the set was removed.
    pub fn raise_gate(&self) -> Result<(), TransportError> {
        self.sems.op(Self::GATE, 1)
    }

    /// Announces this endpoint's setup is done: raises the gate, then the
    /// attached count.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the set was removed.
    pub fn attach(&self) -> Result<(), TransportError> {
        self.raise_gate()?;
        self.sems.op(Self::ATTACHED, 1)
    }

    /// Number of endpoints that called [`attach`](Self::attach).
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the set was removed.
    pub fn attached_value(&self) -> Result<i32, TransportError> {
        self.sems.value(Self::ATTACHED)
    }

    /// Current gate value.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the set was removed.
    pub fn gate_value(&self) -> Result<i32, TransportError> {
        self.sems.value(Self::GATE)
    }

    /// Current vacancy value.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the set was removed.
    pub fn vacancy_value(&self) -> Result<i32, TransportError> {
        self.sems.value(Self::VACANCY)
    }

    /// Connection rendezvous, run once by each endpoint after
    /// [`attach`](Self::attach).
    ///
    /// Waits until both endpoints are attached, then takes the gate and
    /// waits for it to reach zero. With `restore` the gate is given back
    /// afterwards, leaving it free. The side without `restore` takes the gate
    /// and checks for zero in one step, so it cannot miss the moment the
    /// other side holds it at zero.
    ///
    /// # Errors
    /// Returns `ConnectTimeout` if the whole exchange exceeds `timeout`.
    pub fn rendezvous(&self, restore: bool, timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let left = || deadline.saturating_duration_since(Instant::now());
        let steps = || -> Result<(), TransportError> {
            self.sems
                .apply_timeout(&[(Self::ATTACHED, -2), (Self::ATTACHED, 2)], left())?;
            if restore {
                self.sems.op_timeout(Self::GATE, -1, left())?;
                if let Err(err) = self.sems.op_timeout(Self::GATE, 0, left()) {
                    // Undo the take; a lone peer must not find the gate at zero.
                    if let Err(undo) = self.sems.op(Self::GATE, 1) {
                        tracing::debug!(error = %undo, "failed to give back the gate");
                    }
                    return Err(err);
                }
                self.sems.op(Self::GATE, 1)
            } else {
                self.sems
                    .apply_timeout(&[(Self::GATE, -1), (Self::GATE, 0)], left())
            }
        };
        steps().map_err(|err| match err {
            TransportError::Timeout => TransportError::ConnectTimeout,
            other => other,
        })
    }

    /// Writes `payload` into the mailbox.
    ///
    /// Blocks until the mailbox is vacant, then holds the gate for the copy.
    ///
    /// # Errors
    /// Returns `FrameTooLarge` if the payload exceeds the capacity,
    /// `ConnectionClosed` if the semaphores were removed.
    pub fn publish(&self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > self.capacity {
            return Err(TransportError::frame_too_large(payload.len(), self.capacity));
        }
        self.sems.op(Self::VACANCY, -1)?;
        self.with_gate(|region| {
            let bytes = region.as_mut_slice();
            bytes[..Self::HEADER_SIZE].copy_from_slice(&(payload.len() as u32).to_le_bytes());
            bytes[Self::HEADER_SIZE..Self::HEADER_SIZE + payload.len()].copy_from_slice(payload);
        })?;
        tracing::trace!(size = payload.len(), "published to mailbox");
        Ok(())
    }

    /// Copies the pending message into `data` and marks the mailbox vacant.
    ///
    /// The mailbox is freed even when the message does not fit.
    ///
    /// # Errors
    /// Returns `FrameTooLarge` if the message exceeds `data`'s maximum size,
    /// `ConnectionClosed` if the semaphores were removed.
    pub fn consume(&self, data: &mut Data) -> Result<usize, TransportError> {
        let copied = self.with_gate(|region| -> Result<usize, TransportError> {
            let size = self.stored_size(region)?;
            let start = Self::HEADER_SIZE;
            data.fill_from(&region.as_slice()[start..start + size])
                .map_err(|err| match err {
                    CoreError::BufferTooShort {
                        required,
                        available,
                    } => TransportError::frame_too_large(required, available),
                    other => TransportError::Core(other),
                })?;
            Ok(size)
        })?;
        self.sems.op(Self::VACANCY, 1)?;
        let size = copied?;
        tracing::trace!(size, "consumed from mailbox");
        Ok(size)
    }

    /// Drops the pending message without copying it.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the semaphores were removed.
    pub fn discard(&self) -> Result<usize, TransportError> {
        let size = self.with_gate(|region| self.stored_size(region))?;
        self.sems.op(Self::VACANCY, 1)?;
        size
    }

    /// Removes the semaphore set and unlinks the backing file.
    ///
    /// Both steps are attempted; already-removed resources are not errors.
    ///
    /// # Errors
    /// Returns the first unexpected failure.
    pub fn remove(&self) -> Result<(), TransportError> {
        let sems = match self.sems.remove() {
            Ok(()) | Err(TransportError::ConnectionClosed) => Ok(()),
            Err(err) => Err(err),
        };
        let file = match self.region.lock().unlink() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TransportError::Io(err)),
        };
        sems.and(file)
    }

    fn with_gate<R>(&self, f: impl FnOnce(&mut SharedMemory) -> R) -> Result<R, TransportError> {
        self.sems.op(Self::GATE, -1)?;
        let result = f(&mut self.region.lock());
        self.sems.op(Self::GATE, 1)?;
        Ok(result)
    }

    fn stored_size(&self, region: &SharedMemory) -> Result<usize, TransportError> {
        let mut prefix = [0u8; Self::HEADER_SIZE];
        prefix.copy_from_slice(&region.as_slice()[..Self::HEADER_SIZE]);
        let size = u32::from_le_bytes(prefix) as usize;
        if size > self.capacity {
            return Err(TransportError::ipc(format!(
                "mailbox size field {size} exceeds capacity {}",
                self.capacity
            )));
        }
        Ok(size)
    }
}
