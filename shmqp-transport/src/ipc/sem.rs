//! System V semaphore sets.
//!
//! Thin safe wrapper over `semget`/`semop`/`semtimedop`/`semctl`. Sets are identified by a
//! key both processes derive independently; whichever side calls
//! [`SemaphoreSet::open`] first creates the set, with every value at zero.
//!
//! Removing a set with [`SemaphoreSet::remove`] wakes every process blocked on
//! it with `EIDRM`. The transport relies on that to notice peer teardown, so
//! both `EIDRM` and `EINVAL` (set already gone) surface as
//! [`TransportError::ConnectionClosed`].

use crate::error::TransportError;
use std::io;
use std::time::{Duration, Instant};

const PERMISSIONS: libc::c_int = 0o666;

/// A set of System V semaphores.
#[derive(Debug)]
pub struct SemaphoreSet {
    key: libc::key_t,
    id: libc::c_int,
    nsems: u16,
    created: bool,
}

impl SemaphoreSet {
    /// Opens the set for `key`, creating it with `nsems` semaphores if absent.
    ///
    /// # Errors
    /// Returns the `semget` failure as an IO error.
    pub fn open(key: libc::key_t, nsems: u16) -> Result<Self, TransportError> {
        let nsems_arg = libc::c_int::from(nsems);
        // SAFETY: plain syscalls, no pointers involved.
        let mut id = unsafe {
            libc::semget(key, nsems_arg, PERMISSIONS | libc::IPC_CREAT | libc::IPC_EXCL)
        };
        let mut created = true;
        if id == -1 && io::Error::last_os_error().raw_os_error() == Some(libc::EEXIST) {
            // SAFETY: as above.
            id = unsafe { libc::semget(key, nsems_arg, PERMISSIONS) };
            created = false;
        }
        if id == -1 {
            return Err(TransportError::last_os_error("semget"));
        }
        tracing::trace!(key, id, nsems, created, "opened semaphore set");
        Ok(Self {
            key,
            id,
            nsems,
            created,
        })
    }

    /// Returns true if this call created the set rather than joining it.
    #[must_use]
    pub fn created(&self) -> bool {
        self.created
    }

    /// Key the set was opened with.
    #[must_use]
    pub fn key(&self) -> libc::key_t {
        self.key
    }

    /// Kernel identifier of the set.
    #[must_use]
    pub fn id(&self) -> libc::c_int {
        self.id
    }

    /// Adds `delta` to semaphore `num`, blocking while the result would be
    /// negative. A `delta` of zero blocks until the value is zero.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the set was removed, IO error otherwise.
    pub fn op(&self, num: u16, delta: i16) -> Result<(), TransportError> {
        loop {
            match self.semop(num, delta, 0) {
                Ok(()) => return Ok(()),
                Err(err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(err) => return Err(map_err(err)),
            }
        }
    }

    /// Like [`op`](Self::op) but gives up after `timeout`.
    ///
    /// # Errors
    /// Returns `Timeout` when the deadline passes, `ConnectionClosed` if the
    /// set was removed, IO error otherwise.
    pub fn op_timeout(&self, num: u16, delta: i16, timeout: Duration) -> Result<(), TransportError> {
        self.apply_timeout(&[(num, delta)], timeout)
    }

    /// Applies every `(num, delta)` pair as one atomic step, blocking until
    /// all of them can proceed together or `timeout` passes.
    ///
    /// A pair `(n, -k), (n, k)` waits for semaphore `n` to reach `k` without
    /// changing it.
    ///
    /// # Errors
    /// Returns `Timeout` when the deadline passes, `ConnectionClosed` if the
    /// set was removed, IO error otherwise.
    pub fn apply_timeout(&self, ops: &[(u16, i16)], timeout: Duration) -> Result<(), TransportError> {
        let mut sops = Vec::with_capacity(ops.len());
        for &(num, delta) in ops {
            self.check_num(num)?;
            sops.push(libc::sembuf {
                sem_num: num,
                sem_op: delta,
                sem_flg: 0,
            });
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let ts = libc::timespec {
                tv_sec: remaining.as_secs() as libc::time_t,
                tv_nsec: remaining.subsec_nanos() as libc::c_long,
            };
            // SAFETY: `sops` and `ts` outlive the call; the kernel only reads them.
            let ret = unsafe {
                libc::syscall(
                    libc::SYS_semtimedop,
                    self.id,
                    sops.as_mut_ptr(),
                    sops.len(),
                    &ts as *const libc::timespec,
                )
            };
            if ret == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) if !remaining.is_zero() => continue,
                Some(libc::EAGAIN) | Some(libc::EINTR) => return Err(TransportError::Timeout),
                _ => return Err(map_err(err)),
            }
        }
    }

    /// Current value of semaphore `num`.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the set was removed.
    pub fn value(&self, num: u16) -> Result<i32, TransportError> {
        self.check_num(num)?;
        // SAFETY: GETVAL takes no fourth argument.
        let value = unsafe { libc::semctl(self.id, libc::c_int::from(num), libc::GETVAL) };
        if value == -1 {
            return Err(map_err(io::Error::last_os_error()));
        }
        Ok(value)
    }

    /// Removes the set from the system, waking all blocked waiters.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the set is already gone.
    pub fn remove(&self) -> Result<(), TransportError> {
        // SAFETY: IPC_RMID takes no fourth argument.
        let ret = unsafe { libc::semctl(self.id, 0, libc::IPC_RMID) };
        if ret == -1 {
            return Err(map_err(io::Error::last_os_error()));
        }
        tracing::trace!(key = self.key, id = self.id, "removed semaphore set");
        Ok(())
    }

    fn semop(&self, num: u16, delta: i16, flags: libc::c_short) -> io::Result<()> {
        if num >= self.nsems {
            return Err(io::Error::from_raw_os_error(libc::EFBIG));
        }
        let mut sop = libc::sembuf {
            sem_num: num,
            sem_op: delta,
            sem_flg: flags,
        };
        // SAFETY: `sop` is a valid sembuf for the duration of the call.
        let ret = unsafe { libc::semop(self.id, &mut sop, 1) };
        if ret == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn check_num(&self, num: u16) -> Result<(), TransportError> {
        if num >= self.nsems {
            return Err(TransportError::ipc(format!(
                "semaphore {num} out of range for set of {}",
                self.nsems
            )));
        }
        Ok(())
    }
}

fn map_err(err: io::Error) -> TransportError {
    match err.raw_os_error() {
        Some(libc::EIDRM) | Some(libc::EINVAL) => TransportError::ConnectionClosed,
        _ => TransportError::Io(err),
    }
}
