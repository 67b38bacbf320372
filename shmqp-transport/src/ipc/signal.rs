//! Directional signal channel.
//!
//! Two single-semaphore sets per pair: one raised by the server when it has
//! published a message, one raised by the client. Each side opens its own
//! outbound set and the peer's outbound set as its inbound, so a `raise` on
//! one side is an available `await_signal` on the other.

use crate::error::TransportError;
use crate::ipc::keys::IpcKeys;
use crate::ipc::sem::SemaphoreSet;
use shmqp_core::Role;

/// Outbound and inbound signal semaphores for one endpoint.
#[derive(Debug)]
pub struct SignalChannel {
    outbound: SemaphoreSet,
    inbound: SemaphoreSet,
}

impl SignalChannel {
    /// Opens both directions as seen from `role`.
    ///
    /// # Errors
    /// Returns IO error if either set cannot be opened. A set opened before
    /// the failure is removed again when this call created it.
    pub fn open(keys: &IpcKeys, role: Role) -> Result<Self, TransportError> {
        let outbound = SemaphoreSet::open(keys.send_signal(role), 1)?;
        let inbound = match SemaphoreSet::open(keys.recv_signal(role), 1) {
            Ok(inbound) => inbound,
            Err(err) => {
                discard_created(&outbound);
                return Err(err);
            }
        };
        tracing::debug!(
            %role,
            outbound = outbound.key(),
            inbound = inbound.key(),
            "signal channel opened"
        );
        Ok(Self { outbound, inbound })
    }

    /// Tells the peer a message is waiting. Never blocks.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the set was removed.
    pub fn raise(&self) -> Result<(), TransportError> {
        self.outbound.op(0, 1)
    }

    /// Blocks until the peer has raised its outbound signal, consuming one unit.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` once the set is removed, by either side.
    pub fn await_signal(&self) -> Result<(), TransportError> {
        self.inbound.op(0, -1)
    }

    /// Pending units on the outbound side.
    ///
    /// # Errors
    /// Returns `ConnectionClosed` if the set was removed.
    pub fn outbound_pending(&self) -> Result<i32, TransportError> {
        self.outbound.value(0)
    }

    /// Removes both sets from the system.
    ///
    /// Sets already removed by the peer are skipped.
    ///
    /// # Errors
    /// Returns the first unexpected failure.
    pub fn remove(&self) -> Result<(), TransportError> {
        let mut result = Ok(());
        for set in [&self.outbound, &self.inbound] {
            match set.remove() {
                Ok(()) | Err(TransportError::ConnectionClosed) => {}
                Err(err) => {
                    tracing::warn!(key = set.key(), error = %err, "failed to remove signal set");
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }
        result
    }
}

/// Removes `set` if this endpoint created it, as cleanup after a failed open.
fn discard_created(set: &SemaphoreSet) {
    if !set.created() {
        return;
    }
    if let Err(err) = set.remove() {
        tracing::debug!(key = set.key(), error = %err, "signal set cleanup failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn keys(test: &str) -> IpcKeys {
        IpcKeys::derive(
            &format!("signal-{}-{test}", std::process::id()),
            Path::new("/tmp"),
        )
    }

    #[test]
    fn test_raise_reaches_peer() {
        let keys = keys("raise");
        let server = SignalChannel::open(&keys, Role::Server).unwrap();
        let client = SignalChannel::open(&keys, Role::Client).unwrap();

        server.raise().unwrap();
        assert_eq!(server.outbound_pending().unwrap(), 1);
        client.await_signal().unwrap();
        assert_eq!(server.outbound_pending().unwrap(), 0);

        client.raise().unwrap();
        server.await_signal().unwrap();
        server.remove().unwrap();
    }

    #[test]
    fn test_own_raise_is_not_inbound() {
        let keys = keys("own");
        let server = SignalChannel::open(&keys, Role::Server).unwrap();
        let client = SignalChannel::open(&keys, Role::Client).unwrap();

        client.raise().unwrap();
        assert_eq!(client.outbound_pending().unwrap(), 1);
        assert_eq!(server.inbound.value(0).unwrap(), 1);
        assert_eq!(client.inbound.value(0).unwrap(), 0);
        client.remove().unwrap();
    }

    #[test]
    fn test_failed_open_cleanup_only_removes_own_set() {
        let keys = keys("cleanup");
        let created = SemaphoreSet::open(keys.send_signal(Role::Server), 1).unwrap();
        let joined = SemaphoreSet::open(keys.send_signal(Role::Server), 1).unwrap();
        assert!(created.created());
        assert!(!joined.created());

        discard_created(&joined);
        assert_eq!(created.value(0).unwrap(), 0);

        discard_created(&created);
        assert!(matches!(
            joined.value(0),
            Err(TransportError::ConnectionClosed)
        ));
        discard_created(&created);
    }

    #[test]
    fn test_remove_unblocks_peer() {
        let keys = keys("unblock");
        let server = SignalChannel::open(&keys, Role::Server).unwrap();
        let client = Arc::new(SignalChannel::open(&keys, Role::Client).unwrap());

        let waiter = {
            let client = Arc::clone(&client);
            thread::spawn(move || client.await_signal())
        };
        thread::sleep(Duration::from_millis(20));
        server.remove().unwrap();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
        client.remove().unwrap();
    }
}
