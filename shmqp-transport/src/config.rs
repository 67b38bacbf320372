//! Transport attributes.
//!
//! [`TransportAttributes`] is what callers hand to [`Transport::init`]. Zero
//! values for the timeout and queue depths mean "use the default", the same
//! convention the verbs-style API this crate emulates uses. Resolution turns
//! the attributes into [`TransportSettings`], the immutable values a
//! transport runs with.

use crate::qp::Transport;
use shmqp_core::{CoreError, Role};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Timeout applied when none is configured (3,000,000 µs).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_micros(3_000_000);
/// Send/receive queue depth applied when none is configured.
pub const DEFAULT_QUEUE_DEPTH: usize = 5;
/// Largest accepted queue depth.
pub const MAX_QUEUE_DEPTH: usize = 4096;
/// Mailbox payload capacity applied when none is configured (100 MiB).
pub const DEFAULT_MAILBOX_CAPACITY: usize = 100 * 1024 * 1024;
/// Namespace applied when none is configured.
pub const DEFAULT_NAMESPACE: &str = "shmqp";
/// Directory holding mailbox backing files.
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";

/// Callback fired once when the peer disconnects.
pub type DisconnectCallback = Box<dyn FnOnce(&Transport) + Send + 'static>;

/// Attributes used to initialize a transport.
pub struct TransportAttributes {
    /// Server or client role.
    pub role: Role,
    /// Bound for blocking posts, synchronous waits and the finalize rendezvous.
    pub timeout: Duration,
    /// Number of send contexts.
    pub sq_depth: usize,
    /// Number of receive contexts.
    pub rq_depth: usize,
    /// Name all shared identifiers are derived from. Both peers must agree.
    pub namespace: String,
    /// Directory for the mailbox backing file.
    pub shm_dir: PathBuf,
    /// Mailbox payload capacity in bytes. Both peers must agree.
    pub mailbox_capacity: usize,
    /// Called once when the peer goes away.
    pub disconnect_callback: Option<DisconnectCallback>,
}

impl Default for TransportAttributes {
    fn default() -> Self {
        Self {
            role: Role::Client,
            timeout: Duration::ZERO,
            sq_depth: 0,
            rq_depth: 0,
            namespace: DEFAULT_NAMESPACE.to_string(),
            shm_dir: PathBuf::from(DEFAULT_SHM_DIR),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            disconnect_callback: None,
        }
    }
}

impl fmt::Debug for TransportAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportAttributes")
            .field("role", &self.role)
            .field("timeout", &self.timeout)
            .field("sq_depth", &self.sq_depth)
            .field("rq_depth", &self.rq_depth)
            .field("namespace", &self.namespace)
            .field("shm_dir", &self.shm_dir)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("disconnect_callback", &self.disconnect_callback.is_some())
            .finish()
    }
}

impl TransportAttributes {
    /// Attributes for the server role with defaults.
    #[must_use]
    pub fn server() -> Self {
        Self {
            role: Role::Server,
            ..Default::default()
        }
    }

    /// Attributes for the client role with defaults.
    #[must_use]
    pub fn client() -> Self {
        Self::default()
    }

    /// Sets the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the send queue depth.
    #[must_use]
    pub fn sq_depth(mut self, depth: usize) -> Self {
        self.sq_depth = depth;
        self
    }

    /// Sets the receive queue depth.
    #[must_use]
    pub fn rq_depth(mut self, depth: usize) -> Self {
        self.rq_depth = depth;
        self
    }

    /// Sets the namespace shared identifiers derive from.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the directory for the mailbox backing file.
    #[must_use]
    pub fn shm_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shm_dir = dir.into();
        self
    }

    /// Sets the mailbox payload capacity.
    #[must_use]
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Sets the disconnect callback.
    #[must_use]
    pub fn on_disconnect<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Transport) + Send + 'static,
    {
        self.disconnect_callback = Some(Box::new(callback));
        self
    }

    /// Checks values that have no usable default.
    ///
    /// # Errors
    /// Returns `InvalidAttribute` naming the first offending attribute.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.namespace.is_empty() {
            return Err(CoreError::invalid_attribute(
                "namespace",
                "must not be empty",
            ));
        }
        if self.namespace.contains('/') || self.namespace.contains('\0') {
            return Err(CoreError::invalid_attribute(
                "namespace",
                "must not contain '/' or NUL",
            ));
        }
        if self.sq_depth > MAX_QUEUE_DEPTH {
            return Err(CoreError::invalid_attribute(
                "sq_depth",
                format!("{} exceeds {}", self.sq_depth, MAX_QUEUE_DEPTH),
            ));
        }
        if self.rq_depth > MAX_QUEUE_DEPTH {
            return Err(CoreError::invalid_attribute(
                "rq_depth",
                format!("{} exceeds {}", self.rq_depth, MAX_QUEUE_DEPTH),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(CoreError::invalid_attribute(
                "mailbox_capacity",
                "must be non-zero",
            ));
        }
        if self.mailbox_capacity > u32::MAX as usize {
            return Err(CoreError::invalid_attribute(
                "mailbox_capacity",
                format!("{} does not fit the u32 size field", self.mailbox_capacity),
            ));
        }
        Ok(())
    }

    /// Validates, applies defaults and splits off the disconnect callback.
    ///
    /// # Errors
    /// Returns `InvalidAttribute` if validation fails.
    pub fn resolve(self) -> Result<(TransportSettings, Option<DisconnectCallback>), CoreError> {
        self.validate()?;
        let settings = TransportSettings {
            role: self.role,
            timeout: if self.timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                self.timeout
            },
            sq_depth: non_zero_or(self.sq_depth, DEFAULT_QUEUE_DEPTH),
            rq_depth: non_zero_or(self.rq_depth, DEFAULT_QUEUE_DEPTH),
            namespace: self.namespace,
            shm_dir: self.shm_dir,
            mailbox_capacity: self.mailbox_capacity,
        };
        Ok((settings, self.disconnect_callback))
    }
}

fn non_zero_or(value: usize, default: usize) -> usize {
    if value == 0 { default } else { value }
}

/// Resolved values a transport runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// Server or client role.
    pub role: Role,
    /// Bound for local blocking points.
    pub timeout: Duration,
    /// Number of send contexts.
    pub sq_depth: usize,
    /// Number of receive contexts.
    pub rq_depth: usize,
    /// Namespace for shared identifiers.
    pub namespace: String,
    /// Directory for the mailbox backing file.
    pub shm_dir: PathBuf,
    /// Mailbox payload capacity in bytes.
    pub mailbox_capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let (settings, callback) = TransportAttributes::default().resolve().unwrap();
        assert_eq!(settings.role, Role::Client);
        assert_eq!(settings.timeout, Duration::from_micros(3_000_000));
        assert_eq!(settings.sq_depth, 5);
        assert_eq!(settings.rq_depth, 5);
        assert_eq!(settings.namespace, "shmqp");
        assert_eq!(settings.shm_dir, PathBuf::from("/dev/shm"));
        assert_eq!(settings.mailbox_capacity, 100 * 1024 * 1024);
        assert!(callback.is_none());
    }

    #[test]
    fn test_explicit_values_kept() {
        let (settings, callback) = TransportAttributes::server()
            .timeout(Duration::from_millis(250))
            .sq_depth(1)
            .rq_depth(16)
            .namespace("unit")
            .shm_dir("/tmp")
            .mailbox_capacity(4096)
            .on_disconnect(|_| {})
            .resolve()
            .unwrap();
        assert_eq!(settings.role, Role::Server);
        assert_eq!(settings.timeout, Duration::from_millis(250));
        assert_eq!(settings.sq_depth, 1);
        assert_eq!(settings.rq_depth, 16);
        assert_eq!(settings.namespace, "unit");
        assert_eq!(settings.mailbox_capacity, 4096);
        assert!(callback.is_some());
    }

    #[test]
    fn test_validate_rejects_bad_namespace() {
        assert!(TransportAttributes::client().namespace("").validate().is_err());
        assert!(TransportAttributes::client().namespace("a/b").validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_capacity() {
        let err = TransportAttributes::client()
            .mailbox_capacity(0)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidAttribute {
                name: "mailbox_capacity",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_huge_depth() {
        let attrs = TransportAttributes::client().sq_depth(MAX_QUEUE_DEPTH + 1);
        assert!(attrs.validate().is_err());
        let attrs = TransportAttributes::client().rq_depth(MAX_QUEUE_DEPTH + 1);
        assert!(attrs.validate().is_err());
    }

    #[test]
    fn test_debug_hides_callback() {
        let attrs = TransportAttributes::client().on_disconnect(|_| {});
        let debug_str = format!("{:?}", attrs);
        assert!(debug_str.contains("TransportAttributes"));
        assert!(debug_str.contains("disconnect_callback: true"));
    }
}
