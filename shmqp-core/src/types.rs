//! Endpoint role and connection state.

use std::fmt;

/// Which side of a queue pair a transport plays.
///
/// The role decides which signal channel is outbound and which finalize
/// rendezvous applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// Accepting side.
    Server,
    /// Connecting side.
    #[default]
    Client,
}

impl Role {
    /// Returns the opposite role.
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Server => Self::Client,
            Self::Client => Self::Server,
        }
    }

    /// Returns true for the server role.
    #[must_use]
    pub const fn is_server(self) -> bool {
        matches!(self, Self::Server)
    }

    /// Returns the lowercase role name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum State {
    /// Initialized, not yet connected.
    #[default]
    Init = 0,
    /// Mailbox, signals and workers are up.
    Connected = 1,
    /// Torn down locally or disconnected by the peer.
    Closed = 2,
}

impl State {
    /// Converts a raw discriminant back into a state.
    ///
    /// Unknown values map to [`State::Closed`].
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Init,
            1 => Self::Connected,
            _ => Self::Closed,
        }
    }

    /// Returns the uppercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Connected => "CONNECTED",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
