//! Duplex channel lifecycle status.

use std::fmt;

/// Lifecycle status of the duplex channel.
///
/// Mutated only by the link's own transition functions; everything else
/// reads it through [`crate::Link::status`] or a watch receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// A channel handle exists and the handshake is in progress.
    Initializing,
    /// The channel is open and authenticated.
    Ready,
    /// No usable channel; either never opened or closed.
    Closed,
    /// A transport-level error was reported; a close usually follows.
    Error,
    /// A reconnect attempt is scheduled.
    Restarting,
}

impl ConnectionStatus {
    /// Returns `true` when requests may be written to the channel.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Closed => "closed",
            Self::Error => "error",
            Self::Restarting => "restarting",
        };
        f.write_str(name)
    }
}
