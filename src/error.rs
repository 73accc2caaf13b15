//! Link error types with stable numeric codes.
//!
//! [`LinkError`] is the central error type of the crate. Every variant maps
//! to a numeric code so that host applications can report failures without
//! matching on message text.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::domain::{ConnectionStatus, CorrelationId};

/// An `Error` frame returned by the remote gateway and delivered to the
/// caller that issued the correlated request.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// Exception kind reported by the gateway (e.g. `"NotFoundException"`).
    pub kind: String,
    /// Full error payload as sent by the gateway.
    pub data: Value,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_empty() {
            write!(f, "unclassified remote error")
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

/// Client-side error enum with numeric code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category            |
/// |-----------|---------------------|
/// | 1000–1999 | Input / encoding    |
/// | 2000–2999 | Duplex channel      |
/// | 3000–3999 | Fallback transport  |
/// | 4000–4999 | Remote / session    |
/// | 5000      | Internal            |
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// A base URL or derived URL could not be built.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Configuration value missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON encoding or decoding of a frame failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A correlation id did not have the `cmd-<n>` shape.
    #[error("invalid correlation id: {0}")]
    InvalidCorrelationId(String),

    /// The duplex channel failed to connect, send or receive.
    #[error("duplex channel error: {0}")]
    Channel(String),

    /// The duplex transport is disabled in the current mode.
    #[error("duplex transport is not supported in this mode")]
    DuplexUnsupported,

    /// The duplex channel is not ready for the requested operation.
    #[error("duplex channel not ready (status: {0})")]
    NotReady(ConnectionStatus),

    /// An operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The fallback request/response transport failed.
    #[error("fallback transport failed: {message}")]
    Fallback {
        /// HTTP status, when the failure carried one.
        status: Option<u16>,
        /// Human-readable failure description.
        message: String,
    },

    /// The gateway answered a correlated request with an `Error` frame.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// The reply slot for a request was dropped before a reply arrived
    /// (session revoked or link shut down).
    #[error("request {0} abandoned before a reply arrived")]
    Abandoned(CorrelationId),

    /// The credential cipher refused to seal a value.
    #[error("credential sealing failed: {0}")]
    Cipher(String),

    /// Internal invariant failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LinkError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidUrl(_) => 1001,
            Self::Config(_) => 1002,
            Self::Codec(_) => 1003,
            Self::InvalidCorrelationId(_) => 1004,
            Self::Channel(_) => 2001,
            Self::DuplexUnsupported => 2002,
            Self::NotReady(_) => 2003,
            Self::Timeout(_) => 2004,
            Self::Fallback { .. } => 3001,
            Self::Remote(_) => 4001,
            Self::Abandoned(_) => 4002,
            Self::Cipher(_) => 4003,
            Self::Internal(_) => 5000,
        }
    }

    /// Returns `true` when the failure came from a transport layer rather
    /// than from the remote service or local input.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Channel(_) | Self::NotReady(_) | Self::Timeout(_) | Self::Fallback { .. }
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Channel(err.to_string())
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        Self::Fallback {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}
