//! Type-safe request correlation identifier.
//!
//! [`CorrelationId`] wraps the monotonic counter assigned by the
//! [`super::Ledger`] and renders as `cmd-<n>` on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;

const PREFIX: &str = "cmd-";

/// Identifier shared by a request and its eventual reply.
///
/// Ordered numerically, so sorting by id yields issuance order.
/// `cmd-0` is reserved for the authentication handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Id of the authentication handshake.
    pub const AUTH: Self = Self(0);

    /// Builds an id from a raw counter value.
    #[must_use]
    pub const fn from_counter(counter: u64) -> Self {
        Self(counter)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn counter(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(PREFIX)
            .and_then(|n| n.parse::<u64>().ok())
            .map(Self)
            .ok_or_else(|| LinkError::InvalidCorrelationId(s.to_string()))
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = LinkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_cmd_prefix() {
        assert_eq!(CorrelationId::from_counter(7).to_string(), "cmd-7");
        assert_eq!(CorrelationId::AUTH.to_string(), "cmd-0");
    }

    #[test]
    fn parses_wire_form() {
        let Ok(id) = "cmd-42".parse::<CorrelationId>() else {
            panic!("expected cmd-42 to parse");
        };
        assert_eq!(id.counter(), 42);
    }

    #[test]
    fn rejects_foreign_ids() {
        assert!("42".parse::<CorrelationId>().is_err());
        assert!("cmd-".parse::<CorrelationId>().is_err());
        assert!("evt-3".parse::<CorrelationId>().is_err());
    }

    #[test]
    fn orders_numerically() {
        let nine = CorrelationId::from_counter(9);
        let ten = CorrelationId::from_counter(10);
        assert!(nine < ten);
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&CorrelationId::from_counter(3)).ok();
        assert_eq!(json.as_deref(), Some("\"cmd-3\""));
    }
}
