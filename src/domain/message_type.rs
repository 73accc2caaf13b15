//! Compound message type strings (`service#object#event`).
//!
//! Parsed types are memoized for the lifetime of the process. The key
//! space is bounded by the distinct event names the gateway emits, so the
//! cache is never evicted.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use serde::Serialize;

/// Literal type keyword of error frames.
pub const ERROR_TYPE: &str = "Error";
/// Heartbeat service name.
pub const PING_SERVICE: &str = "Ping";
/// Periodic background trigger service name.
pub const SCHEDULER_SERVICE: &str = "Scheduler";
/// Liveness probe service name.
pub const KNOCK_SERVICE: &str = "Knock";

static CACHE: LazyLock<RwLock<HashMap<String, Arc<MessageType>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Structured form of a compound type string.
///
/// Missing parts are empty strings, never absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageType {
    /// Service name (first segment).
    pub service: String,
    /// Object name (second segment), empty when absent.
    pub object: String,
    /// Event name (remainder after the second `#`), empty when absent.
    pub event: String,
}

impl MessageType {
    /// Builds a type from its parts.
    #[must_use]
    pub fn new(
        service: impl Into<String>,
        object: impl Into<String>,
        event: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            object: object.into(),
            event: event.into(),
        }
    }

    /// Parses a compound type string, splitting on the first two `#`.
    ///
    /// Results are memoized by the raw string.
    #[must_use]
    pub fn parse(raw: &str) -> Arc<Self> {
        if let Some(hit) = CACHE.read().get(raw) {
            return Arc::clone(hit);
        }
        let parsed = Arc::new(Self::split(raw));
        let mut cache = CACHE.write();
        Arc::clone(cache.entry(raw.to_string()).or_insert(parsed))
    }

    fn split(raw: &str) -> Self {
        let mut parts = raw.splitn(3, '#');
        Self::new(
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
        )
    }

    /// The synthetic session revocation type (`Users#Session#Revoke`).
    #[must_use]
    pub fn session_revoke() -> Arc<Self> {
        Self::parse("Users#Session#Revoke")
    }

    /// Object-scope registry key (`service#object`), or `None` when the
    /// type carries no object.
    #[must_use]
    pub fn object_scope_key(&self) -> Option<String> {
        if self.object.is_empty() {
            None
        } else {
            Some(object_key(&self.service, &self.object))
        }
    }
}

/// Formats an object-scope registry key.
#[must_use]
pub fn object_key(service: &str, object: &str) -> String {
    format!("{service}#{object}")
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.service)?;
        if !self.object.is_empty() || !self.event.is_empty() {
            write!(f, "#{}", self.object)?;
        }
        if !self.event.is_empty() {
            write!(f, "#{}", self.event)?;
        }
        Ok(())
    }
}
