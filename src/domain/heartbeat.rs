//! Channel liveness tracking.
//!
//! [`Heartbeat`] records when the duplex channel last proved it was alive
//! (a successful open or a `Ping` frame). The recorded instant only moves
//! forward.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Default staleness threshold (5 minutes).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_millis(300_000);

/// Last-seen-alive timestamp of the duplex channel.
#[derive(Debug)]
pub struct Heartbeat {
    origin: Instant,
    /// Milliseconds since `origin`, offset by one; zero means never seen.
    last_alive: AtomicU64,
}

impl Heartbeat {
    /// Creates a monitor that has never seen the channel alive.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_alive: AtomicU64::new(0),
        }
    }

    /// Marks the channel alive now.
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    /// Marks the channel alive at `at`. Instants older than the current
    /// record are ignored.
    pub fn touch_at(&self, at: Instant) {
        let millis = u64::try_from(at.saturating_duration_since(self.origin).as_millis())
            .unwrap_or(u64::MAX - 1);
        self.last_alive
            .fetch_max(millis.saturating_add(1), Ordering::AcqRel);
    }

    /// When the channel was last seen alive.
    #[must_use]
    pub fn last_alive(&self) -> Option<Instant> {
        match self.last_alive.load(Ordering::Acquire) {
            0 => None,
            stamp => Some(self.origin + Duration::from_millis(stamp - 1)),
        }
    }

    /// Returns `true` if the channel has not been seen alive within
    /// `max_age`. A channel never seen alive is stale.
    #[must_use]
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.last_alive()
            .is_none_or(|seen| Instant::now().saturating_duration_since(seen) > max_age)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}
