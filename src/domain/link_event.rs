//! Lifecycle notifications of the duplex channel.
//!
//! [`LinkEvents`] wraps a [`tokio::sync::broadcast`] channel. Every
//! lifecycle transition publishes a [`LinkEvent`]; host code subscribes to
//! react to opens, closes and reconnect attempts.

use tokio::sync::broadcast;

/// Lifecycle notification emitted by the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The channel opened and the authentication handshake was sent.
    Opened {
        /// Whether this open was a reconnect.
        restart: bool,
    },
    /// The channel closed.
    Closed {
        /// Close code reported by the peer, if any.
        code: Option<u16>,
        /// Whether the close was intentional (explicit or code 1007).
        intentional: bool,
    },
    /// The transport reported an error.
    Errored {
        /// Error description.
        reason: String,
    },
    /// A reconnect attempt was scheduled.
    Restarting {
        /// Why the reconnect was requested.
        reason: String,
        /// Attempt number since the last stable open.
        attempt: u32,
        /// Delay before the attempt, in milliseconds.
        delay_ms: u64,
    },
}

/// Broadcast bus for [`LinkEvent`]s.
///
/// Lagging receivers lose the oldest events once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct LinkEvents {
    sender: broadcast::Sender<LinkEvent>,
}

impl LinkEvents {
    /// Creates a bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event; returns the number of receivers reached.
    pub fn publish(&self, event: LinkEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Creates a receiver for all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.sender.subscribe()
    }

    /// Current number of receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_receivers_returns_zero() {
        let bus = LinkEvents::new(8);
        assert_eq!(bus.publish(LinkEvent::Opened { restart: false }), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_event() {
        let bus = LinkEvents::new(8);
        let mut rx = bus.subscribe();
        bus.publish(LinkEvent::Closed {
            code: Some(1007),
            intentional: true,
        });
        let Ok(event) = rx.recv().await else {
            panic!("expected to receive event");
        };
        assert_eq!(
            event,
            LinkEvent::Closed {
                code: Some(1007),
                intentional: true
            }
        );
    }

    #[test]
    fn receiver_count_tracks_subscribers() {
        let bus = LinkEvents::new(8);
        let rx = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);
        drop(rx);
        assert_eq!(bus.receiver_count(), 0);
    }
}
