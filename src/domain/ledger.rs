//! Pending-request ledger.
//!
//! [`Ledger`] tracks every request issued over the duplex channel until it
//! is either flushed (fire-and-forget) or answered (correlated). It has
//! three partitions:
//!
//! - the authentication slot, a single pending handshake payload (`cmd-0`);
//! - the queued map: fire-and-forget payloads waiting for a ready channel;
//! - the outstanding map: correlated payloads together with the reply slot
//!   that the matching response completes.
//!
//! Payload and reply slot live in the same entry, so taking an entry both
//! retires the payload and hands out its only [`Responder`]. A reply can
//! therefore complete a request at most once.

use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::oneshot;

use super::CorrelationId;
use crate::error::LinkError;

/// Completion side of a correlated request.
pub type Responder = oneshot::Sender<Result<Value, LinkError>>;

#[derive(Debug)]
struct Outstanding {
    payload: String,
    responder: Responder,
}

/// Bookkeeping for requests issued over the duplex channel.
#[derive(Debug, Default)]
pub struct Ledger {
    counter: u64,
    auth: Option<String>,
    queued: BTreeMap<CorrelationId, String>,
    outstanding: BTreeMap<CorrelationId, Outstanding>,
}

impl Ledger {
    /// Creates an empty ledger; the first issued id is `cmd-1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next correlation id. Ids are never reused.
    pub fn next_id(&mut self) -> CorrelationId {
        self.counter = self.counter.saturating_add(1);
        CorrelationId::from_counter(self.counter)
    }

    /// Records a serialized request.
    ///
    /// Without a responder the payload joins the fire-and-forget queue;
    /// with one it is kept until [`Ledger::take`] retires it. Enqueuing an
    /// id twice replaces the earlier attempt.
    pub fn enqueue(&mut self, id: CorrelationId, payload: String, responder: Option<Responder>) {
        match responder {
            None => {
                self.outstanding.remove(&id);
                self.queued.insert(id, payload);
            }
            Some(responder) => {
                self.queued.remove(&id);
                self.outstanding
                    .insert(id, Outstanding { payload, responder });
            }
        }
    }

    /// Retires an outstanding request and returns its responder.
    ///
    /// Unknown or already retired ids yield `None`.
    pub fn take(&mut self, id: CorrelationId) -> Option<Responder> {
        self.outstanding.remove(&id).map(|entry| entry.responder)
    }

    /// Completes an outstanding request with `outcome`.
    ///
    /// Returns `true` if the id was outstanding. A caller that stopped
    /// waiting is not an error.
    pub fn resolve(&mut self, id: CorrelationId, outcome: Result<Value, LinkError>) -> bool {
        match self.take(id) {
            Some(responder) => {
                if responder.send(outcome).is_err() {
                    tracing::debug!(%id, "reply arrived after caller stopped waiting");
                }
                true
            }
            None => false,
        }
    }

    /// Returns `true` if `id` is awaiting a reply.
    #[must_use]
    pub fn is_outstanding(&self, id: CorrelationId) -> bool {
        self.outstanding.contains_key(&id)
    }

    /// Stores the authentication handshake, replacing any pending one.
    pub fn set_auth(&mut self, payload: String) {
        if self.auth.replace(payload).is_some() {
            tracing::debug!("replaced pending authentication handshake");
        }
    }

    /// Removes and returns the pending authentication handshake.
    pub fn take_auth(&mut self) -> Option<String> {
        self.auth.take()
    }

    /// Returns all queued fire-and-forget payloads in issuance order and
    /// empties the queue.
    pub fn drain_queued(&mut self) -> Vec<String> {
        std::mem::take(&mut self.queued).into_values().collect()
    }

    /// Returns all outstanding correlated payloads in issuance order,
    /// keeping them until answered.
    #[must_use]
    pub fn snapshot_outstanding(&self) -> Vec<String> {
        self.outstanding
            .values()
            .map(|entry| entry.payload.clone())
            .collect()
    }

    /// Returns the oldest outstanding request, if any.
    #[must_use]
    pub fn oldest_outstanding(&self) -> Option<(CorrelationId, String)> {
        self.outstanding
            .first_key_value()
            .map(|(id, entry)| (*id, entry.payload.clone()))
    }

    /// Number of queued fire-and-forget payloads.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Number of correlated requests awaiting a reply.
    #[must_use]
    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    /// Drops every entry. Callers still waiting observe an abandoned reply.
    /// The id counter keeps counting.
    pub fn clear(&mut self) {
        self.auth = None;
        self.queued.clear();
        self.outstanding.clear();
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn responder() -> (Responder, oneshot::Receiver<Result<Value, LinkError>>) {
        oneshot::channel()
    }

    #[test]
    fn ids_are_monotonic_and_start_after_auth() {
        let mut ledger = Ledger::new();
        let a = ledger.next_id();
        let b = ledger.next_id();
        let c = ledger.next_id();
        assert_eq!(a.to_string(), "cmd-1");
        assert!(a < b && b < c);
        assert_ne!(a, CorrelationId::AUTH);
    }

    #[test]
    fn enqueue_without_responder_goes_to_queue() {
        let mut ledger = Ledger::new();
        let id = ledger.next_id();
        ledger.enqueue(id, "p".into(), None);
        assert_eq!(ledger.queued_len(), 1);
        assert_eq!(ledger.outstanding_len(), 0);
        assert!(!ledger.is_outstanding(id));
    }

    #[test]
    fn drain_returns_issuance_order_and_clears() {
        let mut ledger = Ledger::new();
        for name in ["r1", "r2", "r3"] {
            let id = ledger.next_id();
            ledger.enqueue(id, name.into(), None);
        }
        assert_eq!(ledger.drain_queued(), vec!["r1", "r2", "r3"]);
        assert!(ledger.drain_queued().is_empty());
    }

    #[test]
    fn order_is_numeric_past_nine() {
        let mut ledger = Ledger::new();
        let mut expected = Vec::new();
        for n in 0..12 {
            let id = ledger.next_id();
            let payload = format!("p{n}");
            ledger.enqueue(id, payload.clone(), None);
            expected.push(payload);
        }
        assert_eq!(ledger.drain_queued(), expected);
    }

    #[tokio::test]
    async fn resolve_completes_once() {
        let mut ledger = Ledger::new();
        let id = ledger.next_id();
        let (tx, rx) = responder();
        ledger.enqueue(id, "p".into(), Some(tx));

        assert!(ledger.resolve(id, Ok(Value::from(1))));
        assert!(!ledger.resolve(id, Ok(Value::from(2))));

        let Ok(Ok(value)) = rx.await else {
            panic!("expected a successful reply");
        };
        assert_eq!(value, Value::from(1));
    }

    #[test]
    fn unknown_id_is_ignored() {
        let mut ledger = Ledger::new();
        assert!(ledger.take(CorrelationId::from_counter(99)).is_none());
        assert!(!ledger.resolve(CorrelationId::from_counter(99), Ok(Value::Null)));
    }

    #[test]
    fn snapshot_keeps_outstanding_entries() {
        let mut ledger = Ledger::new();
        let (tx1, _rx1) = responder();
        let (tx2, _rx2) = responder();
        let a = ledger.next_id();
        let b = ledger.next_id();
        ledger.enqueue(b, "second".into(), Some(tx2));
        ledger.enqueue(a, "first".into(), Some(tx1));

        assert_eq!(ledger.snapshot_outstanding(), vec!["first", "second"]);
        assert_eq!(ledger.outstanding_len(), 2);
        assert_eq!(ledger.oldest_outstanding(), Some((a, "first".to_string())));
    }

    #[test]
    fn re_enqueue_moves_between_partitions() {
        let mut ledger = Ledger::new();
        let id = ledger.next_id();
        ledger.enqueue(id, "queued".into(), None);
        let (tx, _rx) = responder();
        ledger.enqueue(id, "tracked".into(), Some(tx));
        assert_eq!(ledger.queued_len(), 0);
        assert!(ledger.is_outstanding(id));
    }

    #[test]
    fn auth_slot_holds_one_handshake() {
        let mut ledger = Ledger::new();
        ledger.set_auth("first".into());
        ledger.set_auth("second".into());
        assert_eq!(ledger.take_auth().as_deref(), Some("second"));
        assert!(ledger.take_auth().is_none());
    }

    #[tokio::test]
    async fn clear_abandons_waiters() {
        let mut ledger = Ledger::new();
        let id = ledger.next_id();
        let (tx, rx) = responder();
        ledger.enqueue(id, "p".into(), Some(tx));
        ledger.clear();
        assert!(rx.await.is_err());
        assert_eq!(ledger.next_id().counter(), 2);
    }
}
