//! Reply handle returned by every send.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::domain::CorrelationId;
use crate::error::LinkError;

/// Transport a request was routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// The persistent duplex channel.
    Duplex,
    /// The request/response fallback.
    Fallback,
}

/// How a send should be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Route {
    /// Duplex when ready and fresh, otherwise fallback.
    #[default]
    Auto,
    /// Always use the fallback.
    PreferFallback,
    /// Always use the duplex channel; queue until it is ready. Fails with
    /// `NotReady` while the link is held closed.
    DuplexOnly,
}

/// Per-send options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Routing preference.
    pub route: Route,
    /// Whether the caller waits for a correlated reply.
    pub expect_reply: bool,
    /// Whether to resend every outstanding correlated request along with
    /// this one.
    pub resend_outstanding: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            route: Route::Auto,
            expect_reply: true,
            resend_outstanding: false,
        }
    }
}

impl SendOptions {
    /// Options for a fire-and-forget send.
    #[must_use]
    pub fn fire_and_forget() -> Self {
        Self {
            expect_reply: false,
            ..Self::default()
        }
    }

    /// Sets the route.
    #[must_use]
    pub const fn with_route(mut self, route: Route) -> Self {
        self.route = route;
        self
    }

    /// Requests a resend of every outstanding correlated request.
    #[must_use]
    pub const fn resending_outstanding(mut self) -> Self {
        self.resend_outstanding = true;
        self
    }
}

#[derive(Debug)]
enum ReplyState {
    Waiting(oneshot::Receiver<Result<Value, LinkError>>),
    Spawned(JoinHandle<Result<Value, LinkError>>),
    Done(Option<Result<Value, LinkError>>),
}

/// Future resolving to the outcome of a send.
///
/// Duplex fire-and-forget sends resolve immediately with `Null`.
/// Dropping a reply does not cancel the request.
#[derive(Debug)]
pub struct Reply {
    id: Option<CorrelationId>,
    transport: Transport,
    state: ReplyState,
}

impl Reply {
    pub(crate) fn waiting(
        id: CorrelationId,
        rx: oneshot::Receiver<Result<Value, LinkError>>,
    ) -> Self {
        Self {
            id: Some(id),
            transport: Transport::Duplex,
            state: ReplyState::Waiting(rx),
        }
    }

    pub(crate) fn spawned(handle: JoinHandle<Result<Value, LinkError>>) -> Self {
        Self {
            id: None,
            transport: Transport::Fallback,
            state: ReplyState::Spawned(handle),
        }
    }

    pub(crate) fn done(
        id: Option<CorrelationId>,
        transport: Transport,
        outcome: Result<Value, LinkError>,
    ) -> Self {
        Self {
            id,
            transport,
            state: ReplyState::Done(Some(outcome)),
        }
    }

    /// Correlation id, for duplex sends.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.id
    }

    /// Transport the request was routed through.
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }
}

impl Future for Reply {
    type Output = Result<Value, LinkError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let id = this.id;
        match &mut this.state {
            ReplyState::Waiting(rx) => Pin::new(rx).poll(cx).map(|received| {
                received.unwrap_or_else(|_| {
                    Err(id.map_or_else(
                        || LinkError::Internal("reply slot dropped".to_string()),
                        LinkError::Abandoned,
                    ))
                })
            }),
            ReplyState::Spawned(handle) => Pin::new(handle).poll(cx).map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(LinkError::Internal(format!("fallback task failed: {e}")))
                })
            }),
            ReplyState::Done(outcome) => Poll::Ready(outcome.take().unwrap_or_else(|| {
                Err(LinkError::Internal(
                    "reply polled after completion".to_string(),
                ))
            })),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiting_reply_resolves_with_sent_value() {
        let (tx, rx) = oneshot::channel();
        let reply = Reply::waiting(CorrelationId::from_counter(1), rx);
        assert_eq!(reply.transport(), Transport::Duplex);
        let _ = tx.send(Ok(Value::from("ok")));
        let Ok(value) = reply.await else {
            panic!("expected value");
        };
        assert_eq!(value, Value::from("ok"));
    }

    #[tokio::test]
    async fn dropped_slot_reports_abandoned() {
        let (tx, rx) = oneshot::channel::<Result<Value, LinkError>>();
        let reply = Reply::waiting(CorrelationId::from_counter(5), rx);
        drop(tx);
        assert!(matches!(reply.await, Err(LinkError::Abandoned(id)) if id.counter() == 5));
    }

    #[tokio::test]
    async fn spawned_reply_awaits_task() {
        let reply = Reply::spawned(tokio::spawn(async { Ok(Value::from(7)) }));
        assert_eq!(reply.transport(), Transport::Fallback);
        assert!(reply.correlation_id().is_none());
        assert_eq!(reply.await.ok(), Some(Value::from(7)));
    }

    #[test]
    fn options_builders() {
        let opts = SendOptions::fire_and_forget()
            .with_route(Route::DuplexOnly)
            .resending_outstanding();
        assert!(!opts.expect_reply);
        assert!(opts.resend_outstanding);
        assert_eq!(opts.route, Route::DuplexOnly);
        assert_eq!(SendOptions::default().route, Route::Auto);
    }
}
