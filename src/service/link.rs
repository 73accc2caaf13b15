//! The [`Link`] facade and transport selection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, oneshot, watch};

use super::lifecycle::LinkState;
use super::reply::{Reply, Route, SendOptions, Transport};
use crate::config::LinkConfig;
use crate::context::{Collaborators, Credentials};
use crate::domain::{ConnectionStatus, Heartbeat, LinkEvent, LinkEvents, Message, RequestInfo};
use crate::error::LinkError;
use crate::ws::messages::encode_request;
use crate::ws::subscription::{Dispatcher, Scope};

type RawObserver = dyn Fn(&str) + Send + Sync;

/// Shared state behind every [`Link`] clone.
pub(crate) struct LinkInner {
    pub(crate) config: LinkConfig,
    pub(crate) collaborators: Collaborators,
    pub(crate) state: Mutex<LinkState>,
    pub(crate) status_tx: watch::Sender<ConnectionStatus>,
    pub(crate) heartbeat: Heartbeat,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) events: LinkEvents,
    pub(crate) raw_observer: RwLock<Option<Arc<RawObserver>>>,
}

impl fmt::Debug for LinkInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkInner")
            .field("config", &self.config)
            .field("status", &self.status())
            .field("heartbeat", &self.heartbeat)
            .finish_non_exhaustive()
    }
}

impl LinkInner {
    pub(crate) fn dispatch(self: &Arc<Self>, request: RequestInfo, options: SendOptions) -> Reply {
        if options.route == Route::DuplexOnly && !self.config.duplex_enabled {
            return Reply::done(None, Transport::Duplex, Err(LinkError::DuplexUnsupported));
        }
        // Held closed: nothing would ever flush the request.
        if options.route == Route::DuplexOnly && self.state.lock().held_closed {
            return Reply::done(None, Transport::Duplex, Err(LinkError::NotReady(self.status())));
        }
        if self.duplex_eligible(options.route) {
            self.send_duplex(&request, options.expect_reply, options.resend_outstanding)
        } else {
            self.send_fallback(request, options.expect_reply)
        }
    }

    fn duplex_eligible(self: &Arc<Self>, route: Route) -> bool {
        match route {
            Route::PreferFallback => false,
            Route::DuplexOnly => {
                self.ensure_started();
                true
            }
            Route::Auto => {
                if !self.config.duplex_enabled {
                    return false;
                }
                if !self.status().is_ready() {
                    self.ensure_started();
                    return false;
                }
                if self.heartbeat.is_stale(self.config.heartbeat_max_age) {
                    tracing::warn!("heartbeat stale; routing through fallback");
                    self.reopen("heartbeat stale", None);
                    return false;
                }
                true
            }
        }
    }

    /// Lazily opens the channel on first use.
    fn ensure_started(self: &Arc<Self>) {
        if !self.config.auto_connect || !self.config.duplex_enabled {
            return;
        }
        let idle = {
            let state = self.state.lock();
            state.channel.is_none()
                && !state.held_closed
                && self.status() == ConnectionStatus::Closed
        };
        if idle && let Err(err) = self.open_channel(false) {
            tracing::warn!(error = %err, "lazy channel open failed");
        }
    }

    pub(crate) fn send_duplex(
        &self,
        request: &RequestInfo,
        expect_reply: bool,
        resend_outstanding: bool,
    ) -> Reply {
        let normalized = request.normalized();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let id = state.ledger.next_id();
        let payload = match encode_request(&normalized, id) {
            Ok(payload) => payload,
            Err(err) => return Reply::done(Some(id), Transport::Duplex, Err(err)),
        };

        let (reply, responder) = if expect_reply {
            let (tx, rx) = oneshot::channel();
            (Reply::waiting(id, rx), Some(tx))
        } else {
            (Reply::done(Some(id), Transport::Duplex, Ok(Value::Null)), None)
        };
        let fresh = (expect_reply && !resend_outstanding).then(|| payload.clone());
        state.ledger.enqueue(id, payload, responder);

        let ready = self.status().is_ready();
        if ready {
            self.flush_locked(state, fresh, resend_outstanding);
        }
        tracing::debug!(
            %id,
            service = %normalized.service,
            object = %normalized.object,
            ready,
            "request routed over duplex channel"
        );
        reply
    }

    fn send_fallback(&self, request: RequestInfo, expect_reply: bool) -> Reply {
        let url = match request.fallback_url(&self.config.base_url) {
            Ok(url) => url,
            Err(err) => return Reply::done(None, Transport::Fallback, Err(err)),
        };
        let transport = Arc::clone(&self.collaborators.fallback);
        let verb = request.verb().to_string();
        tracing::debug!(%verb, path = url.path(), "request routed through fallback");

        let handle = tokio::spawn(async move {
            let body = (!request.body.is_null()).then_some(&request.body);
            let result = transport.call(&verb, url, &request.headers, body).await;
            if let Err(err) = &result {
                if expect_reply {
                    tracing::debug!(%verb, error = %err, "fallback request failed");
                } else {
                    tracing::warn!(%verb, error = %err, "fallback request failed");
                }
            }
            result
        });
        Reply::spawned(handle)
    }
}

/// Client-side handle to one gateway connection.
///
/// Cheap to clone; all clones share the same channel, ledger and handler
/// registries. Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("status", &self.status())
            .field("base_url", &self.inner.config.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Creates an idle link. Nothing connects until [`Link::open`], or the
    /// first routed request when `auto_connect` is set.
    #[must_use]
    pub fn new(config: LinkConfig, collaborators: Collaborators) -> Self {
        let events = LinkEvents::new(config.event_capacity);
        let (status_tx, _) = watch::channel(ConnectionStatus::Closed);
        let state = LinkState::new(config.credentials.clone());
        let dispatcher = Dispatcher::new(Arc::clone(&collaborators.reporter));
        Self {
            inner: Arc::new(LinkInner {
                config,
                collaborators,
                state: Mutex::new(state),
                status_tx,
                heartbeat: Heartbeat::new(),
                dispatcher,
                events,
                raw_observer: RwLock::new(None),
            }),
        }
    }

    /// Link configuration.
    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    /// Current channel status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }

    /// Receiver observing every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.events.subscribe()
    }

    /// Liveness tracker fed by server pings.
    #[must_use]
    pub fn heartbeat(&self) -> &Heartbeat {
        &self.inner.heartbeat
    }

    /// Replaces the credentials used by the next handshake.
    pub fn set_credentials(&self, credentials: Credentials) {
        self.inner.state.lock().credentials = credentials;
    }

    /// Starts the duplex channel. A no-op when a channel already exists.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::DuplexUnsupported`] when duplex is disabled and
    /// [`LinkError::InvalidUrl`] when the channel URL cannot be built.
    pub fn open(&self) -> Result<(), LinkError> {
        self.inner.open_channel(false).map(|_| ())
    }

    /// Opens the channel and waits until it is ready.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Timeout`] when the channel is not ready within
    /// `timeout`, plus the errors of [`Link::open`].
    pub async fn connect(&self, timeout: Duration) -> Result<(), LinkError> {
        let mut status = self.watch_status();
        self.open()?;
        match tokio::time::timeout(timeout, status.wait_for(|s| s.is_ready())).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(LinkError::Internal("status channel closed".to_string())),
            Err(_) => Err(LinkError::Timeout(timeout)),
        }
    }

    /// Closes the channel without scheduling a reconnect. Outstanding
    /// requests are kept and replayed on the next open.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Closes the channel, abandons every pending request and drops every
    /// registered handler.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Tears the channel down and schedules a reconnect after `defer`, or
    /// the configured backoff. Returns `false` when a reconnect was already
    /// scheduled.
    pub fn reopen(&self, reason: &str, defer: Option<Duration>) -> bool {
        self.inner.reopen(reason, defer)
    }

    /// Rebuilds the authentication handshake. When the channel is ready it
    /// is sent immediately, followed by the queue and every outstanding
    /// request.
    pub fn authenticate(&self) {
        self.inner.authenticate();
    }

    /// Sends a request expecting a reply.
    pub fn send_request(&self, request: RequestInfo, prefer_fallback: bool) -> Reply {
        let route = if prefer_fallback {
            Route::PreferFallback
        } else {
            Route::Auto
        };
        self.dispatch(request, SendOptions::default().with_route(route))
    }

    /// Sends a fire-and-forget request.
    pub fn post(&self, request: RequestInfo, prefer_fallback: bool) -> Reply {
        let route = if prefer_fallback {
            Route::PreferFallback
        } else {
            Route::Auto
        };
        self.dispatch(request, SendOptions::fire_and_forget().with_route(route))
    }

    /// Routes a request with explicit options.
    pub fn dispatch(&self, request: RequestInfo, options: SendOptions) -> Reply {
        self.inner.dispatch(request, options)
    }

    /// Sends a request and awaits its reply.
    ///
    /// # Errors
    ///
    /// Returns whatever the chosen transport or the gateway reported.
    pub async fn request(
        &self,
        request: RequestInfo,
        prefer_fallback: bool,
    ) -> Result<Value, LinkError> {
        self.send_request(request, prefer_fallback).await
    }

    /// Registers a handler for every message of `service`.
    pub fn register_service_processor<F>(&self, service: &str, handler: F, identity: &str)
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.register_service(service, handler, identity);
    }

    /// Registers a handler for messages of `service` naming `object`.
    pub fn register_object_processor<F>(
        &self,
        service: &str,
        object: &str,
        handler: F,
        identity: &str,
    ) where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner
            .dispatcher
            .register_object(service, object, handler, identity);
    }

    /// Removes every handler registered under `identity` for `service` and,
    /// when given, `service#object`.
    pub fn unregister_processor(&self, identity: &str, service: &str, object: Option<&str>) -> usize {
        self.inner.dispatcher.unregister(identity, service, object)
    }

    /// Drops every handler of `service`, anonymous ones included.
    pub fn clear_service_processors(&self, service: &str) -> usize {
        self.inner.dispatcher.clear_service(service)
    }

    /// Drops every handler of `service#object`, anonymous ones included.
    pub fn clear_object_processors(&self, service: &str, object: &str) -> usize {
        self.inner.dispatcher.clear_object(service, object)
    }

    /// Number of handlers registered under `key` in `scope`.
    #[must_use]
    pub fn handler_count(&self, scope: Scope, key: &str) -> usize {
        self.inner.dispatcher.handler_count(scope, key)
    }

    /// Delivers `message` to local handlers as if it came from the gateway.
    pub fn broadcast(&self, message: &Message) -> usize {
        self.inner.dispatcher.broadcast(message)
    }

    /// Installs an observer seeing every inbound frame before decoding.
    pub fn observe_raw<F>(&self, observer: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.inner.raw_observer.write() = Some(Arc::new(observer));
    }

    /// Current reconnect attempt counter.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().attempt
    }

    /// Fire-and-forget requests waiting for a ready channel.
    #[must_use]
    pub fn queued_requests(&self) -> usize {
        self.inner.state.lock().ledger.queued_len()
    }

    /// Correlated requests still waiting for a reply.
    #[must_use]
    pub fn outstanding_requests(&self) -> usize {
        self.inner.state.lock().ledger.outstanding_len()
    }
}
