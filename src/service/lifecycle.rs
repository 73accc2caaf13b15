//! Duplex channel lifecycle.
//!
//! ```text
//!            open                 opened
//!  Closed ─────────▶ Initializing ───────▶ Ready
//!    ▲                   │                   │
//!    │ close / 1007      │ error / abnormal close
//!    │                   ▼                   ▼
//!    └───────────── Restarting ◀──────── Error/Closed
//!                        │ backoff elapsed
//!                        └──────▶ Initializing (restart)
//! ```
//!
//! Every transition runs under the link's state lock. Lifecycle events are
//! published and handlers invoked only after the lock is released.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::link::LinkInner;
use crate::config::{DEVICE_PARAM, SESSION_PARAM};
use crate::context::Credentials;
use crate::domain::{ConnectionStatus, CorrelationId, Ledger, LinkEvent, RequestInfo};
use crate::error::LinkError;
use crate::ws::connection::run_channel;
use crate::ws::connector::{Frame, INTENTIONAL_CLOSE};
use crate::ws::messages::{AUTH_VERB, SESSION_SERVICE, encode_request};

/// Live duplex channel owned by the link. Dropping it stops the channel
/// task.
#[derive(Debug)]
pub(crate) struct ChannelHandle {
    pub(crate) generation: u64,
    pub(crate) restart: bool,
    pub(crate) outbound: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Mutable connection context guarded by the link's state lock.
#[derive(Debug)]
pub(crate) struct LinkState {
    pub(crate) channel: Option<ChannelHandle>,
    pub(crate) generation: u64,
    pub(crate) attempt: u32,
    pub(crate) ledger: Ledger,
    pub(crate) credentials: Credentials,
    /// Set by an explicit close or an intentional close code; suppresses
    /// automatic and lazy reopening until the next explicit open.
    pub(crate) held_closed: bool,
    pub(crate) reconnect_timer: Option<CancellationToken>,
    pub(crate) replay_task: Option<CancellationToken>,
}

impl LinkState {
    pub(crate) fn new(credentials: Credentials) -> Self {
        Self {
            channel: None,
            generation: 0,
            attempt: 0,
            ledger: Ledger::new(),
            credentials,
            held_closed: false,
            reconnect_timer: None,
            replay_task: None,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|channel| channel.generation == generation)
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
        if let Some(task) = self.replay_task.take() {
            task.cancel();
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl LinkInner {
    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Publishes a status. Callers hold the state lock.
    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            tracing::debug!(from = %previous, to = %status, "link status changed");
        }
    }

    /// Starts a channel unless one already exists.
    ///
    /// Returns `Ok(false)` when a handle was already present.
    pub(crate) fn open_channel(self: &Arc<Self>, restart: bool) -> Result<bool, LinkError> {
        if !self.config.duplex_enabled {
            return Err(LinkError::DuplexUnsupported);
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.channel.is_some() {
            tracing::debug!("duplex channel already exists");
            return Ok(false);
        }

        let url = self.config.channel_url(&state.credentials, restart)?;
        if let Some(timer) = state.reconnect_timer.take() {
            timer.cancel();
        }
        state.generation += 1;
        let generation = state.generation;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        state.channel = Some(ChannelHandle {
            generation,
            restart,
            outbound,
            cancel: cancel.clone(),
        });
        state.held_closed = false;
        self.set_status(ConnectionStatus::Initializing);
        drop(guard);

        tracing::info!(
            host = url.host_str().unwrap_or_default(),
            generation,
            restart,
            "opening duplex channel"
        );
        tokio::spawn(run_channel(
            Arc::clone(self),
            url,
            generation,
            outbound_rx,
            cancel,
        ));
        Ok(true)
    }

    pub(crate) fn on_opened(self: &Arc<Self>, generation: u64) {
        let restart = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(restart) = state
                .channel
                .as_ref()
                .filter(|channel| channel.generation == generation)
                .map(|channel| channel.restart)
            else {
                return;
            };
            self.set_status(ConnectionStatus::Ready);
            if let Some(task) = state.replay_task.take() {
                task.cancel();
            }
            self.heartbeat.touch();
            self.authenticate_locked(state);
            restart
        };

        tracing::info!(generation, restart, "duplex channel ready");
        self.events.publish(LinkEvent::Opened { restart });
        if restart {
            self.schedule_attempt_reset(generation);
        }
    }

    /// Resets the reconnect counter once a reopened channel has stayed up
    /// for the grace period.
    fn schedule_attempt_reset(self: &Arc<Self>, generation: u64) {
        let inner = Arc::clone(self);
        let grace = self.config.reconnect_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut state = inner.state.lock();
            if state.is_current(generation) && inner.status().is_ready() {
                state.attempt = 0;
                tracing::debug!(generation, "reconnect attempts reset");
            }
        });
    }

    pub(crate) fn on_closed(self: &Arc<Self>, generation: u64, code: Option<u16>) {
        let intentional = code == Some(INTENTIONAL_CLOSE);
        let reconnect = {
            let mut state = self.state.lock();
            if !state.is_current(generation) {
                return;
            }
            state.channel = None;
            if intentional {
                state.held_closed = true;
            }
            self.set_status(ConnectionStatus::Closed);
            !state.held_closed
        };

        self.events.publish(LinkEvent::Closed { code, intentional });
        if reconnect {
            tracing::warn!(?code, "duplex channel closed unexpectedly");
            self.reopen("channel closed", None);
        } else {
            tracing::info!(?code, "duplex channel closed");
        }
    }

    pub(crate) fn on_errored(&self, generation: u64, err: &LinkError) {
        {
            let state = self.state.lock();
            if !state.is_current(generation) {
                return;
            }
            self.set_status(ConnectionStatus::Error);
        }
        tracing::warn!(generation, error = %err, "duplex channel error");
        self.events.publish(LinkEvent::Errored {
            reason: err.to_string(),
        });
    }

    /// Tears the channel down and schedules a restart after `defer` or the
    /// configured backoff. Ignored while a restart is already scheduled.
    pub(crate) fn reopen(self: &Arc<Self>, reason: &str, defer: Option<Duration>) -> bool {
        if !self.config.duplex_enabled {
            return false;
        }

        let (attempt, delay, token) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if self.status() == ConnectionStatus::Restarting {
                tracing::debug!(reason, "restart already scheduled");
                return false;
            }
            state.channel = None;
            self.set_status(ConnectionStatus::Restarting);
            state.attempt = state.attempt.saturating_add(1);
            let delay = defer.unwrap_or_else(|| self.config.backoff(state.attempt));
            let token = CancellationToken::new();
            if let Some(previous) = state.reconnect_timer.replace(token.clone()) {
                previous.cancel();
            }
            (state.attempt, delay, token)
        };

        let delay_ms = millis(delay);
        tracing::warn!(reason, attempt, delay_ms, "scheduling duplex reconnect");
        self.events.publish(LinkEvent::Restarting {
            reason: reason.to_string(),
            attempt,
            delay_ms,
        });

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => inner.reconnect_due(&token),
            }
        });
        true
    }

    fn reconnect_due(self: &Arc<Self>, token: &CancellationToken) {
        {
            let mut state = self.state.lock();
            if token.is_cancelled() {
                return;
            }
            state.reconnect_timer = None;
        }
        if let Err(err) = self.open_channel(true) {
            tracing::warn!(error = %err, "reconnect could not start");
            let _state = self.state.lock();
            if self.status() == ConnectionStatus::Restarting {
                self.set_status(ConnectionStatus::Closed);
            }
        }
    }

    /// Explicit close: no automatic reconnect follows.
    pub(crate) fn close(&self) {
        let had_channel = {
            let mut state = self.state.lock();
            state.held_closed = true;
            state.cancel_timers();
            state.attempt = 0;
            let had_channel = state.channel.take().is_some();
            self.set_status(ConnectionStatus::Closed);
            had_channel
        };
        tracing::info!(had_channel, "duplex channel closed on request");
        self.events.publish(LinkEvent::Closed {
            code: None,
            intentional: true,
        });
    }

    /// Close, then abandon every pending request and drop every handler.
    pub(crate) fn shutdown(&self) {
        self.close();
        let abandoned = {
            let mut state = self.state.lock();
            let abandoned = state.ledger.outstanding_len() + state.ledger.queued_len();
            state.ledger.clear();
            abandoned
        };
        self.dispatcher.clear();
        *self.raw_observer.write() = None;
        tracing::info!(abandoned, "link shut down");
    }

    /// Rebuilds the handshake and flushes it when the channel is ready.
    pub(crate) fn authenticate(&self) {
        let mut guard = self.state.lock();
        self.authenticate_locked(&mut guard);
    }

    fn authenticate_locked(&self, state: &mut LinkState) {
        match self.handshake_payload(&state.credentials) {
            Ok(payload) => state.ledger.set_auth(payload),
            Err(err) => tracing::warn!(error = %err, "could not build authentication handshake"),
        }
        if self.status().is_ready() {
            self.flush_locked(state, None, true);
        }
    }

    fn handshake_payload(&self, credentials: &Credentials) -> Result<String, LinkError> {
        let cipher = &self.collaborators.cipher;
        let mut request = RequestInfo::new(SESSION_SERVICE, "").with_verb(AUTH_VERB);
        request.headers = credentials.auth_headers.clone();
        request
            .headers
            .insert(SESSION_PARAM.to_string(), cipher.seal(&credentials.session_id)?);
        request
            .headers
            .insert(DEVICE_PARAM.to_string(), cipher.seal(&credentials.device_id)?);
        encode_request(&request, CorrelationId::AUTH)
    }

    /// Writes pending frames in order: handshake, fire-and-forget queue,
    /// `fresh`, then (when asked) every outstanding request.
    pub(crate) fn flush_locked(
        &self,
        state: &mut LinkState,
        fresh: Option<String>,
        resend_outstanding: bool,
    ) {
        let Some(channel) = state.channel.as_ref() else {
            return;
        };

        let mut frames: Vec<String> = Vec::new();
        frames.extend(state.ledger.take_auth());
        frames.extend(state.ledger.drain_queued());
        frames.extend(fresh);
        if resend_outstanding {
            frames.extend(state.ledger.snapshot_outstanding());
        }

        let count = frames.len();
        for frame in frames {
            if channel.outbound.send(Frame::Text(frame)).is_err() {
                tracing::warn!(count, "channel writer gone; flush interrupted");
                return;
            }
        }
        if count > 0 {
            tracing::debug!(count, "flushed frames to duplex channel");
        }
    }

    /// Recovery after an undecodable frame: resend the oldest outstanding
    /// request now, or as soon as the channel is ready again.
    pub(crate) fn schedule_replay_one(self: &Arc<Self>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.ledger.outstanding_len() == 0 {
            return;
        }
        if self.status().is_ready() {
            Self::replay_oldest_locked(state);
            return;
        }
        if state.replay_task.is_some() || state.held_closed {
            return;
        }

        let token = CancellationToken::new();
        state.replay_task = Some(token.clone());
        drop(guard);

        let inner = Arc::clone(self);
        let interval = self.config.replay_retry_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        if inner.try_replay_oldest() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn try_replay_oldest(&self) -> bool {
        let mut guard = self.state.lock();
        if !self.status().is_ready() {
            return false;
        }
        let state = &mut *guard;
        Self::replay_oldest_locked(state);
        state.replay_task = None;
        true
    }

    fn replay_oldest_locked(state: &LinkState) {
        let Some((id, payload)) = state.ledger.oldest_outstanding() else {
            return;
        };
        if let Some(channel) = &state.channel
            && channel.outbound.send(Frame::Text(payload)).is_ok()
        {
            tracing::info!(%id, "replayed oldest outstanding request");
        }
    }
}
