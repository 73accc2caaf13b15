//! Inbound frame routing.
//!
//! Each decoded frame goes to exactly one place: the waiting reply slot of
//! a correlated request, the security pathway for rejected sessions, one of
//! the reserved control services, or the subscriber dispatcher.

use std::sync::Arc;

use serde_json::Value;

use super::messages::{PONG_VERB, SESSION_SERVICE, decode_envelope};
use crate::domain::message_type::{KNOCK_SERVICE, PING_SERVICE, SCHEDULER_SERVICE};
use crate::domain::{CorrelationId, Message, MessageType, RequestInfo};
use crate::error::{LinkError, RemoteError};
use crate::service::link::LinkInner;

/// Payload fields inspected, in order, for the exception kind of an
/// `Error` frame whose `Data` is not a bare string.
const KIND_FIELDS: [&str; 4] = ["Type", "Name", "ExceptionType", "Exception"];

/// Security-related exception kinds recognized by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityKind {
    /// The channel token expired; renewable by reconnecting.
    TokenExpired,
    /// The session expired.
    SessionExpired,
    /// The session was revoked server side.
    SessionRevoked,
    /// The session is unknown to the gateway.
    InvalidSession,
    /// The token is malformed or unknown.
    InvalidToken,
    /// The caller lacks permission for this request.
    Unauthorized,
    /// The caller is denied access to this resource.
    AccessDenied,
}

impl SecurityKind {
    /// Every recognized kind.
    pub const ALL: [Self; 7] = [
        Self::TokenExpired,
        Self::SessionExpired,
        Self::SessionRevoked,
        Self::InvalidSession,
        Self::InvalidToken,
        Self::Unauthorized,
        Self::AccessDenied,
    ];

    /// Exception name as sent by the gateway.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TokenExpired => "TokenExpiredException",
            Self::SessionExpired => "SessionExpiredException",
            Self::SessionRevoked => "SessionRevokedException",
            Self::InvalidSession => "InvalidSessionException",
            Self::InvalidToken => "InvalidTokenException",
            Self::Unauthorized => "UnauthorizedException",
            Self::AccessDenied => "AccessDeniedException",
        }
    }

    /// Looks up a kind by exception name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Request-level rejections that are still handed to the caller.
    #[must_use]
    pub const fn is_request_scoped(self) -> bool {
        matches!(self, Self::Unauthorized | Self::AccessDenied)
    }
}

/// What the router does with an `Error` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Reconnect to renew the token; the request stays outstanding.
    Renew,
    /// Broadcast a session revocation; the caller is not told.
    Revoke(SecurityKind),
    /// Hand the error to the caller. Carries the extracted kind, empty when
    /// none was found.
    Deliver(String),
}

/// Extracts the exception kind of an error payload.
#[must_use]
pub fn error_kind(data: &Value) -> String {
    if let Value::String(kind) = data {
        return kind.clone();
    }
    KIND_FIELDS
        .iter()
        .find_map(|field| data.get(field).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

/// Classifies an error payload.
#[must_use]
pub fn classify(data: &Value) -> ErrorClass {
    let kind = error_kind(data);
    match SecurityKind::from_name(&kind) {
        Some(SecurityKind::TokenExpired) => ErrorClass::Renew,
        Some(security) if !security.is_request_scoped() => ErrorClass::Revoke(security),
        _ => ErrorClass::Deliver(kind),
    }
}

impl LinkInner {
    /// Entry point for every inbound text frame.
    pub(crate) fn handle_frame(self: &Arc<Self>, raw: &str) {
        let observer = self.raw_observer.read().clone();
        if let Some(observer) = observer {
            observer(raw);
        }

        let envelope = match decode_envelope(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(error = %err, len = raw.len(), "undecodable frame from gateway");
                self.schedule_replay_one();
                return;
            }
        };

        let id = envelope.correlation_id();
        if envelope.is_error() {
            self.route_error(id, envelope.data);
            return;
        }

        if let Some(id) = id {
            let mut state = self.state.lock();
            if state.ledger.is_outstanding(id) {
                state.ledger.resolve(id, Ok(envelope.data));
                return;
            }
        }

        let message = Message::with_type(envelope.message_type(), envelope.data);
        self.route_message(message);
    }

    fn route_error(self: &Arc<Self>, id: Option<CorrelationId>, data: Value) {
        match classify(&data) {
            ErrorClass::Renew => {
                tracing::info!(?id, "channel token expired; renewing");
                self.reopen("token expired", None);
            }
            ErrorClass::Revoke(kind) => {
                if let Some(id) = id {
                    // Dropping the slot resolves the caller as abandoned.
                    let _ = self.state.lock().ledger.take(id);
                }
                tracing::warn!(kind = kind.name(), "session rejected by gateway");
                let revoke = Message::with_type(MessageType::session_revoke(), data);
                self.dispatcher.broadcast(&revoke);
            }
            ErrorClass::Deliver(kind) => {
                let mut state = self.state.lock();
                match id {
                    Some(id) if state.ledger.is_outstanding(id) => {
                        state
                            .ledger
                            .resolve(id, Err(LinkError::Remote(RemoteError { kind, data })));
                    }
                    _ => {
                        drop(state);
                        tracing::warn!(kind = %kind, ?id, %data, "unhandled error frame");
                    }
                }
            }
        }
    }

    fn route_message(self: &Arc<Self>, message: Message) {
        match message.service() {
            PING_SERVICE => {
                self.heartbeat.touch();
                let pong = RequestInfo::new(SESSION_SERVICE, "").with_verb(PONG_VERB);
                let _ = self.send_duplex(&pong, false, false);
            }
            SCHEDULER_SERVICE => {
                tracing::debug!(event = message.event(), "scheduler pulse");
                self.dispatcher.broadcast(&message);
            }
            KNOCK_SERVICE => {
                tracing::info!(event = message.event(), "liveness probe acknowledged");
            }
            _ => {
                let delivered = self.dispatcher.broadcast(&message);
                tracing::trace!(message_type = %message.message_type, delivered, "broadcast");
            }
        }
    }
}
