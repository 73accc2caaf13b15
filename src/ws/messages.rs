//! Wire envelopes and their JSON codec.
//!
//! Both directions share one envelope shape, `{ "ID"?, "Type", "Data" }`.
//! Outgoing requests carry a [`RequestEnvelope`] as their `Data`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::message_type::ERROR_TYPE;
use crate::domain::request::DEFAULT_VERB;
use crate::domain::{CorrelationId, MessageType, RequestInfo};
use crate::error::LinkError;

/// Extra field carrying the addressed object's identity.
pub const IDENTITY_FIELD: &str = "ObjectId";

/// Service addressed by the handshake and heartbeat replies.
pub const SESSION_SERVICE: &str = "Session";
/// Verb of the authentication handshake.
pub const AUTH_VERB: &str = "AUTH";
/// Verb answering a server ping.
pub const PONG_VERB: &str = "PONG";

/// Top-level frame envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id; absent on unsolicited frames.
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `"Error"` or a compound `service[#object[#event]]` string.
    #[serde(rename = "Type")]
    pub msg_type: String,
    /// Opaque payload.
    #[serde(rename = "Data", default)]
    pub data: Value,
}

impl Envelope {
    /// Returns `true` for `Error`-typed frames.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.msg_type == ERROR_TYPE
    }

    /// Parsed (memoized) message type.
    #[must_use]
    pub fn message_type(&self) -> Arc<MessageType> {
        MessageType::parse(&self.msg_type)
    }

    /// Correlation id, when present and well formed.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.id.as_deref().and_then(|id| id.parse().ok())
    }
}

/// Request payload understood by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestEnvelope {
    /// Correlation id (`cmd-<n>`).
    #[serde(rename = "ID")]
    pub id: String,
    /// Target service.
    pub service_name: String,
    /// Target object.
    pub object_name: String,
    /// Verb, `"GET"` when absent on decode.
    #[serde(default = "default_verb")]
    pub verb: String,
    /// Headers that survived normalization.
    #[serde(default)]
    pub header: BTreeMap<String, String>,
    /// Query parameters.
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Free-form extra fields.
    #[serde(default)]
    pub extra: Map<String, Value>,
    /// Request body.
    #[serde(default)]
    pub body: Value,
}

fn default_verb() -> String {
    DEFAULT_VERB.to_string()
}

impl RequestEnvelope {
    /// Builds the envelope for a normalized request.
    #[must_use]
    pub fn from_request(request: &RequestInfo, id: CorrelationId) -> Self {
        let mut extra = request.extra.clone();
        if let Some(identity) = &request.identity {
            extra
                .entry(IDENTITY_FIELD)
                .or_insert_with(|| Value::String(identity.clone()));
        }
        Self {
            id: id.to_string(),
            service_name: request.service.clone(),
            object_name: request.object.clone(),
            verb: request.verb().to_string(),
            header: request.headers.clone(),
            query: request.query.clone(),
            extra,
            body: request.body.clone(),
        }
    }

    /// Wraps the request in a frame envelope typed `service#object`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Codec`] if the request cannot be serialized.
    pub fn into_envelope(self) -> Result<Envelope, LinkError> {
        let msg_type = MessageType::new(&self.service_name, &self.object_name, "").to_string();
        let id = Some(self.id.clone());
        Ok(Envelope {
            id,
            msg_type,
            data: serde_json::to_value(self)?,
        })
    }
}

/// Serializes a frame envelope.
///
/// # Errors
///
/// Returns [`LinkError::Codec`] if serialization fails.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, LinkError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parses a frame envelope. Failure is recoverable; the caller decides how
/// to react.
///
/// # Errors
///
/// Returns [`LinkError::Codec`] if `raw` is not a valid envelope.
pub fn decode_envelope(raw: &str) -> Result<Envelope, LinkError> {
    Ok(serde_json::from_str(raw)?)
}

/// Serializes a request into the frame sent over the channel.
///
/// # Errors
///
/// Returns [`LinkError::Codec`] if serialization fails.
pub fn encode_request(request: &RequestInfo, id: CorrelationId) -> Result<String, LinkError> {
    encode_envelope(&RequestEnvelope::from_request(request, id).into_envelope()?)
}
