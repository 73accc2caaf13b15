//! Normalized inbound message handed to subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::MessageType;

/// An unsolicited or event payload delivered to registered handlers.
#[derive(Debug, Clone)]
pub struct Message {
    /// Parsed message type.
    pub message_type: Arc<MessageType>,
    /// Opaque payload as sent by the gateway.
    pub data: Value,
    /// When the message was received or synthesized.
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Builds a message from a raw compound type string.
    #[must_use]
    pub fn new(raw_type: &str, data: Value) -> Self {
        Self::with_type(MessageType::parse(raw_type), data)
    }

    /// Builds a message from an already parsed type.
    #[must_use]
    pub fn with_type(message_type: Arc<MessageType>, data: Value) -> Self {
        Self {
            message_type,
            data,
            received_at: Utc::now(),
        }
    }

    /// Service part of the type.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.message_type.service
    }

    /// Object part of the type, empty when absent.
    #[must_use]
    pub fn object(&self) -> &str {
        &self.message_type.object
    }

    /// Event part of the type, empty when absent.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.message_type.event
    }
}
