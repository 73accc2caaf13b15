//! Domain layer: identifiers, message types, the pending-request ledger,
//! liveness tracking and lifecycle events.
//!
//! Nothing in this module performs I/O. The connection lifecycle and the
//! wire codec build on these types.

pub mod correlation_id;
pub mod heartbeat;
pub mod ledger;
pub mod link_event;
pub mod message;
pub mod message_type;
pub mod request;
pub mod status;

pub use correlation_id::CorrelationId;
pub use heartbeat::Heartbeat;
pub use ledger::{Ledger, Responder};
pub use link_event::{LinkEvent, LinkEvents};
pub use message::Message;
pub use message_type::MessageType;
pub use request::{AuthHeader, RequestInfo};
pub use status::ConnectionStatus;
