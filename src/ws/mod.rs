//! Duplex channel layer: frame codec, connector, connection loop, inbound
//! routing and the handler dispatcher.
//!
//! The channel speaks JSON text frames of the form
//! `{ "ID"?, "Type", "Data" }` over a WebSocket opened at
//! `<base>/ws?x-session-id=..&x-device-id=..`.

pub mod connection;
pub mod connector;
pub mod messages;
pub mod router;
pub mod subscription;

pub use connector::{Connector, Frame, TungsteniteConnector};
pub use router::{ErrorClass, SecurityKind};
pub use subscription::{Dispatcher, ErrorReporter, HandlerFailure, Scope, TracingReporter};
