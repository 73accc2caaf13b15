//! Service layer: the [`Link`] facade.
//!
//! [`Link`] owns one gateway connection: it chooses a transport per
//! request, drives the duplex channel lifecycle and feeds inbound frames
//! to the router.

pub(crate) mod lifecycle;
pub mod link;
pub mod reply;

pub use link::Link;
pub use reply::{Reply, Route, SendOptions, Transport};
