//! Request/response side of the link.
//!
//! When the duplex channel is not eligible, requests are replayed through a
//! [`FallbackTransport`]; [`HttpFallback`] is the stock `reqwest` one.

pub mod fallback;

pub use fallback::{FallbackTransport, HttpFallback};
