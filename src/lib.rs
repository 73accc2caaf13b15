//! # gateway-link
//!
//! Client-side realtime link to a service gateway.
//!
//! A [`Link`] keeps one persistent duplex channel (WebSocket) open to the
//! gateway, correlates requests with their replies, fans server-pushed
//! messages out to registered handlers and falls back to plain HTTP
//! whenever the channel is not ready or has gone quiet.
//!
//! ## Architecture
//!
//! ```text
//! Application code
//!     │
//!     ├── Link facade (service/)
//!     │     ├── transport selection ──▶ HttpFallback (api/)
//!     │     └── lifecycle state machine
//!     │
//!     ├── Ledger, Heartbeat, LinkEvents (domain/)
//!     │
//!     ├── connection loop ──▶ Connector (ws/)
//!     └── router ──▶ Dispatcher (ws/)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use gateway_link::{Collaborators, HttpFallback, Link, LinkConfig, RequestInfo, TungsteniteConnector};
//!
//! # async fn demo() -> Result<(), gateway_link::LinkError> {
//! let config = LinkConfig::from_env()?;
//! let fallback = HttpFallback::new(config.fallback_timeout)?;
//! let link = Link::new(
//!     config,
//!     Collaborators::new(Arc::new(TungsteniteConnector), Arc::new(fallback)),
//! );
//! link.connect(Duration::from_secs(5)).await?;
//! let profile = link.request(RequestInfo::from_path("/Users/Profile/42"), false).await?;
//! println!("{profile}");
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod service;
pub mod ws;

pub use api::{FallbackTransport, HttpFallback};
pub use config::LinkConfig;
pub use context::{Collaborators, CredentialCipher, Credentials, Passthrough};
pub use domain::{ConnectionStatus, CorrelationId, LinkEvent, Message, MessageType, RequestInfo};
pub use error::{LinkError, RemoteError};
pub use service::{Link, Reply, Route, SendOptions, Transport};
pub use ws::{Connector, ErrorReporter, TungsteniteConnector};
