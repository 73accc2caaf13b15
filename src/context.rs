//! External collaborators injected into a link.
//!
//! The link never owns cryptography, HTTP policy or error reporting; it
//! consumes them through the traits bundled in [`Collaborators`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::api::FallbackTransport;
use crate::error::LinkError;
use crate::ws::connector::Connector;
use crate::ws::subscription::{ErrorReporter, TracingReporter};

/// Session identity presented in the channel handshake.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Session identifier issued by the gateway.
    pub session_id: String,
    /// Identifier of this device.
    pub device_id: String,
    /// Additional authenticated headers carried by the handshake.
    pub auth_headers: BTreeMap<String, String>,
}

impl Credentials {
    /// Creates credentials without extra headers.
    #[must_use]
    pub fn new(session_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            device_id: device_id.into(),
            auth_headers: BTreeMap::new(),
        }
    }

    /// Adds an authenticated header to the handshake.
    #[must_use]
    pub fn with_auth_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_headers.insert(name.into(), value.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("session_id", &"<redacted>")
            .field("device_id", &self.device_id)
            .field("auth_headers", &self.auth_headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Opaque sealing of identifiers embedded in the handshake.
pub trait CredentialCipher: Send + Sync + fmt::Debug {
    /// Seals `plain` for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Cipher`] if the value cannot be sealed.
    fn seal(&self, plain: &str) -> Result<String, LinkError>;
}

/// Cipher that sends identifiers unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl CredentialCipher for Passthrough {
    fn seal(&self, plain: &str) -> Result<String, LinkError> {
        Ok(plain.to_string())
    }
}

/// Collaborators shared by every operation of one link.
#[derive(Debug, Clone)]
pub struct Collaborators {
    /// Opens duplex channels.
    pub connector: Arc<dyn Connector>,
    /// Request/response transport used when the channel is not eligible.
    pub fallback: Arc<dyn FallbackTransport>,
    /// Seals handshake identifiers.
    pub cipher: Arc<dyn CredentialCipher>,
    /// Receives isolated handler failures.
    pub reporter: Arc<dyn ErrorReporter>,
}

impl Collaborators {
    /// Bundles a connector and a fallback with the default cipher and
    /// reporter.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, fallback: Arc<dyn FallbackTransport>) -> Self {
        Self {
            connector,
            fallback,
            cipher: Arc::new(Passthrough),
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Replaces the credential cipher.
    #[must_use]
    pub fn with_cipher(mut self, cipher: Arc<dyn CredentialCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    /// Replaces the handler failure reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_session() {
        let creds = Credentials::new("secret-session", "dev-1").with_auth_header("X-Tenant", "t");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret-session"));
        assert!(debug.contains("dev-1"));
        assert!(debug.contains("X-Tenant"));
    }

    #[test]
    fn passthrough_keeps_value() {
        assert_eq!(Passthrough.seal("abc").ok().as_deref(), Some("abc"));
    }
}
