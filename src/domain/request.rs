//! Outgoing request description and header normalization.

use std::collections::BTreeMap;

use reqwest::Url;
use serde_json::{Map, Value};

use crate::error::LinkError;

/// Verb used when a request does not name one.
pub const DEFAULT_VERB: &str = "GET";

/// Authentication headers the duplex channel carries out-of-band.
///
/// These are stripped from requests sent over the channel because the
/// handshake already authenticated the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthHeader {
    /// `Authorization`
    Authorization,
    /// `X-Session-Id`
    SessionId,
    /// `X-Device-Id`
    DeviceId,
    /// `X-Signature`
    Signature,
    /// `X-Timestamp`
    Timestamp,
}

impl AuthHeader {
    /// Every recognized authentication header.
    pub const ALL: [Self; 5] = [
        Self::Authorization,
        Self::SessionId,
        Self::DeviceId,
        Self::Signature,
        Self::Timestamp,
    ];

    /// Canonical header name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Authorization => "Authorization",
            Self::SessionId => "X-Session-Id",
            Self::DeviceId => "X-Device-Id",
            Self::Signature => "X-Signature",
            Self::Timestamp => "X-Timestamp",
        }
    }

    /// Recognizes a header name, ignoring ASCII case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|h| h.name().eq_ignore_ascii_case(name))
    }
}

/// A request as issued by application code.
///
/// `service`, `object` and `identity` may be left empty and derived from
/// `path` (`/<service>/<object>/<identity>`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestInfo {
    /// Target service name.
    pub service: String,
    /// Target object name.
    pub object: String,
    /// Identity of the addressed object, if any.
    pub identity: Option<String>,
    /// Verb; [`DEFAULT_VERB`] when absent.
    pub verb: Option<String>,
    /// Optional REST-style path to derive addressing fields from.
    pub path: Option<String>,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Query parameters.
    pub query: BTreeMap<String, String>,
    /// Free-form extra fields passed through to the gateway.
    pub extra: Map<String, Value>,
    /// Request body; `Null` for none.
    pub body: Value,
}

impl RequestInfo {
    /// Creates a request addressed to `service` / `object`.
    #[must_use]
    pub fn new(service: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            object: object.into(),
            ..Self::default()
        }
    }

    /// Creates a request addressed by a REST-style path.
    #[must_use]
    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Sets the verb.
    #[must_use]
    pub fn with_verb(mut self, verb: impl Into<String>) -> Self {
        self.verb = Some(verb.into());
        self
    }

    /// Sets the identity of the addressed object.
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Adds an extra field.
    #[must_use]
    pub fn with_extra(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Effective verb.
    #[must_use]
    pub fn verb(&self) -> &str {
        self.verb.as_deref().unwrap_or(DEFAULT_VERB)
    }

    /// Fills empty addressing fields from `path`. Explicit fields win.
    #[must_use]
    pub fn with_path_merged(&self) -> Self {
        let mut out = self.clone();
        if let Some(path) = &self.path {
            let mut segments = path.split('/').filter(|s| !s.is_empty());
            if let Some(service) = segments.next()
                && out.service.is_empty()
            {
                out.service = service.to_string();
            }
            if let Some(object) = segments.next()
                && out.object.is_empty()
            {
                out.object = object.to_string();
            }
            if let Some(identity) = segments.next()
                && out.identity.is_none()
            {
                out.identity = Some(identity.to_string());
            }
        }
        out
    }

    /// Form sent over the duplex channel: path merged and authentication
    /// headers stripped.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut out = self.with_path_merged();
        out.headers
            .retain(|name, _| AuthHeader::from_name(name).is_none());
        out
    }

    /// Equivalent fallback URL: `<base>/<service>[/<object>][/<identity>]?<query>&<extra>`.
    ///
    /// Extra fields follow the query parameters; string values are sent
    /// as-is, anything else as JSON. An extra field never overrides a query
    /// parameter of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidUrl`] if `base` cannot carry a path or
    /// the request has no service.
    pub fn fallback_url(&self, base: &Url) -> Result<Url, LinkError> {
        let merged = self.with_path_merged();
        if merged.service.is_empty() {
            return Err(LinkError::InvalidUrl(
                "request names no service".to_string(),
            ));
        }
        let mut url = base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| LinkError::InvalidUrl(format!("{base} cannot be a base")))?;
            segments.pop_if_empty().push(&merged.service);
            if !merged.object.is_empty() {
                segments.push(&merged.object);
            }
            if let Some(identity) = &merged.identity {
                segments.push(identity);
            }
        }
        let extra = merged
            .extra
            .iter()
            .filter(|(name, _)| !merged.query.contains_key(*name))
            .map(|(name, value)| match value {
                Value::String(text) => (name.as_str(), text.clone()),
                other => (name.as_str(), other.to_string()),
            })
            .collect::<Vec<_>>();
        if !merged.query.is_empty() || !extra.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(merged.query.iter())
                .extend_pairs(extra);
        }
        Ok(url)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn base() -> Url {
        let Ok(url) = Url::parse("https://gateway.example.com/api/") else {
            panic!("valid base url");
        };
        url
    }

    #[test]
    fn verb_defaults_to_get() {
        assert_eq!(RequestInfo::new("Users", "Profile").verb(), "GET");
        assert_eq!(
            RequestInfo::new("Users", "Profile").with_verb("PUT").verb(),
            "PUT"
        );
    }

    #[test]
    fn auth_headers_match_case_insensitively() {
        assert_eq!(
            AuthHeader::from_name("authorization"),
            Some(AuthHeader::Authorization)
        );
        assert_eq!(
            AuthHeader::from_name("x-session-id"),
            Some(AuthHeader::SessionId)
        );
        assert_eq!(AuthHeader::from_name("X-Trace-Id"), None);
    }

    #[test]
    fn normalized_strips_only_auth_headers() {
        let req = RequestInfo::new("Users", "Profile")
            .with_header("Authorization", "Bearer t")
            .with_header("x-device-id", "d")
            .with_header("X-Trace-Id", "abc");
        let norm = req.normalized();
        assert_eq!(norm.headers.len(), 1);
        assert_eq!(norm.headers.get("X-Trace-Id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn path_fills_missing_fields() {
        let req = RequestInfo::from_path("/Users/Profile/42");
        let merged = req.with_path_merged();
        assert_eq!(merged.service, "Users");
        assert_eq!(merged.object, "Profile");
        assert_eq!(merged.identity.as_deref(), Some("42"));
    }

    #[test]
    fn explicit_fields_win_over_path() {
        let mut req = RequestInfo::new("Orders", "").with_identity("7");
        req.path = Some("/Users/Profile/42".into());
        let merged = req.with_path_merged();
        assert_eq!(merged.service, "Orders");
        assert_eq!(merged.object, "Profile");
        assert_eq!(merged.identity.as_deref(), Some("7"));
    }

    #[test]
    fn fallback_url_appends_path_and_query() {
        let req = RequestInfo::new("Users", "Profile")
            .with_identity("42")
            .with_query("expand", "roles");
        let Ok(url) = req.fallback_url(&base()) else {
            panic!("url should build");
        };
        assert_eq!(
            url.as_str(),
            "https://gateway.example.com/api/Users/Profile/42?expand=roles"
        );
    }

    #[test]
    fn fallback_url_keeps_identity_without_object() {
        let req = RequestInfo::new("Users", "").with_identity("42");
        let Ok(url) = req.fallback_url(&base()) else {
            panic!("url should build");
        };
        assert_eq!(url.as_str(), "https://gateway.example.com/api/Users/42");
    }

    #[test]
    fn fallback_url_carries_extra_fields() {
        let req = RequestInfo::new("Users", "")
            .with_identity("42")
            .with_query("expand", "roles")
            .with_extra("Tenant", Value::from("acme"))
            .with_extra("Limit", Value::from(5))
            .with_extra("expand", Value::from("ignored"));
        let Ok(url) = req.fallback_url(&base()) else {
            panic!("url should build");
        };
        assert_eq!(
            url.as_str(),
            "https://gateway.example.com/api/Users/42?expand=roles&Limit=5&Tenant=acme"
        );
    }

    #[test]
    fn fallback_url_requires_service() {
        assert!(RequestInfo::default().fallback_url(&base()).is_err());
    }
}
