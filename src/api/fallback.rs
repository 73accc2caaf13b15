//! Conventional request/response transport used when the duplex channel
//! is not eligible.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde_json::Value;

use crate::error::LinkError;

/// Request/response transport owned by the host application.
///
/// Which authentication headers it injects is the implementation's
/// business; the link only hands over the request.
#[async_trait]
pub trait FallbackTransport: Send + Sync + std::fmt::Debug {
    /// Performs one request and returns the decoded response body.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Fallback`] when the call fails or the response
    /// is not a success.
    async fn call(
        &self,
        verb: &str,
        url: Url,
        headers: &BTreeMap<String, String>,
        body: Option<&Value>,
    ) -> Result<Value, LinkError>;
}

/// [`FallbackTransport`] over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFallback {
    client: reqwest::Client,
}

impl HttpFallback {
    /// Creates a transport whose calls time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Fallback`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, LinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FallbackTransport for HttpFallback {
    async fn call(
        &self,
        verb: &str,
        url: Url,
        headers: &BTreeMap<String, String>,
        body: Option<&Value>,
    ) -> Result<Value, LinkError> {
        let method = Method::from_bytes(verb.as_bytes()).map_err(|e| LinkError::Fallback {
            status: None,
            message: format!("invalid verb {verb}: {e}"),
        })?;

        let mut request = self.client.request(method, url).headers(header_map(headers)?);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(LinkError::Fallback {
                status: Some(status.as_u16()),
                message: if text.is_empty() {
                    status.to_string()
                } else {
                    text
                },
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, LinkError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| LinkError::Fallback {
            status: None,
            message: format!("invalid header name {name}: {e}"),
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| LinkError::Fallback {
            status: None,
            message: format!("invalid value for header {name}: {e}"),
        })?;
        map.insert(name, value);
    }
    Ok(map)
}
