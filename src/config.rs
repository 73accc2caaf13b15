//! Link configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Every key falls back to a default,
//! except `LINK_BASE_URL` which must parse when set.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Url;

use crate::context::Credentials;
use crate::domain::heartbeat::DEFAULT_MAX_AGE;
use crate::error::LinkError;

/// Handshake query parameter carrying the session id.
pub const SESSION_PARAM: &str = "x-session-id";
/// Handshake query parameter carrying the device id.
pub const DEVICE_PARAM: &str = "x-device-id";
/// Handshake query parameter marking a reconnect.
pub const RESTART_PARAM: &str = "x-restart";

/// Top-level link configuration.
///
/// Loaded via [`LinkConfig::from_env`] or built with [`LinkConfig::new`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// HTTP(S) base URL of the gateway; also the fallback transport base.
    pub base_url: Url,

    /// Path of the duplex endpoint relative to `base_url`.
    pub channel_path: String,

    /// Initial session and device identifiers.
    pub credentials: Credentials,

    /// Heartbeat age after which the channel is considered stale.
    pub heartbeat_max_age: Duration,

    /// Fixed part of the reconnect delay.
    pub reconnect_base: Duration,

    /// Per-attempt increment of the reconnect delay.
    pub reconnect_step: Duration,

    /// Time a reopened channel must stay up before the attempt counter resets.
    pub reconnect_grace: Duration,

    /// Poll interval of the replay task started after an undecodable frame.
    pub replay_retry_interval: Duration,

    /// Whether the duplex transport may be used at all.
    pub duplex_enabled: bool,

    /// Whether the first routed request opens the channel lazily.
    pub auto_connect: bool,

    /// Capacity of the lifecycle event bus.
    pub event_capacity: usize,

    /// Timeout of fallback HTTP calls.
    pub fallback_timeout: Duration,
}

impl LinkConfig {
    /// Creates a configuration with default tuning for `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            channel_path: "ws".to_string(),
            credentials: Credentials::default(),
            heartbeat_max_age: DEFAULT_MAX_AGE,
            reconnect_base: Duration::from_millis(123),
            reconnect_step: Duration::from_millis(13),
            reconnect_grace: Duration::from_millis(1_000),
            replay_retry_interval: Duration::from_millis(500),
            duplex_enabled: true,
            auto_connect: true,
            event_capacity: 256,
            fallback_timeout: Duration::from_secs(30),
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Config`] if `LINK_BASE_URL` is set but is not a
    /// valid URL.
    pub fn from_env() -> Result<Self, LinkError> {
        dotenvy::dotenv().ok();

        let raw_base = std::env::var("LINK_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:3000/".to_string());
        let base_url = Url::parse(&raw_base)
            .map_err(|e| LinkError::Config(format!("LINK_BASE_URL: {e}")))?;

        let defaults = Self::new(base_url);

        Ok(Self {
            channel_path: std::env::var("LINK_CHANNEL_PATH").unwrap_or(defaults.channel_path.clone()),
            credentials: Credentials::new(
                std::env::var("LINK_SESSION_ID").unwrap_or_default(),
                std::env::var("LINK_DEVICE_ID").unwrap_or_default(),
            ),
            heartbeat_max_age: parse_millis("LINK_HEARTBEAT_MAX_AGE_MS", defaults.heartbeat_max_age),
            reconnect_base: parse_millis("LINK_RECONNECT_BASE_MS", defaults.reconnect_base),
            reconnect_step: parse_millis("LINK_RECONNECT_STEP_MS", defaults.reconnect_step),
            reconnect_grace: parse_millis("LINK_RECONNECT_GRACE_MS", defaults.reconnect_grace),
            replay_retry_interval: parse_millis(
                "LINK_REPLAY_RETRY_MS",
                defaults.replay_retry_interval,
            ),
            duplex_enabled: parse_env_bool("LINK_DUPLEX_ENABLED", defaults.duplex_enabled),
            auto_connect: parse_env_bool("LINK_AUTO_CONNECT", defaults.auto_connect),
            event_capacity: parse_env("LINK_EVENT_CAPACITY", defaults.event_capacity),
            fallback_timeout: Duration::from_secs(parse_env(
                "LINK_FALLBACK_TIMEOUT_SECS",
                defaults.fallback_timeout.as_secs(),
            )),
            ..defaults
        })
    }

    /// Delay before reconnect attempt `attempt`: `base + attempt * step`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.reconnect_base
            .saturating_add(self.reconnect_step.saturating_mul(attempt))
    }

    /// Builds the duplex handshake URL.
    ///
    /// The scheme is upgraded (`http` → `ws`, `https` → `wss`), the
    /// channel path appended, and session and device ids attached as
    /// base64url query parameters. Reconnects add a restart marker.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidUrl`] if the base URL has a scheme with
    /// no duplex equivalent or cannot carry a path.
    pub fn channel_url(&self, credentials: &Credentials, restart: bool) -> Result<Url, LinkError> {
        let mut url = self.base_url.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(LinkError::InvalidUrl(format!(
                    "scheme {other} has no duplex equivalent"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| LinkError::InvalidUrl(format!("cannot switch scheme to {scheme}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| LinkError::InvalidUrl("base url cannot carry a path".to_string()))?;
            segments
                .pop_if_empty()
                .extend(self.channel_path.split('/').filter(|s| !s.is_empty()));
        }
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(SESSION_PARAM, &URL_SAFE_NO_PAD.encode(&credentials.session_id));
            query.append_pair(DEVICE_PARAM, &URL_SAFE_NO_PAD.encode(&credentials.device_id));
            if restart {
                query.append_pair(RESTART_PARAM, "1");
            }
        }
        Ok(url)
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value == "1" || value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value == "0" || value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
