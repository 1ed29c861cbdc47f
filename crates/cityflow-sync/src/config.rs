//! Configuration for live telemetry synchronization.
//!
//! Configuration is read once at session start, from environment
//! variables in production and from explicit values in tests:
//!
//! - `CITYFLOW_API_URL` -- REST base URL (default `http://localhost:8000`)
//! - `CITYFLOW_WS_URL` -- push endpoint override (default derived from the
//!   API URL, see [`SyncConfig::push_endpoint`])
//! - `FALLBACK_POLL_INTERVAL_MS` -- fallback poll interval (default 500)
//! - `RECONNECT_DELAY_MS` -- push reconnect backoff (default 3000)
//! - `HTTP_TIMEOUT_MS` -- per-request timeout (default 10000)

use std::time::Duration;

use reqwest::Url;

use crate::error::SyncError;

/// REST base URL used when `CITYFLOW_API_URL` is unset.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Delay between fallback polls.
pub const DEFAULT_FALLBACK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Delay before the push transport is reopened after a failure.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Timeout applied to every REST request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Path of the state stream relative to the API base path.
const STATE_STREAM_PATH: &str = "ws/state";

/// Complete synchronization configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// REST base URL (`http` or `https`).
    pub api_url: Url,
    /// Explicit push endpoint; derived from `api_url` when `None`.
    pub ws_url: Option<Url>,
    /// Delay between fallback polls.
    pub fallback_poll_interval: Duration,
    /// Delay before the push transport is reopened after a failure.
    pub reconnect_delay: Duration,
    /// Timeout applied to every REST request.
    pub http_timeout: Duration,
}

impl SyncConfig {
    /// Create a configuration for the given API base URL with default
    /// timings.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidUrl`] if the URL does not parse.
    pub fn new(api_url: &str) -> Result<Self, SyncError> {
        Ok(Self {
            api_url: parse_url("api", api_url)?,
            ws_url: None,
            fallback_poll_interval: DEFAULT_FALLBACK_POLL_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        })
    }

    /// Override the push endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidUrl`] if the URL does not parse.
    pub fn with_ws_url(mut self, ws_url: &str) -> Result<Self, SyncError> {
        self.ws_url = Some(parse_url("ws", ws_url)?);
        Ok(self)
    }

    /// Set the fallback poll interval.
    #[must_use]
    pub fn with_fallback_poll_interval(mut self, interval: Duration) -> Self {
        self.fallback_poll_interval = interval;
        self
    }

    /// Set the push reconnect backoff.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] or [`SyncError::InvalidUrl`] if a
    /// variable is present but invalid.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// [`from_env`](Self::from_env) passes `std::env::var`; tests pass a
    /// map.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] or [`SyncError::InvalidUrl`] if a
    /// variable is present but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("CITYFLOW_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_owned());
        let mut config = Self::new(&api_url)?;

        if let Some(ws_url) = lookup("CITYFLOW_WS_URL").filter(|v| !v.trim().is_empty()) {
            config = config.with_ws_url(&ws_url)?;
        }

        config.fallback_poll_interval = millis_var(
            &lookup,
            "FALLBACK_POLL_INTERVAL_MS",
            DEFAULT_FALLBACK_POLL_INTERVAL,
        )?;
        config.reconnect_delay = millis_var(&lookup, "RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY)?;
        config.http_timeout = millis_var(&lookup, "HTTP_TIMEOUT_MS", DEFAULT_HTTP_TIMEOUT)?;

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values no session can run with.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for zero intervals and
    /// [`SyncError::InvalidUrl`] for unsupported URL schemes.
    pub fn validate(&self) -> Result<(), SyncError> {
        if !matches!(self.api_url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "API URL must use http or https, got {}",
                self.api_url
            )));
        }
        if let Some(ws_url) = &self.ws_url {
            if !matches!(ws_url.scheme(), "ws" | "wss") {
                return Err(SyncError::InvalidUrl(format!(
                    "push endpoint must use ws or wss, got {ws_url}"
                )));
            }
        }
        for (name, value) in [
            ("fallback_poll_interval", self.fallback_poll_interval),
            ("reconnect_delay", self.reconnect_delay),
            ("http_timeout", self.http_timeout),
        ] {
            if value.is_zero() {
                return Err(SyncError::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    /// Resolve the push endpoint.
    ///
    /// The explicit override wins. Otherwise the endpoint is derived from
    /// the API URL: `https` becomes `wss`, anything else `ws`, the host and
    /// port are kept, and `/ws/state` is appended to the base path.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidUrl`] if the API URL cannot carry a
    /// `WebSocket` scheme.
    pub fn push_endpoint(&self) -> Result<Url, SyncError> {
        if let Some(ws_url) = &self.ws_url {
            return Ok(ws_url.clone());
        }

        let scheme = if self.api_url.scheme() == "https" { "wss" } else { "ws" };
        let mut endpoint = self.api_url.clone();
        endpoint.set_scheme(scheme).ok().ok_or_else(|| {
            SyncError::InvalidUrl(format!("cannot derive {scheme} endpoint from {}", self.api_url))
        })?;
        let base_path = self.api_url.path().trim_end_matches('/');
        endpoint.set_path(&format!("{base_path}/{STATE_STREAM_PATH}"));
        endpoint.set_query(None);
        endpoint.set_fragment(None);
        Ok(endpoint)
    }
}

/// Parse a URL, labelling the error with which setting it came from.
fn parse_url(label: &str, value: &str) -> Result<Url, SyncError> {
    Url::parse(value.trim()).map_err(|e| SyncError::InvalidUrl(format!("{label} URL {value:?}: {e}")))
}

/// Read an optional millisecond duration variable.
fn millis_var<F>(lookup: &F, name: &str, default: Duration) -> Result<Duration, SyncError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| SyncError::Config(format!("invalid {name}: {e}"))),
    }
}
