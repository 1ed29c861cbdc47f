//! Configuration for the dashboard binary.
//!
//! Everything is read from environment variables once at startup. The sync
//! settings are delegated to [`SyncConfig::from_lookup`].

use std::time::Duration;

use cityflow_sync::SyncConfig;
use cityflow_timeline::DEFAULT_TICK;

use crate::error::DashboardError;

/// Complete dashboard configuration.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// REST and push endpoints plus sync timings.
    pub sync: SyncConfig,
    /// Auto-advance interval for replay playback.
    pub playback_tick: Duration,
}

impl DashboardConfig {
    /// Load configuration from the process environment.
    ///
    /// Variables:
    /// - `CITYFLOW_API_URL`, `CITYFLOW_WS_URL`, `FALLBACK_POLL_INTERVAL_MS`,
    ///   `RECONNECT_DELAY_MS`, `HTTP_TIMEOUT_MS` -- see [`SyncConfig::from_env`]
    /// - `PLAYBACK_TICK_MS` -- replay auto-advance interval (default: 200)
    pub fn from_env() -> Result<Self, DashboardError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DashboardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sync = SyncConfig::from_lookup(&lookup)?;

        let playback_tick = match lookup("PLAYBACK_TICK_MS") {
            None => DEFAULT_TICK,
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| DashboardError::Config(format!("invalid PLAYBACK_TICK_MS: {e}")))?,
        };
        if playback_tick.is_zero() {
            return Err(DashboardError::Config(
                "PLAYBACK_TICK_MS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            sync,
            playback_tick,
        })
    }
}
