//! HTTP client for the CityFlow REST API.
//!
//! Covers the read-only endpoints the dashboard core consumes:
//!
//! - `GET /state` -- latest snapshot, polled while the push transport is
//!   down (this makes [`ApiClient`] the production [`PullSource`])
//! - `GET /replays/{run_id}` -- recorded frames for playback
//! - `GET /metrics?run_id=...` -- metric samples for comparison charts
//! - `GET /replays` -- recorded run listing

use cityflow_types::{
    ApiErrorResponse, MetricsResponse, ReplayResponse, ReplaysResponse, RunInfo, StateResponse,
    StateSnapshot,
};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::transport::PullSource;

/// Client for the CityFlow REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client rooted at the configured API URL.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.api_url.clone(),
        })
    }

    /// Fetch the latest snapshot.
    ///
    /// Returns `None` when the API has no snapshot yet, either as
    /// `{"state": null}` or as a 404.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Http`] for other non-success statuses and
    /// [`SyncError::Request`] for network failures.
    pub async fn get_state(&self) -> Result<Option<StateSnapshot>, SyncError> {
        let url = self.url(&["state"])?;
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: StateResponse = read_json(response).await?;
        Ok(body.state)
    }

    /// Fetch the recorded frames of a run, optionally capped to `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Http`] if the run does not exist or the API
    /// rejects the request.
    pub async fn fetch_replay(
        &self,
        run_id: &str,
        limit: Option<u32>,
    ) -> Result<ReplayResponse, SyncError> {
        let url = self.url(&["replays", run_id])?;
        let mut request = self.http.get(url);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        let body: ReplayResponse = read_json(request.send().await?).await?;
        debug!(run_id, frames = body.frames.len(), "replay fetched");
        Ok(body)
    }

    /// Fetch the metric samples of a run.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Http`] if the run does not exist or the API
    /// rejects the request.
    pub async fn fetch_metrics(&self, run_id: &str) -> Result<MetricsResponse, SyncError> {
        let url = self.url(&["metrics"])?;
        let request = self.http.get(url).query(&[("run_id", run_id)]);
        let body: MetricsResponse = read_json(request.send().await?).await?;
        debug!(run_id, records = body.records.len(), "metrics fetched");
        Ok(body)
    }

    /// List recorded runs, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Http`] or [`SyncError::Request`] on failure.
    pub async fn list_runs(&self) -> Result<Vec<RunInfo>, SyncError> {
        let url = self.url(&["replays"])?;
        let body: ReplaysResponse = read_json(self.http.get(url).send().await?).await?;
        Ok(body.items)
    }

    /// Build an endpoint URL by appending path segments to the base URL.
    fn url(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .ok()
            .ok_or_else(|| {
                SyncError::InvalidUrl(format!("{} cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl PullSource for ApiClient {
    async fn fetch_state(
        &self,
        cancel: CancellationToken,
    ) -> Result<Option<StateSnapshot>, SyncError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SyncError::Cancelled),
            result = self.get_state() => result,
        }
    }
}

/// Decode a JSON body, turning non-success statuses into
/// [`SyncError::Http`].
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SyncError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    if !status.is_success() {
        return Err(SyncError::Http {
            status: status.as_u16(),
            message: error_message(status, &bytes),
        });
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// Extract the API's error message from a failed response body.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ApiErrorResponse>(body).map_or_else(
        |_| {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_owned()
        },
        |err| format!("{} ({})", err.message, err.error_code),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(&SyncConfig::new(base).unwrap()).unwrap()
    }

    #[test]
    fn urls_append_to_base_path() {
        let api = client("http://localhost:8000/api/");
        assert_eq!(
            api.url(&["replays", "run 1"]).unwrap().as_str(),
            "http://localhost:8000/api/replays/run%201"
        );
        let api = client("http://localhost:8000");
        assert_eq!(api.url(&["state"]).unwrap().as_str(), "http://localhost:8000/state");
    }

    #[test]
    fn error_message_prefers_api_body() {
        let body = br#"{"ok": false, "error_code": "run_not_found", "message": "Run 'x' not found."}"#;
        assert_eq!(
            error_message(StatusCode::NOT_FOUND, body),
            "Run 'x' not found. (run_not_found)"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, b"<html>"),
            "Bad Gateway"
        );
    }

    #[tokio::test]
    async fn cancelled_fetch_returns_without_network() {
        let api = client("http://127.0.0.1:9");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = api.fetch_state(cancel).await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }
}
