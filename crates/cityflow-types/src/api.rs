//! Response envelopes and run listing records.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::snapshot::StateSnapshot;

/// Serde default for the `ok` flag of success envelopes.
pub(crate) const fn default_ok() -> bool {
    true
}

/// Body of `GET /state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StateResponse {
    /// Whether the request succeeded.
    #[serde(default = "default_ok")]
    pub ok: bool,
    /// Latest snapshot, or `null` before the simulator reported anything.
    #[serde(default)]
    pub state: Option<StateSnapshot>,
}

/// Body returned by the API for any rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ApiErrorResponse {
    /// Always `false`.
    #[serde(default)]
    pub ok: bool,
    /// Machine-readable error code (e.g. `run_not_found`).
    pub error_code: String,
    /// Human-readable explanation.
    pub message: String,
}

/// Metadata of a recorded run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RunInfo {
    /// Unique run identifier.
    pub run_id: String,
    /// Scenario preset the run was started from.
    pub preset_id: String,
    /// When the run was started (UTC, no offset on the wire).
    pub started_at: NaiveDateTime,
    /// Configured number of simulation steps.
    pub steps: u64,
    /// Configured simulation rate in ticks per second.
    pub speed_hz: u32,
    /// Random seed the run used.
    pub seed: u64,
    /// Whether frames were recorded for replay.
    pub save_replay: bool,
    /// Last known status string.
    pub status: String,
    /// Operator-assigned tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Body of `GET /replays`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ReplaysResponse {
    /// Whether the request succeeded.
    #[serde(default = "default_ok")]
    pub ok: bool,
    /// Recorded runs, newest first.
    #[serde(default)]
    pub items: Vec<RunInfo>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn null_state_is_none() {
        let response: StateResponse =
            serde_json::from_str(r#"{"ok": true, "state": null}"#).unwrap();
        assert!(response.ok);
        assert!(response.state.is_none());
    }

    #[test]
    fn parses_error_body() {
        let body: ApiErrorResponse = serde_json::from_str(
            r#"{"ok": false, "error_code": "run_not_found", "message": "Run 'x' not found."}"#,
        )
        .unwrap();
        assert_eq!(body.error_code, "run_not_found");
    }

    #[test]
    fn parses_run_listing() {
        let json = serde_json::json!({
            "ok": true,
            "items": [{
                "run_id": "20250101_120000_grid",
                "preset_id": "grid",
                "started_at": "2025-01-01T12:00:00.250000",
                "steps": 3600,
                "speed_hz": 10,
                "seed": 7,
                "save_replay": true,
                "status": "completed"
            }]
        });
        let listing: ReplaysResponse = serde_json::from_value(json).unwrap();
        assert_eq!(listing.items.len(), 1);
        assert!(listing.items.first().is_some_and(|run| run.tags.is_empty()));
    }
}
