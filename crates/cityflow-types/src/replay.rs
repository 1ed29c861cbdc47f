//! Recorded frames for frame-by-frame playback.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::snapshot::LaneSnapshot;

/// One recorded sample of a finished or running simulation.
///
/// Frames of a replay are strictly increasing by `t`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ReplayFrame {
    /// Simulator tick of the frame.
    pub t: u64,
    /// Vehicles in the network at this tick.
    #[serde(default)]
    pub vehicle_count: u32,
    /// Per-lane occupancy keyed by lane identifier.
    #[serde(default)]
    pub lanes: BTreeMap<String, LaneSnapshot>,
    /// Status string recorded with the frame.
    #[serde(default)]
    pub status: String,
}

/// Body of `GET /replays/{run_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ReplayResponse {
    /// Whether the request succeeded.
    #[serde(default = "crate::api::default_ok")]
    pub ok: bool,
    /// Run the frames belong to.
    pub run_id: String,
    /// Recorded frames in tick order.
    #[serde(default)]
    pub frames: Vec<ReplayFrame>,
}

impl ReplayResponse {
    /// Whether the frames are strictly increasing by tick.
    pub fn is_ordered(&self) -> bool {
        self.frames
            .windows(2)
            .all(|pair| matches!(pair, [a, b] if a.t < b.t))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_history_body() {
        let json = serde_json::json!({
            "ok": true,
            "run_id": "run-a",
            "frames": [
                {"t": 0, "vehicle_count": 1, "lanes": {}, "status": "running"},
                {"t": 1, "vehicle_count": 2, "lanes": {"l0": {"vehicles": 2, "waiting": 0}}, "status": "running"}
            ]
        });
        let response: ReplayResponse = serde_json::from_value(json).unwrap();
        assert_eq!(response.frames.len(), 2);
        assert!(response.is_ordered());
    }

    #[test]
    fn detects_out_of_order_frames() {
        let response = ReplayResponse {
            ok: true,
            run_id: "run-a".to_owned(),
            frames: vec![
                ReplayFrame { t: 3, ..ReplayFrame::default() },
                ReplayFrame { t: 3, ..ReplayFrame::default() },
            ],
        };
        assert!(!response.is_ordered());
    }
}
