//! Live simulation state.
//!
//! A [`StateSnapshot`] is produced by the simulator once per sampling tick
//! and reaches the dashboard either over the state `WebSocket` or through
//! the `GET /state` fallback. Snapshots are immutable once received; a
//! consumer only ever needs the latest one.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Lifecycle status reported by the simulator.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SimStatus {
    /// No run is loaded.
    #[default]
    Idle,
    /// A run is advancing.
    Running,
    /// A run is loaded but not advancing.
    Paused,
    /// A run was stopped by the operator.
    Stopped,
    /// A run reached its step limit.
    Completed,
    /// The simulator failed while running.
    Error,
}

impl SimStatus {
    /// The wire name of this status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Occupancy of a single lane at one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(default)]
#[ts(export, export_to = "bindings/")]
pub struct LaneSnapshot {
    /// Vehicles currently on the lane.
    pub vehicles: u32,
    /// Vehicles on the lane with zero speed.
    pub waiting: u32,
}

/// Aggregate metrics computed by the simulator for the current tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
#[ts(export, export_to = "bindings/")]
pub struct LiveMetrics {
    /// Mean vehicle speed.
    pub avg_speed: Option<f64>,
    /// Mean waiting time.
    pub avg_waiting: Option<f64>,
    /// Vehicles that finished their route.
    pub throughput: Option<f64>,
}

/// One sample of the live simulation state.
///
/// Every field has a default so partially populated payloads from older
/// simulator builds still parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
#[ts(export, export_to = "bindings/")]
pub struct StateSnapshot {
    /// Simulator tick this sample was taken at.
    pub t: u64,
    /// Run the simulator is executing, if any.
    pub run_id: Option<String>,
    /// Simulator lifecycle status.
    pub status: SimStatus,
    /// Vehicles currently in the network.
    pub vehicle_count: u32,
    /// Per-lane occupancy keyed by lane identifier.
    pub lanes: BTreeMap<String, LaneSnapshot>,
    /// Aggregate metrics for this tick.
    #[serde(alias = "metrics_live")]
    pub live_metrics: Option<LiveMetrics>,
    /// Configured simulation rate in ticks per second.
    pub speed_hz: Option<f64>,
    /// Traffic signal phases keyed by intersection, passed through untouched.
    #[ts(type = "Record<string, unknown>")]
    pub signals: BTreeMap<String, serde_json::Value>,
    /// Tick at which the run stops on its own.
    pub step_limit: Option<u64>,
    /// Wall-clock time (UTC, no offset on the wire) the simulator produced
    /// this sample.
    pub updated_at: Option<NaiveDateTime>,
}

impl StateSnapshot {
    /// Total waiting vehicles across all lanes.
    pub fn waiting_total(&self) -> u64 {
        self.lanes
            .values()
            .map(|lane| u64::from(lane.waiting))
            .fold(0_u64, u64::saturating_add)
    }
}
