//! Per-run metric samples used for comparative charts.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// One metric sample of a run, recorded once per sampling tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MetricsRecord {
    /// Simulator tick of the sample.
    pub t: u64,
    /// Vehicles in the network.
    #[serde(default)]
    pub vehicle_count: u32,
    /// Mean vehicle speed.
    #[serde(default)]
    pub avg_speed: Option<f64>,
    /// Mean waiting time.
    #[serde(default)]
    pub avg_waiting: Option<f64>,
    /// Vehicles that finished their route.
    #[serde(default)]
    pub throughput: Option<f64>,
}

/// Body of `GET /metrics?run_id=...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MetricsResponse {
    /// Whether the request succeeded.
    #[serde(default = "crate::api::default_ok")]
    pub ok: bool,
    /// Run the records belong to.
    pub run_id: String,
    /// Samples in tick order.
    #[serde(default)]
    pub records: Vec<MetricsRecord>,
}
