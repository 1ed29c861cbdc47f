//! Shared wire types for the CityFlow operator dashboard.
//!
//! Every payload the dashboard exchanges with the CityFlow API is defined
//! here once. Types flow downstream to `TypeScript` via `ts-rs` so the web
//! front end and the Rust client agree on field names.
//!
//! # Modules
//!
//! - [`snapshot`] -- Live simulation state pushed or polled once per tick
//! - [`replay`] -- Recorded frames for frame-by-frame playback
//! - [`metrics`] -- Per-run metric samples used for comparative charts
//! - [`api`] -- Response envelopes and run listing records

pub mod api;
pub mod metrics;
pub mod replay;
pub mod snapshot;

// Re-export all public types at crate root for convenience.
pub use api::{ApiErrorResponse, ReplaysResponse, RunInfo, StateResponse};
pub use metrics::{MetricsRecord, MetricsResponse};
pub use replay::{ReplayFrame, ReplayResponse};
pub use snapshot::{LaneSnapshot, LiveMetrics, SimStatus, StateSnapshot};
