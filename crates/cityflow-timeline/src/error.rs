//! Error types for the timeline engines.

/// Errors raised by timeline construction and input parsing.
///
/// Playback and merging themselves never fail; empty input is a valid
/// degenerate case.
#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    /// A metric name did not match any [`MetricField`](crate::MetricField).
    #[error("unknown metric field: {0}")]
    UnknownMetric(String),

    /// The playback tick interval was zero.
    #[error("playback tick interval must be non-zero")]
    InvalidTickInterval,
}
