//! Client-side engines over recorded simulation history.
//!
//! # Modules
//!
//! - [`error`] -- [`TimelineError`]
//! - [`merge`] -- Projection of several runs' metric samples onto one time axis
//! - [`playback`] -- Cursor and auto-advancing player over replay frames

pub mod error;
pub mod merge;
pub mod playback;

pub use error::TimelineError;
pub use merge::{MergedRow, MetricField, merge};
pub use playback::{DEFAULT_TICK, PlaybackCursor, PlaybackEngine};
