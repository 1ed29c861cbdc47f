//! Projection of per-run metric samples onto a shared, sorted time axis.
//!
//! Each run is sampled independently, so a tick present in one run may be
//! missing from another. [`merge`] produces one [`MergedRow`] per distinct
//! tick; a row only carries columns for the runs sampled at that tick.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use cityflow_types::MetricsRecord;
use serde::{Deserialize, Serialize};

use crate::error::TimelineError;

/// A single chartable field of [`MetricsRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    /// Vehicles in the network.
    VehicleCount,
    /// Mean vehicle speed.
    AvgSpeed,
    /// Mean waiting time.
    AvgWaiting,
    /// Completed routes.
    Throughput,
}

impl MetricField {
    /// Every field, in display order.
    pub const ALL: [Self; 4] = [
        Self::VehicleCount,
        Self::AvgSpeed,
        Self::AvgWaiting,
        Self::Throughput,
    ];

    /// Wire name of the field.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VehicleCount => "vehicle_count",
            Self::AvgSpeed => "avg_speed",
            Self::AvgWaiting => "avg_waiting",
            Self::Throughput => "throughput",
        }
    }

    /// Read this field from a record. `None` when the sample has no value.
    pub fn extract(self, record: &MetricsRecord) -> Option<f64> {
        match self {
            Self::VehicleCount => Some(f64::from(record.vehicle_count)),
            Self::AvgSpeed => record.avg_speed,
            Self::AvgWaiting => record.avg_waiting,
            Self::Throughput => record.throughput,
        }
    }

    /// Column name of this field for `run_id` in a merged row.
    pub fn column(self, run_id: &str) -> String {
        format!("{run_id}-{}", self.as_str())
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricField {
    type Err = TimelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| TimelineError::UnknownMetric(s.to_owned()))
    }
}

/// One tick of the merged time axis.
///
/// Serializes flat: `{"t": 1, "runA-vehicle_count": 7.0, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergedRow {
    /// Tick shared by every value in the row.
    pub t: u64,
    /// `<run_id>-<metric>` columns for the runs sampled at `t`.
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

impl MergedRow {
    /// Value of a column, if the row carries it.
    pub fn get(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied()
    }
}

/// Merge several runs' samples of one metric into rows sorted by tick.
///
/// A record whose metric has no value contributes `0.0`. If a run has more
/// than one record at the same tick, its last one wins. The result does
/// not depend on the iteration order of `series`.
pub fn merge<I, K, V>(series: I, metric: MetricField) -> Vec<MergedRow>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<[MetricsRecord]>,
{
    let mut by_tick: HashMap<u64, BTreeMap<String, f64>> = HashMap::new();

    for (run_id, records) in series {
        let column = metric.column(run_id.as_ref());
        for record in records.as_ref() {
            by_tick
                .entry(record.t)
                .or_default()
                .insert(column.clone(), metric.extract(record).unwrap_or(0.0));
        }
    }

    let mut rows: Vec<MergedRow> = by_tick
        .into_iter()
        .map(|(t, values)| MergedRow { t, values })
        .collect();
    rows.sort_unstable_by_key(|row| row.t);
    rows
}
