//! Shared series data types

use std::collections::HashMap;

/// Series data point (timestamp_ms, value)
pub type SeriesPoint = (i64, f64);

/// One labelled series returned by a range query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Series {
    pub labels: HashMap<String, String>,
    pub points: Vec<SeriesPoint>,
}

impl Series {
    pub fn latest(&self) -> Option<SeriesPoint> {
        self.points.last().copied()
    }
}

/// Absolute time range of one refresh cycle, in epoch milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    pub fn ending_at(end_ms: i64, span_ms: i64) -> Self {
        Self {
            start_ms: end_ms.saturating_sub(span_ms),
            end_ms,
        }
    }
}
