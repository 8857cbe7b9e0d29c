//! Time-window planning and live polling for broker telemetry charts.
//!
//! The crate turns user selections (span, refresh interval) into range queries against a
//! Prometheus-compatible backend, keeps them refreshed, and assembles the replies into one
//! [`SeriesCollection`] per broker view.

mod errors;
pub use errors::{ParseError, QueryError, Result, TelemetryError};

pub mod duration;
pub use duration::{parse_duration, parse_interval};

pub mod sampling;
pub use sampling::{plan_samples, step_for, SamplePlan};

pub mod query;
pub use query::{build_query, build_query_for_pods, MetricIdentity, MetricKind, ResourceIdentity};

pub mod types;
pub use types::{Series, SeriesPoint, TimeWindow};

// Prometheus range-query client and the backend seam used by the scheduler
pub mod client;
pub use client::{MetricsBackend, MetricsClient, MetricsConfig, RangeQuery};

pub mod aggregator;
pub use aggregator::{
    pod_title, ChartSeries, CollectionStatus, QueryResult, SeriesAggregator, SeriesCollection,
};

pub mod scheduler;
pub use scheduler::{PollMode, PollScheduler, PollState};

pub mod controls;
pub use controls::{PollOption, SpanOption};

pub mod config;
pub use config::TelemetryConfig;

#[cfg(test)]
mod scheduler_test;
