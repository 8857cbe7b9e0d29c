//! Merging of independently arriving query results into one chart-ready collection.
//!
//! Every tracked [`MetricIdentity`] owns a slot. A result only replaces the slot's current
//! content when it was issued at or after it, so a slow reply overtaken by a newer one is
//! dropped on arrival instead of rolling the chart back.

use std::collections::HashMap;
use std::time::Duration;

use crate::errors::QueryError;
use crate::query::MetricIdentity;
use crate::types::{Series, SeriesPoint, TimeWindow};

/// Outcome of one fetch for one identity.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResult {
    pub identity: MetricIdentity,
    /// Issuance sequence of the request that produced this result; 0 for a placeholder.
    pub seq: u64,
    pub loaded: bool,
    pub error: Option<QueryError>,
    pub series: Vec<Series>,
    pub window: Option<TimeWindow>,
}

impl QueryResult {
    /// Placeholder held by a slot until its first reply lands.
    pub fn pending(identity: MetricIdentity) -> Self {
        Self {
            identity,
            seq: 0,
            loaded: false,
            error: None,
            series: Vec::new(),
            window: None,
        }
    }

    pub fn success(identity: MetricIdentity, seq: u64, window: TimeWindow, series: Vec<Series>) -> Self {
        Self {
            identity,
            seq,
            loaded: true,
            error: None,
            series,
            window: Some(window),
        }
    }

    /// A failed fetch still counts as loaded; the error is what gets rendered.
    pub fn failure(identity: MetricIdentity, seq: u64, window: TimeWindow, error: QueryError) -> Self {
        Self {
            identity,
            seq,
            loaded: true,
            error: Some(error),
            series: Vec::new(),
            window: Some(window),
        }
    }
}

/// Coarse state of a collection, for views that render one banner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionStatus {
    /// Nothing has arrived yet.
    InitialLoading,
    /// Some slots are still waiting for their first reply.
    Loading,
    Ready,
    /// Loaded, but at least one series failed.
    Degraded,
    /// Every tracked series failed.
    BackendUnavailable,
}

/// Immutable snapshot handed to the chart boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesCollection {
    pub results: Vec<QueryResult>,
    pub span: Duration,
    pub samples: usize,
    /// Pinned end of the window; `None` means "now" at every tick.
    pub end_time: Option<i64>,
}

impl SeriesCollection {
    /// True once every tracked slot has loaded, successfully or not.
    pub fn loaded(&self) -> bool {
        self.results.iter().all(|r| r.loaded)
    }

    pub fn has_error(&self) -> bool {
        self.results.iter().any(|r| r.error.is_some())
    }

    pub fn is_initial_loading(&self) -> bool {
        !self.results.iter().any(|r| r.loaded)
    }

    pub fn backend_unavailable(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.loaded && r.error.is_some())
    }

    pub fn status(&self) -> CollectionStatus {
        if self.backend_unavailable() {
            CollectionStatus::BackendUnavailable
        } else if self.is_initial_loading() {
            CollectionStatus::InitialLoading
        } else if !self.loaded() {
            CollectionStatus::Loading
        } else if self.has_error() {
            CollectionStatus::Degraded
        } else {
            CollectionStatus::Ready
        }
    }

    pub fn result(&self, identity: &MetricIdentity) -> Option<&QueryResult> {
        self.results.iter().find(|r| &r.identity == identity)
    }

    /// Shared X-domain of every series: the pinned window, or the window of the most
    /// recent reply when following "now".
    pub fn x_domain(&self) -> Option<TimeWindow> {
        let span_ms = i64::try_from(self.span.as_millis()).unwrap_or(i64::MAX);
        match self.end_time {
            Some(end) => Some(TimeWindow::ending_at(end, span_ms)),
            None => self
                .results
                .iter()
                .filter_map(|r| r.window)
                .map(|w| w.end_ms)
                .max()
                .map(|end| TimeWindow::ending_at(end, span_ms)),
        }
    }

    /// Flatten into titled series for rendering. `format_title` maps a series' labels to
    /// its legend text, see [`pod_title`].
    pub fn chart_series<F>(&self, format_title: F) -> Vec<ChartSeries<'_>>
    where
        F: Fn(&HashMap<String, String>) -> String,
    {
        self.results
            .iter()
            .flat_map(|r| r.series.iter().map(move |s| (r, s)))
            .map(|(r, s)| ChartSeries {
                identity: &r.identity,
                title: format_title(&s.labels),
                points: &s.points,
            })
            .collect()
    }
}

/// Read-only view of one rendered line.
#[derive(Debug, PartialEq)]
pub struct ChartSeries<'a> {
    pub identity: &'a MetricIdentity,
    pub title: String,
    pub points: &'a [SeriesPoint],
}

/// Default legend: the pod a series belongs to.
pub fn pod_title(labels: &HashMap<String, String>) -> String {
    labels.get("pod").cloned().unwrap_or_default()
}

/// Slot map keyed by identity, plus the window parameters every slot shares.
#[derive(Debug)]
pub struct SeriesAggregator {
    tracked: Vec<MetricIdentity>,
    slots: HashMap<MetricIdentity, QueryResult>,
    span: Duration,
    samples: usize,
    end_time: Option<i64>,
}

impl SeriesAggregator {
    pub fn new(identities: Vec<MetricIdentity>, span: Duration, samples: usize) -> Self {
        let mut aggregator = Self {
            tracked: Vec::new(),
            slots: HashMap::new(),
            span,
            samples,
            end_time: None,
        };
        aggregator.track(identities);
        aggregator
    }

    /// Replace the tracked identities. Slots of identities that stay tracked are kept,
    /// new ones start pending, and the rest are dropped.
    pub fn track(&mut self, identities: Vec<MetricIdentity>) {
        let mut slots = HashMap::with_capacity(identities.len());
        let mut tracked = Vec::with_capacity(identities.len());
        for identity in identities {
            if slots.contains_key(&identity) {
                continue;
            }
            let slot = self
                .slots
                .remove(&identity)
                .unwrap_or_else(|| QueryResult::pending(identity.clone()));
            slots.insert(identity.clone(), slot);
            tracked.push(identity);
        }
        self.slots = slots;
        self.tracked = tracked;
    }

    pub fn tracked(&self) -> &[MetricIdentity] {
        &self.tracked
    }

    pub fn set_window(&mut self, span: Duration, samples: usize, end_time: Option<i64>) {
        self.span = span;
        self.samples = samples;
        self.end_time = end_time;
    }

    /// Store `result` in its slot. Returns false when the identity is not tracked or the
    /// slot already holds a result from a later request.
    pub fn apply(&mut self, result: QueryResult) -> bool {
        let Some(slot) = self.slots.get_mut(&result.identity) else {
            return false;
        };
        if result.seq < slot.seq {
            return false;
        }
        *slot = result;
        true
    }

    pub fn merge<I>(&mut self, results: I) -> SeriesCollection
    where
        I: IntoIterator<Item = QueryResult>,
    {
        for result in results {
            self.apply(result);
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> SeriesCollection {
        SeriesCollection {
            results: self
                .tracked
                .iter()
                .filter_map(|id| self.slots.get(id).cloned())
                .collect(),
            span: self.span,
            samples: self.samples,
            end_time: self.end_time,
        }
    }
}
