//! Sample planning for range queries.
//!
//! The metrics backend refuses (or silently coarsens) steps finer than its scrape
//! resolution, so the number of points requested for a span is bounded by a minimum step.

use std::time::Duration;

/// Number of samples to request for `span`.
///
/// A positive `explicit` count is authoritative and returned unchanged. Otherwise the
/// count is `floor(span / min_step)`, never less than 1, which keeps `span / samples`
/// at or above `min_step`.
pub fn plan_samples(span: Duration, min_step: Duration, explicit: Option<usize>) -> usize {
    if let Some(samples) = explicit.filter(|s| *s > 0) {
        return samples;
    }
    let step_ms = min_step.as_millis().max(1);
    let samples = span.as_millis() / step_ms;
    usize::try_from(samples).unwrap_or(usize::MAX).max(1)
}

/// Distance between two consecutive samples, floored at one millisecond.
pub fn step_for(span: Duration, samples: usize) -> Duration {
    let samples = samples.max(1) as u128;
    let step_ms = (span.as_millis() / samples).max(1);
    Duration::from_millis(u64::try_from(step_ms).unwrap_or(u64::MAX))
}

/// Span, sample count and resulting step shared by every query of one refresh cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplePlan {
    pub span: Duration,
    pub samples: usize,
    pub step: Duration,
}

impl SamplePlan {
    pub fn new(span: Duration, min_step: Duration, explicit: Option<usize>) -> Self {
        let samples = plan_samples(span, min_step, explicit);
        Self {
            span,
            samples,
            step: step_for(span, samples),
        }
    }
}
