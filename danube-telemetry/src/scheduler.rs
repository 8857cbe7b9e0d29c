//! Refresh loop for the broker telemetry charts.
//!
//! `PollScheduler` owns the polling cadence and the only concurrency of the crate. Each
//! refresh cycle issues one range query per tracked [`MetricIdentity`] without waiting on
//! the others; replies are merged into a [`SeriesAggregator`] and every accepted reply is
//! published as a fresh immutable [`SeriesCollection`] on a watch channel.
//!
//! Ordering is enforced with a monotonically increasing issuance sequence: a reply only
//! lands when its sequence is not older than the one already shown for its identity.
//! Changing the span, the end time or the identity cancels every fetch issued under the
//! old parameters. `stop()` cancels the timer and all fetches; nothing is published after
//! it returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::{QueryResult, SeriesAggregator, SeriesCollection};
use crate::client::{MetricsBackend, RangeQuery};
use crate::config::TelemetryConfig;
use crate::duration::{parse_duration, parse_interval};
use crate::errors::{QueryError, Result, TelemetryError};
use crate::query::{MetricIdentity, ResourceIdentity};
use crate::sampling::SamplePlan;
use crate::types::TimeWindow;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollMode {
    /// Interval is zero, no timer armed.
    Idle,
    /// Timer armed with the current interval.
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollState {
    pub interval: Duration,
    /// Epoch milliseconds of the last refresh cycle.
    pub last_tick_at: Option<i64>,
}

impl PollState {
    pub fn mode(&self) -> PollMode {
        if self.interval.is_zero() {
            PollMode::Idle
        } else {
            PollMode::Active
        }
    }
}

struct PollParams {
    resource: ResourceIdentity,
    plan: SamplePlan,
    end_time: Option<i64>,
    state: PollState,
}

struct Published {
    aggregator: SeriesAggregator,
    // rotated on every parameter change
    generation: CancellationToken,
    backend_unavailable: bool,
}

struct Shared {
    backend: Arc<dyn MetricsBackend>,
    min_step: Duration,
    explicit_samples: Option<usize>,
    fetch_timeout: Duration,
    // lock order: params, then published
    params: Mutex<PollParams>,
    published: Mutex<Published>,
    next_seq: AtomicU64,
    shutdown: CancellationToken,
    updates: watch::Sender<Arc<SeriesCollection>>,
}

struct TimerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TimerTask {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Periodic re-querying of the metrics backend for one broker.
pub struct PollScheduler {
    shared: Arc<Shared>,
    timer: Mutex<Option<TimerTask>>,
}

impl PollScheduler {
    /// Create an idle scheduler for `resource`. Nothing is fetched until [`start`](Self::start)
    /// or [`tick`](Self::tick) is called.
    pub fn new(
        backend: Arc<dyn MetricsBackend>,
        resource: ResourceIdentity,
        config: &TelemetryConfig,
    ) -> Result<Self> {
        resource.validate()?;

        let plan = SamplePlan::new(config.default_span, config.min_step, config.default_samples);
        let aggregator = SeriesAggregator::new(resource.metrics(), plan.span, plan.samples);
        let (updates, _) = watch::channel(Arc::new(aggregator.snapshot()));
        let shutdown = CancellationToken::new();

        let shared = Shared {
            backend,
            min_step: config.min_step,
            explicit_samples: config.default_samples,
            fetch_timeout: config.fetch_timeout,
            params: Mutex::new(PollParams {
                resource,
                plan,
                end_time: None,
                state: PollState {
                    interval: config.poll_interval,
                    last_tick_at: None,
                },
            }),
            published: Mutex::new(Published {
                aggregator,
                generation: shutdown.child_token(),
                backend_unavailable: false,
            }),
            next_seq: AtomicU64::new(0),
            shutdown,
            updates,
        };

        Ok(Self {
            shared: Arc::new(shared),
            timer: Mutex::new(None),
        })
    }

    /// Run one refresh cycle right away and arm the timer for the configured interval.
    pub async fn start(&self) {
        let interval = self.shared.params.lock().await.state.interval;
        info!(
            target = "poll_scheduler",
            interval_ms = interval.as_millis() as u64,
            "poll scheduler started"
        );
        self.tick().await;
        self.set_interval(interval).await;
    }

    /// Issue one fetch per tracked identity. Returns once the fetches are issued, not
    /// when they complete.
    pub async fn tick(&self) {
        self.shared.tick().await;
    }

    /// Change the polling interval. Zero disarms the timer, anything else (re)arms it.
    pub async fn set_interval(&self, interval: Duration) {
        if self.is_stopped() {
            return;
        }
        // held across the params write: recorded interval and armed timer stay in step
        let mut timer = self.timer.lock().await;
        self.shared.params.lock().await.state.interval = interval;

        if let Some(task) = timer.take() {
            task.stop();
        }
        if interval.is_zero() {
            info!(target = "poll_scheduler", "polling disabled");
        } else {
            *timer = Some(self.spawn_timer(interval));
            info!(
                target = "poll_scheduler",
                interval_ms = interval.as_millis() as u64,
                "polling armed"
            );
        }
    }

    /// Parse and apply a user-selected interval. On a parse error the current interval stays.
    pub async fn set_interval_text(&self, text: &str) -> Result<Duration> {
        let interval = parse_interval(text)?;
        self.set_interval(interval).await;
        Ok(interval)
    }

    /// Change the visible span, re-plan the sample count and refresh immediately. A zero
    /// span is ignored.
    pub async fn set_span(&self, span: Duration) {
        if span.is_zero() {
            warn!(target = "poll_scheduler", "zero span ignored");
            return;
        }
        let plan = SamplePlan::new(span, self.shared.min_step, self.shared.explicit_samples);
        debug!(
            target = "poll_scheduler",
            span_ms = span.as_millis() as u64,
            samples = plan.samples,
            "span changed"
        );
        self.shared.reconfigure(|params| params.plan = plan).await;
    }

    /// Parse and apply a user-selected span. On a parse error or a zero span the current
    /// span stays.
    pub async fn set_span_text(&self, text: &str) -> Result<Duration> {
        let span = parse_duration(text)?;
        if span.is_zero() {
            return Err(TelemetryError::InvalidConfig(
                "span must be greater than zero".to_string(),
            ));
        }
        self.set_span(span).await;
        Ok(span)
    }

    /// Pin the end of the window, or follow "now" with `None`. Refreshes immediately.
    pub async fn set_end_time(&self, end_time: Option<i64>) {
        self.shared
            .reconfigure(|params| params.end_time = end_time)
            .await;
    }

    /// Switch to another broker. Refreshes immediately; slots start over as pending.
    pub async fn set_identity(&self, resource: ResourceIdentity) -> Result<()> {
        resource.validate()?;
        info!(
            target = "poll_scheduler",
            broker = %resource.name,
            namespace = %resource.namespace,
            "identity changed"
        );
        self.shared
            .reconfigure(|params| params.resource = resource)
            .await;
        Ok(())
    }

    /// Tear down: disarm the timer and discard every in-flight fetch. Terminal.
    pub async fn stop(&self) {
        {
            // publications check the token under this lock
            let _published = self.shared.published.lock().await;
            self.shared.shutdown.cancel();
        }
        if let Some(task) = self.timer.lock().await.take() {
            task.stop();
        }
        info!(target = "poll_scheduler", "poll scheduler stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    pub async fn state(&self) -> PollState {
        self.shared.params.lock().await.state
    }

    /// Current snapshot of the chart data.
    pub fn snapshot(&self) -> Arc<SeriesCollection> {
        self.shared.updates.borrow().clone()
    }

    /// Receiver notified with every newly published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SeriesCollection>> {
        self.shared.updates.subscribe()
    }

    fn spawn_timer(&self, period: Duration) -> TimerTask {
        let cancel = self.shared.shutdown.child_token();
        let token = cancel.clone();
        let shared = Arc::clone(&self.shared);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => shared.tick().await,
                }
            }
        });

        TimerTask { cancel, handle }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl Shared {
    async fn tick(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let (requests, window, generation) = {
            let mut params = self.params.lock().await;
            let now = now_ms();
            params.state.last_tick_at = Some(now);

            let span_ms = i64::try_from(params.plan.span.as_millis()).unwrap_or(i64::MAX);
            let window = TimeWindow::ending_at(params.end_time.unwrap_or(now), span_ms);
            let generation = self.published.lock().await.generation.clone();

            // sequence numbers are drawn under the params lock so they follow issuance order
            let requests: Vec<(MetricIdentity, u64, Result<RangeQuery>)> = params
                .resource
                .metrics()
                .into_iter()
                .map(|identity| {
                    let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
                    let request = params.resource.query(identity.kind).map(|query| RangeQuery {
                        query,
                        namespace: identity.namespace.clone(),
                        start_ms: window.start_ms,
                        end_ms: window.end_ms,
                        step: params.plan.step,
                        timeout: self.fetch_timeout,
                    });
                    (identity, seq, request)
                })
                .collect();
            (requests, window, generation)
        };

        for (identity, seq, request) in requests {
            match request {
                Ok(request) => {
                    let shared = Arc::clone(self);
                    let generation = generation.clone();
                    tokio::spawn(async move {
                        shared
                            .fetch(identity, seq, request, window, generation)
                            .await;
                    });
                }
                Err(e) => {
                    let error = QueryError::Request(e.to_string());
                    self.publish(QueryResult::failure(identity, seq, window, error), &generation)
                        .await;
                }
            }
        }
    }

    async fn fetch(
        self: Arc<Self>,
        identity: MetricIdentity,
        seq: u64,
        request: RangeQuery,
        window: TimeWindow,
        generation: CancellationToken,
    ) {
        debug!(target = "poll_scheduler", identity = %identity, seq, "fetch issued");

        let outcome = tokio::select! {
            _ = generation.cancelled() => {
                debug!(target = "poll_scheduler", identity = %identity, seq, "fetch cancelled");
                return;
            }
            res = tokio::time::timeout(self.fetch_timeout, self.backend.query_range(&request)) => {
                res.unwrap_or(Err(QueryError::Timeout(self.fetch_timeout)))
            }
        };

        let result = match outcome {
            Ok(series) => QueryResult::success(identity, seq, window, series),
            Err(e) => {
                warn!(
                    target = "poll_scheduler",
                    identity = %identity,
                    seq,
                    error = %e,
                    "metrics fetch failed"
                );
                QueryResult::failure(identity, seq, window, e)
            }
        };

        self.publish(result, &generation).await;
    }

    async fn publish(&self, result: QueryResult, generation: &CancellationToken) {
        let mut published = self.published.lock().await;
        // child of `shutdown`, so this also covers stop()
        if generation.is_cancelled() {
            return;
        }

        let identity = result.identity.clone();
        let seq = result.seq;
        if !published.aggregator.apply(result) {
            debug!(target = "poll_scheduler", identity = %identity, seq, "stale result dropped");
            return;
        }

        let snapshot = Arc::new(published.aggregator.snapshot());
        let unavailable = snapshot.backend_unavailable();
        if unavailable != published.backend_unavailable {
            if unavailable {
                warn!(target = "poll_scheduler", "metrics backend unavailable, will retry on next tick");
            } else {
                info!(target = "poll_scheduler", "metrics backend reachable again");
            }
            published.backend_unavailable = unavailable;
        }
        self.updates.send_replace(snapshot);
    }

    /// Apply a parameter change, drop every fetch issued under the old parameters,
    /// publish the reshaped collection and refresh.
    async fn reconfigure<F>(self: &Arc<Self>, change: F)
    where
        F: FnOnce(&mut PollParams),
    {
        {
            let mut params = self.params.lock().await;
            let mut published = self.published.lock().await;
            if self.shutdown.is_cancelled() {
                return;
            }
            change(&mut *params);

            published.generation.cancel();
            published.generation = self.shutdown.child_token();
            published.aggregator.track(params.resource.metrics());
            published
                .aggregator
                .set_window(params.plan.span, params.plan.samples, params.end_time);
            self.updates
                .send_replace(Arc::new(published.aggregator.snapshot()));
        }
        self.tick().await;
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
