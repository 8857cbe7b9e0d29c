use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Notify};

use crate::aggregator::SeriesCollection;
use crate::client::{MetricsBackend, RangeQuery};
use crate::errors::QueryError;
use crate::query::MetricKind;
use crate::types::Series;

#[derive(Clone, Copy, Debug)]
enum Reply {
    Ok,
    Fail,
    Hang,
}

// Fake backend: per-kind reply mode and per-kind delay queue, records every request.
struct FakeBackend {
    calls: AtomicUsize,
    replies: Mutex<HashMap<MetricKind, Reply>>,
    delays: Mutex<HashMap<MetricKind, VecDeque<Duration>>>,
    per_kind_calls: Mutex<HashMap<MetricKind, usize>>,
    requests: Mutex<Vec<RangeQuery>>,
    gate: Option<Arc<Notify>>,
}

impl FakeBackend {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            replies: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            per_kind_calls: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    async fn reply(&self, kind: MetricKind, reply: Reply) {
        self.replies.lock().await.insert(kind, reply);
    }

    async fn delay(&self, kind: MetricKind, delays: &[Duration]) {
        self.delays
            .lock()
            .await
            .insert(kind, delays.iter().copied().collect());
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn last_request(&self) -> Option<RangeQuery> {
        self.requests.lock().await.last().cloned()
    }
}

fn kind_of(request: &RangeQuery) -> MetricKind {
    if request.query.contains("container_memory_working_set_bytes") {
        MetricKind::Memory
    } else {
        MetricKind::Cpu
    }
}

#[async_trait]
impl MetricsBackend for FakeBackend {
    async fn query_range(&self, request: &RangeQuery) -> Result<Vec<Series>, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request.clone());

        let kind = kind_of(request);
        let call = {
            let mut per_kind = self.per_kind_calls.lock().await;
            let n = per_kind.entry(kind).or_insert(0);
            *n += 1;
            *n
        };
        let delay = self
            .delays
            .lock()
            .await
            .get_mut(&kind)
            .and_then(|q| q.pop_front());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let reply = self
            .replies
            .lock()
            .await
            .get(&kind)
            .copied()
            .unwrap_or(Reply::Ok);
        match reply {
            Reply::Ok => Ok(vec![Series {
                labels: HashMap::from([
                    ("pod".to_string(), "broker1-ss-0".to_string()),
                    ("call".to_string(), call.to_string()),
                ]),
                points: vec![(request.end_ms, call as f64)],
            }]),
            Reply::Fail => Err(QueryError::Backend {
                status: "503 Service Unavailable".to_string(),
                message: "querier overloaded".to_string(),
            }),
            Reply::Hang => std::future::pending().await,
        }
    }
}

// Simple async wait helper: polls condition up to timeout_ms .
async fn wait_for_condition<F>(f: F, timeout_ms: u64, interval_ms: u64) -> bool
where
    F: Fn() -> bool,
{
    let mut waited = 0u64;
    while waited <= timeout_ms {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        waited += interval_ms;
    }
    false
}

// Waits for a published snapshot matching `pred`.
async fn wait_for_snapshot<F>(
    rx: &mut watch::Receiver<Arc<SeriesCollection>>,
    pred: F,
    timeout: Duration,
) -> Option<Arc<SeriesCollection>>
where
    F: Fn(&SeriesCollection) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            let current = rx.borrow_and_update().clone();
            if pred(&current) {
                return current;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    })
    .await
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::CollectionStatus;
    use crate::config::TelemetryConfig;
    use crate::errors::TelemetryError;
    use crate::query::{MetricIdentity, ResourceIdentity};
    use crate::scheduler::{PollMode, PollScheduler};

    fn config(poll_interval: Duration) -> TelemetryConfig {
        TelemetryConfig {
            poll_interval,
            ..TelemetryConfig::default()
        }
    }

    fn broker1() -> ResourceIdentity {
        ResourceIdentity::new("broker1", "ns1")
    }

    fn memory() -> MetricIdentity {
        MetricIdentity::new("broker1", "ns1", MetricKind::Memory)
    }

    fn cpu() -> MetricIdentity {
        MetricIdentity::new("broker1", "ns1", MetricKind::Cpu)
    }

    fn scheduler(backend: &Arc<FakeBackend>, poll_interval: Duration) -> PollScheduler {
        let backend: Arc<dyn MetricsBackend> = backend.clone();
        PollScheduler::new(backend, broker1(), &config(poll_interval)).expect("scheduler")
    }

    /// Test: Scheduler construction leaves polling idle
    ///
    /// Expected
    /// - no fetch issued, default span 30m planned with the 30s step floor (60 samples)
    /// - published snapshot is pending for both CPU and memory
    #[tokio::test]
    async fn test_new_scheduler_is_idle() {
        let backend = Arc::new(FakeBackend::new());
        let sched = scheduler(&backend, Duration::ZERO);

        let state = sched.state().await;
        assert_eq!(state.mode(), PollMode::Idle);
        assert_eq!(state.last_tick_at, None);

        let snapshot = sched.snapshot();
        assert_eq!(snapshot.span, Duration::from_secs(1800));
        assert_eq!(snapshot.samples, 60);
        assert_eq!(snapshot.status(), CollectionStatus::InitialLoading);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_identity_is_rejected() {
        let backend: Arc<dyn MetricsBackend> = Arc::new(FakeBackend::new());
        let res = PollScheduler::new(
            backend,
            ResourceIdentity::new("", "ns1"),
            &TelemetryConfig::default(),
        );
        assert!(matches!(res, Err(TelemetryError::InvalidIdentity(_))));
    }

    /// Test: End-to-end refresh with a timing out memory series
    ///
    /// Purpose
    /// - One failing identity must degrade only its own series, never the whole chart
    ///
    /// Flow
    /// - Interval 30s, span 30m, min step 30s; CPU replies, memory never does
    /// - Start the scheduler and let the 60s fetch timeout expire (paused clock)
    ///
    /// Expected
    /// - 60 samples requested with a 30s step
    /// - CPU slot healthy, memory slot loaded with a timeout error
    /// - collection `loaded` and `has_error`, status Degraded
    #[tokio::test(start_paused = true)]
    async fn test_memory_timeout_degrades_one_series() {
        let backend = Arc::new(FakeBackend::new());
        backend.reply(MetricKind::Memory, Reply::Hang).await;
        let sched = scheduler(&backend, Duration::from_secs(30));
        let span = sched.set_span_text("30m").await.unwrap();
        assert_eq!(span, Duration::from_millis(1_800_000));

        let mut rx = sched.subscribe();
        sched.start().await;
        assert_eq!(sched.state().await.mode(), PollMode::Active);

        let snapshot = wait_for_snapshot(&mut rx, |s| s.loaded(), Duration::from_secs(300))
            .await
            .expect("collection loaded");

        assert_eq!(snapshot.samples, 60);
        let cpu_slot = snapshot.result(&cpu()).unwrap();
        assert!(cpu_slot.loaded);
        assert_eq!(cpu_slot.error, None);
        assert_eq!(cpu_slot.series.len(), 1);

        let mem_slot = snapshot.result(&memory()).unwrap();
        assert!(mem_slot.loaded);
        assert_eq!(
            mem_slot.error,
            Some(QueryError::Timeout(Duration::from_secs(60)))
        );
        assert!(snapshot.has_error());
        assert_eq!(snapshot.status(), CollectionStatus::Degraded);

        let request = backend.last_request().await.unwrap();
        assert_eq!(request.end_ms - request.start_ms, 1_800_000);
        assert_eq!(request.step, Duration::from_secs(30));
        assert_eq!(request.namespace, "ns1");

        sched.stop().await;
    }

    /// Test: Later request wins even when its reply arrives first
    ///
    /// Flow
    /// - Two refresh cycles issued back to back; the first cycle's replies take 200ms,
    ///   the second cycle's take 10ms
    ///
    /// Expected
    /// - after both cycles settle, each slot shows the second cycle's reply
    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_replies_keep_latest() {
        let backend = Arc::new(FakeBackend::new());
        let slow_then_fast = [Duration::from_millis(200), Duration::from_millis(10)];
        backend.delay(MetricKind::Cpu, &slow_then_fast).await;
        backend.delay(MetricKind::Memory, &slow_then_fast).await;
        let sched = scheduler(&backend, Duration::ZERO);

        sched.tick().await;
        assert!(wait_for_condition(|| backend.calls() == 2, 100, 1).await);
        sched.tick().await;
        assert!(wait_for_condition(|| backend.calls() == 4, 100, 1).await);

        // let the slow first-cycle replies land too
        tokio::time::sleep(Duration::from_millis(500)).await;

        let snapshot = sched.snapshot();
        for identity in [cpu(), memory()] {
            let slot = snapshot.result(&identity).unwrap();
            assert_eq!(slot.series[0].labels["call"], "2", "{} kept a stale reply", identity);
        }
        let mem_seq = snapshot.result(&memory()).unwrap().seq;
        let cpu_seq = snapshot.result(&cpu()).unwrap().seq;
        assert!(mem_seq > 2 && cpu_seq > 2);
    }

    /// Test: Timer cadence and disarming
    ///
    /// Flow
    /// - Interval 30s, start, advance 95s of paused time
    /// - Set interval to zero and advance another 2 minutes
    ///
    /// Expected
    /// - 1 initial cycle + 3 timer cycles = 8 fetches; none after disarming
    #[tokio::test(start_paused = true)]
    async fn test_interval_ticks_and_disarms() {
        let backend = Arc::new(FakeBackend::new());
        let sched = scheduler(&backend, Duration::from_secs(30));

        sched.start().await;
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(wait_for_condition(|| backend.calls() == 8, 1000, 10).await);

        sched.set_interval(Duration::ZERO).await;
        assert_eq!(sched.state().await.mode(), PollMode::Idle);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(backend.calls(), 8);

        sched.set_interval_text("15s").await.unwrap();
        assert_eq!(sched.state().await.interval, Duration::from_secs(15));
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(wait_for_condition(|| backend.calls() == 10, 1000, 10).await);
        assert!(sched.state().await.last_tick_at.is_some());

        sched.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_text_keeps_previous_values() {
        let backend = Arc::new(FakeBackend::new());
        let sched = scheduler(&backend, Duration::from_secs(30));

        assert!(sched.set_span_text("5x").await.is_err());
        assert!(sched.set_span_text("").await.is_err());
        assert!(sched.set_interval_text("-15s").await.is_err());

        assert_eq!(sched.snapshot().span, Duration::from_secs(1800));
        assert_eq!(sched.state().await.interval, Duration::from_secs(30));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_span_is_rejected() {
        let backend = Arc::new(FakeBackend::new());
        let sched = scheduler(&backend, Duration::ZERO);

        let res = sched.set_span_text("0s").await;
        assert!(matches!(res, Err(TelemetryError::InvalidConfig(_))));
        sched.set_span(Duration::ZERO).await;

        assert_eq!(sched.snapshot().span, Duration::from_secs(1800));
        assert_eq!(sched.snapshot().samples, 60);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.calls(), 0);
    }

    /// Test: Concurrent interval changes leave state and timer in agreement
    ///
    /// Flow
    /// - Two `set_interval` calls (15s and 30s) race on an idle scheduler
    /// - Let 61s pass on the paused clock
    ///
    /// Expected
    /// - the tick count matches the interval recorded in `PollState`
    #[tokio::test(start_paused = true)]
    async fn test_concurrent_set_interval_matches_armed_timer() {
        let backend = Arc::new(FakeBackend::new());
        let sched = scheduler(&backend, Duration::ZERO);

        tokio::join!(
            sched.set_interval(Duration::from_secs(15)),
            sched.set_interval(Duration::from_secs(30)),
        );
        let interval = sched.state().await.interval;
        assert!(interval == Duration::from_secs(15) || interval == Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(61)).await;
        let expected = 2 * (61 / interval.as_secs()) as usize;
        assert!(wait_for_condition(|| backend.calls() == expected, 1000, 10).await);
        assert_eq!(backend.calls(), expected);

        sched.stop().await;
    }

    /// Test: Span change refreshes immediately and cancels stale fetches
    ///
    /// Flow
    /// - Memory hangs so a first-cycle fetch stays in flight; polling is off
    /// - Switch span to 1h
    ///
    /// Expected
    /// - new cycle issued without waiting for a tick, with 120 samples and a 1h window
    /// - the hung fetch under the old span never lands
    #[tokio::test(start_paused = true)]
    async fn test_span_change_triggers_refresh() {
        let backend = Arc::new(FakeBackend::new());
        backend.reply(MetricKind::Memory, Reply::Hang).await;
        let sched = scheduler(&backend, Duration::ZERO);

        sched.tick().await;
        assert!(wait_for_condition(|| backend.calls() == 2, 100, 1).await);

        backend.reply(MetricKind::Memory, Reply::Ok).await;
        sched.set_span(Duration::from_secs(3600)).await;
        assert_eq!(sched.state().await.mode(), PollMode::Idle);
        assert!(wait_for_condition(|| backend.calls() == 4, 100, 1).await);

        let mut rx = sched.subscribe();
        let snapshot = wait_for_snapshot(&mut rx, |s| s.loaded(), Duration::from_secs(5))
            .await
            .expect("loaded after span change");
        assert_eq!(snapshot.span, Duration::from_secs(3600));
        assert_eq!(snapshot.samples, 120);
        assert!(!snapshot.has_error());

        let request = backend.last_request().await.unwrap();
        assert_eq!(request.end_ms - request.start_ms, 3_600_000);

        // well past the fetch timeout: the cancelled first-cycle memory fetch stays silent
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!sched.snapshot().has_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_change_tracks_new_broker() {
        let backend = Arc::new(FakeBackend::new());
        let sched = scheduler(&backend, Duration::ZERO);
        sched.tick().await;
        assert!(wait_for_condition(|| sched.snapshot().loaded(), 100, 1).await);

        assert!(matches!(
            sched.set_identity(ResourceIdentity::new("broker2", "")).await,
            Err(TelemetryError::InvalidIdentity(_))
        ));

        sched
            .set_identity(ResourceIdentity::new("broker2", "ns2").with_size_hint(Some(2)))
            .await
            .unwrap();
        let mut rx = sched.subscribe();
        let snapshot = wait_for_snapshot(&mut rx, |s| s.loaded(), Duration::from_secs(5))
            .await
            .expect("loaded after identity change");

        let names: Vec<&str> = snapshot
            .results
            .iter()
            .map(|r| r.identity.entity_name.as_str())
            .collect();
        assert_eq!(names, vec!["broker2", "broker2"]);
        assert!(snapshot.result(&cpu()).is_none());

        let request = backend.last_request().await.unwrap();
        assert!(request.query.contains("broker2-ss-(0|1)"));
        assert_eq!(request.namespace, "ns2");
    }

    #[tokio::test]
    async fn test_fixed_end_time() {
        let backend = Arc::new(FakeBackend::new());
        let sched = scheduler(&backend, Duration::ZERO);

        sched.set_end_time(Some(1_700_000_000_000)).await;
        assert!(wait_for_condition(|| sched.snapshot().loaded(), 1000, 5).await);

        let snapshot = sched.snapshot();
        assert_eq!(snapshot.end_time, Some(1_700_000_000_000));
        let domain = snapshot.x_domain().unwrap();
        assert_eq!(domain.end_ms, 1_700_000_000_000);
        assert_eq!(domain.start_ms, 1_700_000_000_000 - 1_800_000);

        let request = backend.last_request().await.unwrap();
        assert_eq!(request.end_ms, 1_700_000_000_000);
    }

    /// Test: Every series failing
    ///
    /// Expected
    /// - collection reports BackendUnavailable, the timer keeps ticking and a later
    ///   successful cycle clears the state
    #[tokio::test(start_paused = true)]
    async fn test_backend_unavailable_keeps_polling() {
        let backend = Arc::new(FakeBackend::new());
        backend.reply(MetricKind::Cpu, Reply::Fail).await;
        backend.reply(MetricKind::Memory, Reply::Fail).await;
        let sched = scheduler(&backend, Duration::from_secs(15));

        let mut rx = sched.subscribe();
        sched.start().await;
        let snapshot = wait_for_snapshot(&mut rx, |s| s.backend_unavailable(), Duration::from_secs(5))
            .await
            .expect("backend unavailable");
        assert_eq!(snapshot.status(), CollectionStatus::BackendUnavailable);

        backend.reply(MetricKind::Cpu, Reply::Ok).await;
        backend.reply(MetricKind::Memory, Reply::Ok).await;
        let snapshot = wait_for_snapshot(
            &mut rx,
            |s| s.status() == CollectionStatus::Ready,
            Duration::from_secs(60),
        )
        .await
        .expect("recovered on a later tick");
        assert!(!snapshot.has_error());
        assert!(backend.calls() >= 4);

        sched.stop().await;
    }

    /// Test: Teardown while fetches are in flight
    ///
    /// Flow
    /// - Backend blocks every fetch on a gate; start the scheduler with a 30s interval
    /// - stop() while both fetches wait, then open the gate and advance time
    ///
    /// Expected
    /// - the published snapshot never changes after stop(), no further fetch is issued
    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_fetches() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(FakeBackend::gated(gate.clone()));
        let sched = scheduler(&backend, Duration::from_secs(30));
        let mut rx = sched.subscribe();

        sched.start().await;
        assert!(wait_for_condition(|| backend.calls() == 2, 100, 1).await);

        sched.stop().await;
        assert!(sched.is_stopped());
        let before = sched.snapshot();
        let _ = rx.borrow_and_update();

        gate.notify_waiters();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(!rx.has_changed().unwrap());
        assert_eq!(sched.snapshot(), before);
        assert!(sched.snapshot().is_initial_loading());
        assert_eq!(backend.calls(), 2);

        // terminal: nothing restarts a stopped scheduler
        sched.tick().await;
        sched.set_interval(Duration::from_secs(15)).await;
        sched.set_span(Duration::from_secs(3600)).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.calls(), 2);
        assert_eq!(sched.snapshot().span, Duration::from_secs(1800));
    }
}
