
use crate::collector::ResponseCollector;
use crate::emitter::{BatchEmitter, EmitReport};
use crate::points::{Point, PointList};
use crate::protocol::{Outcome, ProtocolClient, ProtocolError, ReadRequest};
use crate::sink::RecordSink;
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Fault text for points a cycle did not read because the scheduler was stopping.
pub const CANCELLED: &str = "cancelled";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on one read, retries included. Elapsed reads become `Fault("timeout")`.
    pub request_timeout: Duration,
    pub cycles_per_write: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    /// `issued` counts requests sent so far, including the one outstanding.
    Active {
        issued: usize,
        total: usize,
    },
    Draining,
}

#[derive(Debug, Default)]
pub struct CycleStats {
    pub cycles_started: AtomicU64,
    pub cycles_completed: AtomicU64,
    pub ticks_skipped: AtomicU64,
    pub faults: AtomicU64,
    pub records_submitted: AtomicU64,
    pub records_rejected: AtomicU64,
    pub records_dropped: AtomicU64,
    pub failed_writes: AtomicU64,
    pub last_cycle_micros: AtomicU64,
    pub last_cycle_unix_ms: AtomicU64,
}

impl CycleStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_cycle(&self, report: &EmitReport, elapsed: Duration) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.records_submitted
            .fetch_add(report.submitted as u64, Ordering::Relaxed);
        self.records_rejected
            .fetch_add(report.rejected as u64, Ordering::Relaxed);
        self.records_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.failed_writes
            .fetch_add(report.failed_writes as u64, Ordering::Relaxed);
        self.last_cycle_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.last_cycle_unix_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Relaxed);
    }
}

/// Submits one read per point and bounds it by the request timeout.
#[derive(Clone)]
pub struct RequestIssuer {
    client: Arc<dyn ProtocolClient>,
    timeout: Duration,
}

impl RequestIssuer {
    pub fn new(client: Arc<dyn ProtocolClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// The returned future resolves exactly once. Errors and elapsed deadlines become faults.
    pub fn issue(&self, point: &Point) -> impl Future<Output = Outcome> + Send + 'static {
        let client = self.client.clone();
        let request = ReadRequest::for_point(point);
        let timeout = self.timeout;
        async move {
            match tokio::time::timeout(timeout, client.read_property(&request)).await {
                Ok(result) => result.into(),
                Err(_) => Err(ProtocolError::Timeout).into(),
            }
        }
    }
}

/// Drives poll cycles: one read at a time in point-list order, one batch per cycle,
/// never two cycles at once.
#[derive(Clone)]
pub struct CycleScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    points: PointList,
    issuer: RequestIssuer,
    emitter: tokio::sync::Mutex<BatchEmitter>,
    state: Mutex<CycleState>,
    stats: Arc<CycleStats>,
    shutdown: CancellationToken,
}

/// Returns the scheduler to `Idle` when a cycle task ends, however it ends.
struct IdleOnDrop(Arc<Inner>);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        *self.0.lock_state() = CycleState::Idle;
    }
}

impl CycleScheduler {
    pub fn new(
        points: PointList,
        client: Arc<dyn ProtocolClient>,
        sink: Arc<dyn RecordSink>,
        config: SchedulerConfig,
    ) -> Self {
        let inner = Inner {
            points,
            issuer: RequestIssuer::new(client, config.request_timeout),
            emitter: tokio::sync::Mutex::new(BatchEmitter::new(sink, config.cycles_per_write)),
            state: Mutex::new(CycleState::Idle),
            stats: Arc::new(CycleStats::new()),
            shutdown: CancellationToken::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn state(&self) -> CycleState {
        *self.inner.lock_state()
    }

    pub fn stats(&self) -> Arc<CycleStats> {
        self.inner.stats.clone()
    }

    /// Starts a cycle unless one is still running. Returns the spawned cycle, or `None`
    /// when the tick was skipped.
    pub fn tick(&self) -> Option<JoinHandle<()>> {
        if self.inner.shutdown.is_cancelled() {
            tracing::debug!("scheduler stopped, ignoring tick");
            return None;
        }
        {
            let mut state = self.inner.lock_state();
            if *state != CycleState::Idle {
                self.inner.stats.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(state = ?*state, "previous cycle still running, skipping tick");
                return None;
            }
            *state = CycleState::Active {
                issued: 0,
                total: self.inner.points.len(),
            };
        }
        self.inner.stats.cycles_started.fetch_add(1, Ordering::Relaxed);

        let guard = IdleOnDrop(self.inner.clone());
        Some(tokio::spawn(async move {
            guard.0.run_cycle().await;
            drop(guard);
        }))
    }

    /// Ticks every `interval` until cancelled, then waits for the running cycle and
    /// flushes any records held for coalescing.
    ///
    /// A cycle in progress at cancellation stops reading: the outstanding read and every
    /// point after it are recorded as `Fault("cancelled")` and the cycle is emitted as usual.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut current: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.inner.shutdown.cancel();
                    break;
                }
                _ = ticker.tick() => {
                    if let Some(handle) = self.tick() {
                        current = Some(handle);
                    }
                }
            }
        }

        if let Some(handle) = current {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "cycle task failed during shutdown");
            }
        }
        let mut emitter = self.inner.emitter.lock().await;
        tracing::debug!(pending = emitter.pending(), "flushing before shutdown");
        let report = emitter.flush().await;
        if report.submitted + report.rejected + report.dropped > 0 {
            tracing::info!(
                submitted = report.submitted,
                rejected = report.rejected,
                dropped = report.dropped,
                "flushed pending records on shutdown"
            );
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CycleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: CycleState) {
        *self.lock_state() = state;
    }

    async fn run_cycle(&self) {
        let started = Instant::now();
        let snapshot = self.points.clone();
        let total = snapshot.len();
        let mut collector = ResponseCollector::new(total);
        let mut skipped = 0usize;

        for (index, point) in snapshot.iter().enumerate() {
            let outcome = if self.shutdown.is_cancelled() {
                skipped += 1;
                Outcome::Fault(CANCELLED.to_string())
            } else {
                self.set_state(CycleState::Active {
                    issued: index + 1,
                    total,
                });
                tokio::select! {
                    outcome = self.issuer.issue(point) => outcome,
                    _ = self.shutdown.cancelled() => {
                        skipped += 1;
                        Outcome::Fault(CANCELLED.to_string())
                    }
                }
            };
            match &outcome {
                Outcome::Fault(reason) if reason != CANCELLED => {
                    tracing::warn!(point = %point, index, error = %reason, "point read failed");
                }
                Outcome::Fault(_) => {}
                Outcome::Value(value) => {
                    tracing::trace!(point = %point, index, value = %value, "point read");
                }
            }
            if let Err(err) = collector.on_complete(outcome) {
                tracing::error!(error = %err, "abandoning cycle");
                return;
            }
        }

        if skipped > 0 {
            tracing::info!(skipped, total, "stopping mid-cycle; unread points recorded as cancelled");
        }
        self.set_state(CycleState::Draining);
        let timestamp = Utc::now();
        let outcomes = match collector.finish() {
            Ok(outcomes) => outcomes,
            Err(err) => {
                tracing::error!(error = %err, "abandoning cycle");
                return;
            }
        };
        let faults = outcomes.iter().filter(|outcome| outcome.is_fault()).count() as u64;
        self.stats.faults.fetch_add(faults, Ordering::Relaxed);

        let report = self
            .emitter
            .lock()
            .await
            .emit(&snapshot, &outcomes, timestamp)
            .await;
        let elapsed = started.elapsed();
        self.stats.record_cycle(&report, elapsed);
        tracing::info!(
            points = total,
            faults,
            submitted = report.submitted,
            rejected = report.rejected,
            dropped = report.dropped,
            pending = report.pending,
            micros = elapsed.as_micros() as u64,
            "cycle complete"
        );
    }
}
