//! In-process fallback queue.
//!
//! Used when no broker is reachable at startup. Jobs live in an ordered buffer
//! owned by this object; a timer starts a processing cycle every interval.
//!
//! Single-flight: at most one cycle runs at a time. A tick that fires while
//! the previous cycle is still delivering is skipped, so the worker never sees
//! two jobs concurrently no matter how slow a partner endpoint is.
//!
//! State transitions of a job:
//! - buffer -> delivering -> done
//! - buffer -> delivering -> delayed -> buffer (tail) (until max_attempts)
//! - buffer -> delivering -> permanently failed

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use super::QueueDeps;
use super::retry::RetryDecision;
use super::schedule::RetrySchedule;
use super::workers::WorkerGroup;
use crate::domain::{JobId, QueueError, WebhookJob};
use crate::ports::{QueueBackend, QueueKind, QueueStats};

#[derive(Debug, Clone)]
struct QueuedJob {
    id: JobId,
    job: WebhookJob,
}

#[derive(Default)]
struct FallbackState {
    buffer: VecDeque<QueuedJob>,
    delayed: RetrySchedule<QueuedJob>,
    completed: u64,
    failed: u64,
}

/// Result of one processing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was already running.
    Skipped,
    /// Nothing ready.
    Idle,
    Delivered(JobId),
    RetryScheduled { id: JobId, delay: Duration },
    PermanentlyFailed(JobId),
}

struct FallbackInner {
    state: Mutex<FallbackState>,
    in_flight: AtomicBool,
    deps: QueueDeps,
}

/// Clears the in-flight flag when the cycle ends, including on panic.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FallbackInner {
    async fn run_cycle(&self) -> CycleOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return CycleOutcome::Skipped;
        };

        let next = {
            let mut state = self.state.lock().await;
            let due = state.delayed.pop_due(Instant::now());
            state.buffer.extend(due);
            state.buffer.pop_front()
        };
        let Some(QueuedJob { id, mut job }) = next else {
            return CycleOutcome::Idle;
        };

        job.start_attempt();
        tracing::debug!(
            target: "courier::fallback",
            job_id = %id,
            lead_id = %job.lead_id,
            partner_id = %job.partner_id,
            attempt = job.attempt_count,
            "delivering job"
        );

        // lock is not held across the delivery
        let result = self.deps.processor.process(&job).await;

        match result {
            Ok(report) => {
                self.state.lock().await.completed += 1;
                tracing::info!(
                    target: "courier::fallback",
                    job_id = %id,
                    status_code = report.status_code,
                    response_time_ms = report.response_time_ms,
                    attempt = job.attempt_count,
                    "webhook delivered"
                );
                CycleOutcome::Delivered(id)
            }
            Err(err) => {
                // a delay too large for the clock is treated as exhausted
                let retry = match self.deps.policy.decide(job.attempt_count, err.is_retriable()) {
                    RetryDecision::RetryAfter(delay) => {
                        Instant::now().checked_add(delay).map(|ready_at| (ready_at, delay))
                    }
                    RetryDecision::GiveUp => None,
                };

                match retry {
                    Some((ready_at, delay)) => {
                        tracing::warn!(
                            target: "courier::fallback",
                            job_id = %id,
                            attempt = job.attempt_count,
                            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %err,
                            "delivery failed, retry scheduled"
                        );
                        self.state
                            .lock()
                            .await
                            .delayed
                            .schedule(ready_at, QueuedJob { id, job });
                        CycleOutcome::RetryScheduled { id, delay }
                    }
                    None => {
                        let message = format!(
                            "delivery abandoned after {} attempt(s): {err}",
                            job.attempt_count
                        );
                        self.deps
                            .ledger
                            .mark_terminal(&job.lead_id, &job.partner_id, &message)
                            .await;
                        self.state.lock().await.failed += 1;
                        tracing::error!(
                            target: "courier::fallback",
                            job_id = %id,
                            lead_id = %job.lead_id,
                            partner_id = %job.partner_id,
                            attempts = job.attempt_count,
                            error = %err,
                            "delivery permanently failed"
                        );
                        CycleOutcome::PermanentlyFailed(id)
                    }
                }
            }
        }
    }
}

/// In-process queue backend.
pub struct FallbackQueue {
    inner: Arc<FallbackInner>,
    timer: WorkerGroup,
}

impl FallbackQueue {
    /// Queue without a timer; cycles only run through `run_cycle`.
    pub fn manual(deps: QueueDeps) -> Self {
        Self {
            inner: Arc::new(FallbackInner {
                state: Mutex::new(FallbackState::default()),
                in_flight: AtomicBool::new(false),
                deps,
            }),
            timer: WorkerGroup::idle(),
        }
    }

    /// Queue with a timer starting a cycle every `interval`.
    pub fn spawn(deps: QueueDeps, interval: Duration) -> Self {
        // tokio の interval は 0 だと panic する
        let interval = interval.max(Duration::from_millis(1));
        let manual = Self::manual(deps);
        let inner = Arc::clone(&manual.inner);
        let timer = WorkerGroup::spawn(1, move |_, shutdown_rx| {
            timer_loop(Arc::clone(&inner), interval, shutdown_rx)
        });
        Self { timer, ..manual }
    }

    /// Run one processing cycle now.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.inner.run_cycle().await
    }

    /// Instant at which the earliest scheduled retry becomes ready.
    pub async fn next_retry_at(&self) -> Option<Instant> {
        self.inner.state.lock().await.delayed.next_ready_at()
    }
}

async fn timer_loop(
    inner: Arc<FallbackInner>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycles = JoinSet::new();

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                // reap finished cycles
                while cycles.try_join_next().is_some() {}

                let inner = Arc::clone(&inner);
                cycles.spawn(async move {
                    if inner.run_cycle().await == CycleOutcome::Skipped {
                        tracing::trace!(target: "courier::fallback", "previous cycle still running, tick skipped");
                    }
                });
            }
        }
    }

    // let the in-flight delivery finish
    while cycles.join_next().await.is_some() {}
    tracing::debug!(target: "courier::fallback", "fallback timer stopped");
}

#[async_trait]
impl QueueBackend for FallbackQueue {
    fn kind(&self) -> QueueKind {
        QueueKind::Fallback
    }

    async fn enqueue(&self, job: WebhookJob) -> Result<JobId, QueueError> {
        if self.timer.is_shutdown() {
            return Err(QueueError::Closed);
        }
        let id = self.inner.deps.ids.next_job_id();
        tracing::debug!(
            target: "courier::fallback",
            job_id = %id,
            lead_id = %job.lead_id,
            partner_id = %job.partner_id,
            "job buffered"
        );
        self.inner
            .state
            .lock()
            .await
            .buffer
            .push_back(QueuedJob { id, job });
        Ok(id)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.inner.state.lock().await;
        Ok(QueueStats {
            kind: QueueKind::Fallback,
            waiting: (state.buffer.len() + state.delayed.len()) as u64,
            active: u64::from(self.inner.in_flight.load(Ordering::Acquire)),
            completed: state.completed,
            failed: state.failed,
        })
    }

    async fn shutdown(&self) {
        self.timer.shutdown_and_join().await;
        let state = self.inner.state.lock().await;
        let abandoned = state.buffer.len() + state.delayed.len();
        if abandoned > 0 {
            tracing::warn!(
                target: "courier::fallback",
                abandoned,
                "fallback queue stopped with undelivered jobs; they are not persisted"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuthError, DeliveryError, DeliveryStatus};
    use crate::impls::MemoryLedger;
    use crate::ports::{DeliveryReport, JobProcessor, SystemClock, UlidGenerator};
    use crate::queue::RetryPolicy;
    use std::sync::atomic::AtomicUsize;

    /// Worker double: sleeps `latency`, fails with `fail` when set,
    /// tracks how many calls overlap.
    struct StubProcessor {
        latency: Duration,
        fail: Option<fn() -> DeliveryError>,
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl StubProcessor {
        fn new(latency: Duration, fail: Option<fn() -> DeliveryError>) -> Arc<Self> {
            Arc::new(Self {
                latency,
                fail,
                calls: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl JobProcessor for StubProcessor {
        async fn process(&self, _job: &WebhookJob) -> Result<DeliveryReport, DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            match self.fail {
                Some(make_err) => Err(make_err()),
                None => Ok(DeliveryReport {
                    success: true,
                    status_code: 200,
                    response_time_ms: self.latency.as_millis() as u64,
                }),
            }
        }
    }

    fn server_error() -> DeliveryError {
        DeliveryError::HttpStatus {
            status: 500,
            body_snippet: "boom".into(),
        }
    }

    fn bad_auth() -> DeliveryError {
        DeliveryError::AuthValidation(AuthError::MissingField {
            auth_type: "bearer-token",
            field: "token",
        })
    }

    fn deps(processor: Arc<StubProcessor>, ledger: Arc<MemoryLedger>) -> QueueDeps {
        QueueDeps {
            processor,
            ledger,
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            policy: RetryPolicy::default(),
        }
    }

    fn job(lead: &str) -> WebhookJob {
        WebhookJob::new(lead, "partner-1", "https://hooks.example.com/in", serde_json::json!({"lead": lead}))
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_delivered_one_at_a_time() {
        let processor = StubProcessor::new(Duration::from_secs(5), None);
        let ledger = Arc::new(MemoryLedger::new());
        let queue = FallbackQueue::spawn(
            deps(Arc::clone(&processor), ledger),
            Duration::from_millis(100),
        );

        for n in 0..3 {
            queue.enqueue(job(&format!("lead-{n}"))).await.unwrap();
        }

        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(processor.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.completed, 3);
        assert!(stats.is_drained());

        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_cycle_is_skipped() {
        let processor = StubProcessor::new(Duration::from_secs(5), None);
        let queue = Arc::new(FallbackQueue::manual(deps(
            Arc::clone(&processor),
            Arc::new(MemoryLedger::new()),
        )));
        queue.enqueue(job("lead-1")).await.unwrap();
        queue.enqueue(job("lead-2")).await.unwrap();

        let first = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.run_cycle().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(queue.run_cycle().await, CycleOutcome::Skipped);
        assert_eq!(queue.stats().await.unwrap().active, 1);
        assert!(matches!(first.await.unwrap(), CycleOutcome::Delivered(_)));
        assert!(matches!(queue.run_cycle().await, CycleOutcome::Delivered(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_backs_off_then_gives_up() {
        let processor = StubProcessor::new(Duration::ZERO, Some(server_error));
        let ledger = Arc::new(MemoryLedger::new());
        let queue = FallbackQueue::manual(deps(Arc::clone(&processor), Arc::clone(&ledger)));
        let id = queue.enqueue(job("lead-1")).await.unwrap();

        for expected in [2u64, 4, 8, 16] {
            assert_eq!(
                queue.run_cycle().await,
                CycleOutcome::RetryScheduled {
                    id,
                    delay: Duration::from_secs(expected)
                }
            );
            assert_eq!(
                queue.next_retry_at().await,
                Some(Instant::now() + Duration::from_secs(expected))
            );
            // not due yet
            assert_eq!(queue.run_cycle().await, CycleOutcome::Idle);
            tokio::time::advance(Duration::from_secs(expected)).await;
        }

        assert_eq!(queue.run_cycle().await, CycleOutcome::PermanentlyFailed(id));
        assert_eq!(queue.run_cycle().await, CycleOutcome::Idle);
        assert_eq!(queue.next_retry_at().await, None);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 5);

        let record = ledger.get("lead-1", "partner-1").unwrap();
        assert_eq!(record.status, DeliveryStatus::PermanentlyFailed);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.waiting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_backoff_fails_the_job() {
        let processor = StubProcessor::new(Duration::ZERO, Some(server_error));
        let ledger = Arc::new(MemoryLedger::new());
        let mut deps = deps(Arc::clone(&processor), Arc::clone(&ledger));
        // 2s, then a delay no Instant can hold
        deps.policy.multiplier = f64::INFINITY;
        let queue = FallbackQueue::manual(deps);
        let id = queue.enqueue(job("lead-1")).await.unwrap();

        assert_eq!(
            queue.run_cycle().await,
            CycleOutcome::RetryScheduled {
                id,
                delay: Duration::from_secs(2)
            }
        );
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(queue.run_cycle().await, CycleOutcome::PermanentlyFailed(id));
        assert_eq!(processor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            ledger.get("lead-1", "partner-1").map(|r| r.status),
            Some(DeliveryStatus::PermanentlyFailed)
        );
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.waiting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_timer_still_delivers() {
        let processor = StubProcessor::new(Duration::ZERO, None);
        let queue = FallbackQueue::spawn(
            deps(Arc::clone(&processor), Arc::new(MemoryLedger::new())),
            Duration::ZERO,
        );
        queue.enqueue(job("lead-1")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.stats().await.unwrap().completed, 1);

        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failure_is_terminal_at_once() {
        let processor = StubProcessor::new(Duration::ZERO, Some(bad_auth));
        let ledger = Arc::new(MemoryLedger::new());
        let queue = FallbackQueue::manual(deps(Arc::clone(&processor), Arc::clone(&ledger)));
        let id = queue.enqueue(job("lead-1")).await.unwrap();

        assert_eq!(queue.run_cycle().await, CycleOutcome::PermanentlyFailed(id));
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            ledger.get("lead-1", "partner-1").map(|r| r.status),
            Some(DeliveryStatus::PermanentlyFailed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_are_delivered_in_arrival_order() {
        let processor = StubProcessor::new(Duration::ZERO, None);
        let queue = FallbackQueue::manual(deps(processor, Arc::new(MemoryLedger::new())));
        let a = queue.enqueue(job("a")).await.unwrap();
        let b = queue.enqueue(job("b")).await.unwrap();

        assert_eq!(queue.run_cycle().await, CycleOutcome::Delivered(a));
        assert_eq!(queue.run_cycle().await, CycleOutcome::Delivered(b));
        assert_eq!(queue.run_cycle().await, CycleOutcome::Idle);
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_rejected() {
        let processor = StubProcessor::new(Duration::ZERO, None);
        let queue = FallbackQueue::spawn(
            deps(processor, Arc::new(MemoryLedger::new())),
            Duration::from_secs(2),
        );
        queue.shutdown().await;

        let err = queue.enqueue(job("late")).await.unwrap_err();
        assert!(matches!(err, QueueError::Closed));
    }
}
