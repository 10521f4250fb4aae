//! Redis-backed queue.
//!
//! Key layout under `<prefix>`:
//! - `job:<id>`      job body (JSON)
//! - `waiting`       list of ids, pushed left, popped right
//! - `active`        list of ids currently being delivered
//! - `leases`        sorted set of active ids scored by claim time (epoch ms)
//! - `delayed`       sorted set of ids scored by ready-at (epoch ms)
//! - `completed` / `failed`              capped lists of finished ids
//! - `completed:count` / `failed:count`  counters
//!
//! `waiting -> active` is a single RPOPLPUSH, so a job is never visible in both
//! lists. Whatever is still in `active` at startup belonged to a process that
//! died mid-delivery and goes back to `waiting`.
//!
//! While running, an id whose lease is older than `lease_timeout` (the worker
//! could not write its result back) is returned to `waiting` as well. The
//! attempt count was persisted before delivery, so the retry cap still holds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::watch;
use tokio::time::sleep;

use super::QueueDeps;
use super::retry::RetryDecision;
use super::workers::{WorkerGroup, sleep_or_shutdown};
use crate::config::QueueConfig;
use crate::domain::{JobId, QueueError, WebhookJob};
use crate::ports::{QueueBackend, QueueKind, QueueStats};

/// Moves due ids from `delayed` to `waiting`. Returns how many moved.
const PROMOTE_DUE: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 100)
for _, id in ipairs(due) do
    redis.call('ZREM', KEYS[1], id)
    redis.call('LPUSH', KEYS[2], id)
end
return #due
"#;

/// RPOPLPUSH waiting -> active and stamp the lease in one step.
const CLAIM: &str = r#"
local id = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
if id then
    redis.call('ZADD', KEYS[3], ARGV[1], id)
end
return id
"#;

/// Moves ids with an expired lease from `active` back to `waiting`.
const REAP_EXPIRED: &str = r#"
local stale = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 100)
local moved = 0
for _, id in ipairs(stale) do
    redis.call('ZREM', KEYS[1], id)
    if redis.call('LREM', KEYS[2], 1, id) > 0 then
        redis.call('LPUSH', KEYS[3], id)
        moved = moved + 1
    end
end
return moved
"#;

/// Result writes after a delivery are tried this many times.
const SETTLE_TRIES: u32 = 3;
const SETTLE_BACKOFF: Duration = Duration::from_millis(200);

/// Sorted-set score for a retry `delay` after `now_ms`.
///
/// `None` when the delay does not fit in epoch milliseconds; the job is then
/// treated as out of retries.
pub fn retry_score(now_ms: i64, delay: Duration) -> Option<i64> {
    i64::try_from(delay.as_millis())
        .ok()
        .and_then(|delay_ms| now_ms.checked_add(delay_ms))
}

/// Key names for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn job(&self, id: &str) -> String {
        format!("{}:job:{id}", self.prefix)
    }

    pub fn waiting(&self) -> String {
        format!("{}:waiting", self.prefix)
    }

    pub fn active(&self) -> String {
        format!("{}:active", self.prefix)
    }

    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    pub fn leases(&self) -> String {
        format!("{}:leases", self.prefix)
    }

    pub fn completed(&self) -> String {
        format!("{}:completed", self.prefix)
    }

    pub fn failed(&self) -> String {
        format!("{}:failed", self.prefix)
    }

    pub fn completed_count(&self) -> String {
        format!("{}:completed:count", self.prefix)
    }

    pub fn failed_count(&self) -> String {
        format!("{}:failed:count", self.prefix)
    }
}

/// Open a managed connection and check it answers PING within `timeout`.
pub async fn connect(url: &str, timeout: Duration) -> Result<ConnectionManager, QueueError> {
    let probe = async {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok::<_, QueueError>(conn)
    };
    tokio::time::timeout(timeout, probe)
        .await
        .map_err(|_| QueueError::BrokerTimeout(timeout))?
}

#[derive(Clone, Copy)]
struct Retention {
    completed: isize,
    failed: isize,
}

struct DurableInner {
    conn: ConnectionManager,
    keys: RedisKeys,
    deps: QueueDeps,
    retention: Retention,
    poll_interval: Duration,
    lease_timeout: Duration,
    promote: redis::Script,
    claim: redis::Script,
    reap: redis::Script,
}

/// Broker-backed queue backend.
pub struct DurableQueue {
    inner: Arc<DurableInner>,
    workers: WorkerGroup,
}

impl DurableQueue {
    /// Recover stalled jobs and start `config.concurrency` workers.
    pub async fn start(
        conn: ConnectionManager,
        config: &QueueConfig,
        deps: QueueDeps,
    ) -> Result<Self, QueueError> {
        let inner = Arc::new(DurableInner {
            conn,
            keys: RedisKeys::new(config.key_prefix.clone()),
            deps,
            retention: Retention {
                completed: config.completed_retention as isize,
                failed: config.failed_retention as isize,
            },
            poll_interval: config.poll_interval(),
            lease_timeout: config.lease_timeout(),
            promote: redis::Script::new(PROMOTE_DUE),
            claim: redis::Script::new(CLAIM),
            reap: redis::Script::new(REAP_EXPIRED),
        });

        let recovered = inner.recover_stalled().await?;
        if recovered > 0 {
            tracing::warn!(
                target: "courier::durable",
                recovered,
                "re-queued jobs left active by a previous process"
            );
        }

        let concurrency = config.concurrency.max(1);
        let workers = WorkerGroup::spawn(concurrency, |worker_id, shutdown_rx| {
            worker_loop(Arc::clone(&inner), worker_id, shutdown_rx)
        });
        tracing::info!(
            target: "courier::durable",
            concurrency,
            prefix = %config.key_prefix,
            "durable queue started"
        );

        Ok(Self { inner, workers })
    }

    pub fn keys(&self) -> &RedisKeys {
        &self.inner.keys
    }
}

impl DurableInner {
    fn conn(&self) -> ConnectionManager {
        // ConnectionManager is a cheap handle over one multiplexed connection
        self.conn.clone()
    }

    async fn recover_stalled(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn();
        let mut moved = 0;
        loop {
            let id: Option<String> = conn
                .rpoplpush(self.keys.active(), self.keys.waiting())
                .await?;
            if id.is_none() {
                return Ok(moved);
            }
            moved += 1;
        }
    }

    async fn promote_due(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn();
        let promoted: usize = self
            .promote
            .key(self.keys.delayed())
            .key(self.keys.waiting())
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(promoted)
    }

    async fn reap_expired(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn();
        let lease_ms = i64::try_from(self.lease_timeout.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(lease_ms);
        let moved: usize = self
            .reap
            .key(self.keys.leases())
            .key(self.keys.active())
            .key(self.keys.waiting())
            .arg(cutoff)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }

    /// Take one job and run it. Returns `false` when nothing was waiting.
    async fn poll_once(&self) -> Result<bool, QueueError> {
        let reaped = self.reap_expired().await?;
        if reaped > 0 {
            tracing::warn!(target: "courier::durable", reaped, "re-queued jobs with expired leases");
        }
        let promoted = self.promote_due().await?;
        if promoted > 0 {
            tracing::debug!(target: "courier::durable", promoted, "retries due");
        }

        let mut conn = self.conn();
        let id: Option<String> = self
            .claim
            .key(self.keys.waiting())
            .key(self.keys.active())
            .key(self.keys.leases())
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        let Some(id) = id else {
            return Ok(false);
        };

        let body: Option<String> = conn.get(self.keys.job(&id)).await?;
        let job = match body.as_deref().map(serde_json::from_str::<WebhookJob>) {
            Some(Ok(job)) => job,
            Some(Err(err)) => {
                tracing::error!(target: "courier::durable", job_id = %id, error = %err, "undecodable job dropped");
                self.finish_failed(&id).await?;
                return Ok(true);
            }
            None => {
                tracing::warn!(target: "courier::durable", job_id = %id, "job body missing, id dropped");
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .lrem(self.keys.active(), 1, &id)
                    .ignore()
                    .zrem(self.keys.leases(), &id)
                    .ignore();
                self.settle(&id, &pipe).await?;
                return Ok(true);
            }
        };

        self.run_job(&id, job).await?;
        Ok(true)
    }

    async fn run_job(&self, id: &str, mut job: WebhookJob) -> Result<(), QueueError> {
        let mut conn = self.conn();

        // persisted before delivery: a reaped job keeps its attempt count
        job.start_attempt();
        let _: () = conn
            .set(self.keys.job(id), serde_json::to_string(&job)?)
            .await?;

        let result = self.deps.processor.process(&job).await;

        let err = match result {
            Ok(report) => {
                tracing::info!(
                    target: "courier::durable",
                    job_id = %id,
                    status_code = report.status_code,
                    response_time_ms = report.response_time_ms,
                    attempt = job.attempt_count,
                    "webhook delivered"
                );
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .lrem(self.keys.active(), 1, id)
                    .ignore()
                    .zrem(self.keys.leases(), id)
                    .ignore()
                    .del(self.keys.job(id))
                    .ignore()
                    .lpush(self.keys.completed(), id)
                    .ignore()
                    .ltrim(self.keys.completed(), 0, self.retention.completed - 1)
                    .ignore()
                    .incr(self.keys.completed_count(), 1)
                    .ignore();
                return self.settle(id, &pipe).await;
            }
            Err(err) => err,
        };

        let retry = match self.deps.policy.decide(job.attempt_count, err.is_retriable()) {
            RetryDecision::RetryAfter(delay) => {
                retry_score(Utc::now().timestamp_millis(), delay).map(|score| (score, delay))
            }
            RetryDecision::GiveUp => None,
        };

        match retry {
            Some((ready_at, delay)) => {
                tracing::warn!(
                    target: "courier::durable",
                    job_id = %id,
                    attempt = job.attempt_count,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "delivery failed, retry scheduled"
                );
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .lrem(self.keys.active(), 1, id)
                    .ignore()
                    .zrem(self.keys.leases(), id)
                    .ignore()
                    .zadd(self.keys.delayed(), id, ready_at)
                    .ignore();
                self.settle(id, &pipe).await
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
                tracing::error!(
                    target: "courier::durable",
                    job_id = %id,
                    lead_id = %job.lead_id,
                    partner_id = %job.partner_id,
                    attempts = job.attempt_count,
                    error = %err,
                    "delivery permanently failed"
                );
                self.finish_failed(id).await
            }
        }
    }

    async fn finish_failed(&self, id: &str) -> Result<(), QueueError> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(self.keys.active(), 1, id)
            .ignore()
            .zrem(self.keys.leases(), id)
            .ignore()
            .del(self.keys.job(id))
            .ignore()
            .lpush(self.keys.failed(), id)
            .ignore()
            .ltrim(self.keys.failed(), 0, self.retention.failed - 1)
            .ignore()
            .incr(self.keys.failed_count(), 1)
            .ignore();
        self.settle(id, &pipe).await
    }

    /// Write the outcome of a delivery, retrying short broker hiccups.
    ///
    /// If every try fails the id keeps its lease and `reap_expired` returns it
    /// to `waiting` once the lease runs out.
    async fn settle(&self, id: &str, pipe: &redis::Pipeline) -> Result<(), QueueError> {
        let mut conn = self.conn();
        let mut tries = 1;
        loop {
            let written: redis::RedisResult<()> = pipe.query_async(&mut conn).await;
            match written {
                Ok(()) => return Ok(()),
                Err(err) if tries < SETTLE_TRIES => {
                    tracing::warn!(
                        target: "courier::durable",
                        job_id = %id,
                        tries,
                        error = %err,
                        "could not record delivery result, retrying"
                    );
                    sleep(SETTLE_BACKOFF * tries).await;
                    tries += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.conn();
        let (waiting, delayed, active, completed, failed): (
            u64,
            u64,
            u64,
            Option<u64>,
            Option<u64>,
        ) = redis::pipe()
            .llen(self.keys.waiting())
            .zcard(self.keys.delayed())
            .llen(self.keys.active())
            .get(self.keys.completed_count())
            .get(self.keys.failed_count())
            .query_async(&mut conn)
            .await?;

        Ok(QueueStats {
            kind: QueueKind::Durable,
            waiting: waiting + delayed,
            active,
            completed: completed.unwrap_or(0),
            failed: failed.unwrap_or(0),
        })
    }
}

async fn worker_loop(
    inner: Arc<DurableInner>,
    worker_id: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!(target: "courier::durable", worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let idle = match inner.poll_once().await {
            Ok(ran) => !ran,
            Err(err) => {
                tracing::warn!(target: "courier::durable", worker_id, error = %err, "broker error in worker loop");
                true
            }
        };
        if idle && sleep_or_shutdown(&mut shutdown_rx, inner.poll_interval).await {
            break;
        }
    }
    tracing::debug!(target: "courier::durable", worker_id, "worker stopped");
}

#[async_trait]
impl QueueBackend for DurableQueue {
    fn kind(&self) -> QueueKind {
        QueueKind::Durable
    }

    async fn enqueue(&self, job: WebhookJob) -> Result<JobId, QueueError> {
        if self.workers.is_shutdown() {
            return Err(QueueError::Closed);
        }
        let id = self.inner.deps.ids.next_job_id();
        let id_str = id.to_string();
        let body = serde_json::to_string(&job)?;

        let mut conn = self.inner.conn();
        let _: () = redis::pipe()
            .atomic()
            .set(self.inner.keys.job(&id_str), body)
            .ignore()
            .lpush(self.inner.keys.waiting(), &id_str)
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!(
            target: "courier::durable",
            job_id = %id,
            lead_id = %job.lead_id,
            partner_id = %job.partner_id,
            "job enqueued"
        );
        Ok(id)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.inner.stats().await
    }

    async fn shutdown(&self) {
        self.workers.shutdown_and_join().await;
        tracing::info!(target: "courier::durable", "durable queue stopped");
    }
}
