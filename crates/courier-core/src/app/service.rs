//! DeliveryService - 外部から見える唯一の入口
//!
//! Backend selection happens once, in `start`:
//! - broker URL configured and PING answered within the probe timeout -> DurableQueue
//! - otherwise -> FallbackQueue (logged at warn)
//!
//! If a durable enqueue fails later, that one job goes to an in-process overflow
//! queue created on first use; the selected backend itself never changes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use super::worker::DeliveryWorker;
use crate::config::{CourierConfig, QueueConfig};
use crate::domain::{JobId, QueueError, StartupError, WebhookJob};
use crate::ports::{DeliveryLedger, QueueBackend, QueueKind, QueueStats, SystemClock, UlidGenerator};
use crate::queue::{DurableQueue, FallbackQueue, QueueDeps, connect};

pub struct DeliveryService {
    backend: Box<dyn QueueBackend>,
    overflow: OnceCell<FallbackQueue>,
    deps: QueueDeps,
    fallback_interval: Duration,
}

impl DeliveryService {
    /// Wire the HTTP worker to `ledger` and pick a backend.
    pub async fn start(
        config: &CourierConfig,
        ledger: Arc<dyn DeliveryLedger>,
    ) -> Result<Self, StartupError> {
        let worker = DeliveryWorker::from_config(&config.http, Arc::clone(&ledger))?;
        let deps = QueueDeps {
            processor: Arc::new(worker),
            ledger,
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            policy: config.retry.policy(),
        };
        Ok(Self::with_deps(&config.queue, deps).await)
    }

    /// Same as `start` with caller-provided processor, ledger and ids.
    pub async fn with_deps(config: &QueueConfig, deps: QueueDeps) -> Self {
        let backend = select_backend(config, deps.clone()).await;
        tracing::info!(
            target: "courier::service",
            backend = backend.kind().as_str(),
            "delivery service started"
        );
        Self {
            backend,
            overflow: OnceCell::new(),
            deps,
            fallback_interval: config.fallback_interval(),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.backend.kind()
    }

    /// Accept a job for delivery. Returns as soon as it is queued.
    ///
    /// Only fails after `shutdown`.
    pub async fn enqueue_webhook(&self, job: WebhookJob) -> Result<JobId, QueueError> {
        if self.backend.kind() == QueueKind::Fallback {
            return self.backend.enqueue(job).await;
        }

        match self.backend.enqueue(job.clone()).await {
            Ok(id) => Ok(id),
            Err(QueueError::Closed) => Err(QueueError::Closed),
            Err(err) => {
                tracing::warn!(
                    target: "courier::service",
                    lead_id = %job.lead_id,
                    partner_id = %job.partner_id,
                    error = %err,
                    "broker enqueue failed, job kept in process memory"
                );
                self.overflow().await.enqueue(job).await
            }
        }
    }

    /// Counts of the selected backend, plus any overflow jobs.
    ///
    /// A broker that cannot be read reports zeros rather than an error.
    pub async fn queue_stats(&self) -> QueueStats {
        let mut stats = match self.backend.stats().await {
            Ok(stats) => stats,
            Err(err) => {
                tracing::warn!(target: "courier::service", error = %err, "queue stats unavailable");
                QueueStats::empty(self.backend.kind())
            }
        };

        if let Some(overflow) = self.overflow.get()
            && let Ok(extra) = overflow.stats().await
        {
            stats.waiting += extra.waiting;
            stats.active += extra.active;
            stats.completed += extra.completed;
            stats.failed += extra.failed;
        }
        stats
    }

    /// Stop taking work and wait for in-flight deliveries.
    pub async fn shutdown(&self) {
        self.backend.shutdown().await;
        if let Some(overflow) = self.overflow.get() {
            overflow.shutdown().await;
        }
        tracing::info!(target: "courier::service", "delivery service stopped");
    }

    async fn overflow(&self) -> &FallbackQueue {
        self.overflow
            .get_or_init(|| async {
                tracing::warn!(target: "courier::service", "starting in-process overflow queue");
                FallbackQueue::spawn(self.deps.clone(), self.fallback_interval)
            })
            .await
    }
}

async fn select_backend(config: &QueueConfig, deps: QueueDeps) -> Box<dyn QueueBackend> {
    let Some(url) = config.broker_url() else {
        tracing::warn!(
            target: "courier::service",
            "no broker configured; jobs are kept in process memory and lost on restart"
        );
        return Box::new(FallbackQueue::spawn(deps, config.fallback_interval()));
    };

    let durable = match connect(url, config.probe_timeout()).await {
        Ok(conn) => DurableQueue::start(conn, config, deps.clone()).await,
        Err(err) => Err(err),
    };
    match durable {
        Ok(queue) => Box::new(queue),
        Err(err) => {
            tracing::warn!(
                target: "courier::service",
                error = %err,
                "broker unreachable; jobs are kept in process memory and lost on restart"
            );
            Box::new(FallbackQueue::spawn(deps, config.fallback_interval()))
        }
    }
}
