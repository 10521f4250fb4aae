//! QueueBackend port: the seam between the delivery service and the queue
//! implementation (Redis broker or in-process fallback).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{JobId, QueueError, WebhookJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Durable,
    Fallback,
}

impl QueueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueKind::Durable => "durable",
            QueueKind::Fallback => "fallback",
        }
    }
}

/// Queue counters. Same shape for both backends; the values are approximate
/// (the fallback counts only what this process saw).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    #[serde(rename = "type")]
    pub kind: QueueKind,
    /// Ready plus scheduled-for-retry.
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn empty(kind: QueueKind) -> Self {
        Self {
            kind,
            waiting: 0,
            active: 0,
            completed: 0,
            failed: 0,
        }
    }

    /// Nothing waiting and nothing running.
    pub fn is_drained(&self) -> bool {
        self.waiting == 0 && self.active == 0
    }
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    fn kind(&self) -> QueueKind;

    /// Store a job for asynchronous delivery.
    async fn enqueue(&self, job: WebhookJob) -> Result<JobId, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Stop taking new work and wait for in-flight deliveries.
    async fn shutdown(&self);
}
