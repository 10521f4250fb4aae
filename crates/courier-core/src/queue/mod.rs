//! Queue backends: durable (Redis) and in-process fallback, plus the retry
//! machinery both share.

mod durable;
mod fallback;
mod retry;
mod schedule;
mod workers;

pub use durable::{DurableQueue, RedisKeys, connect};
pub use fallback::{CycleOutcome, FallbackQueue};
pub use retry::{RetryDecision, RetryPolicy};
pub use schedule::RetrySchedule;
pub use workers::{WorkerGroup, sleep_or_shutdown};

use std::sync::Arc;

use crate::ports::{DeliveryLedger, IdGenerator, JobProcessor};

/// Everything a queue backend needs to run deliveries.
#[derive(Clone)]
pub struct QueueDeps {
    pub processor: Arc<dyn JobProcessor>,
    pub ledger: Arc<dyn DeliveryLedger>,
    pub ids: Arc<dyn IdGenerator>,
    pub policy: RetryPolicy,
}
