//! JobProcessor port: what a queue backend calls for each attempt.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{DeliveryError, WebhookJob};

/// Successful delivery summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub success: bool,
    pub status_code: u16,
    pub response_time_ms: u64,
}

/// Executes one delivery attempt.
///
/// `Err` is the retry signal; the queue decides retry vs terminal from it.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &WebhookJob) -> Result<DeliveryReport, DeliveryError>;
}
