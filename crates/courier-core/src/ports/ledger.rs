//! DeliveryLedger port.
//!
//! Both operations are best-effort. Implementations catch and log their own
//! storage errors; a lost observability write must never abort a delivery or
//! its retry.

use async_trait::async_trait;

use crate::domain::RecordAttempt;

#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Upsert keyed by (lead_id, partner_id): overwrite outcome, attempts += 1.
    ///
    /// Writes are applied in arrival order. A slow attempt finishing after a
    /// newer one can overwrite the newer outcome; callers that need ordering
    /// must not rely on the stored status alone.
    async fn record(&self, attempt: RecordAttempt);

    /// Promote the pair to `permanently_failed`. Does not touch `attempts`.
    async fn mark_terminal(&self, lead_id: &str, partner_id: &str, error_message: &str);
}
