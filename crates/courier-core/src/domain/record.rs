//! Delivery ledger record: the latest outcome per (lead, partner).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of characters kept from a response body.
pub const RESPONSE_SNIPPET_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    /// Attempt failed; the queue may still retry.
    Failed,
    /// Retry budget exhausted (or the job can never succeed).
    PermanentlyFailed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::PermanentlyFailed => "permanently_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(DeliveryStatus::Success),
            "failed" => Some(DeliveryStatus::Failed),
            "permanently_failed" => Some(DeliveryStatus::PermanentlyFailed),
            _ => None,
        }
    }
}

/// HTTP response data captured for an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub status_code: u16,
    /// Reason phrase, e.g. `"Not Found"`.
    pub status_text: String,
    pub body_snippet: String,
}

impl ResponseSummary {
    pub fn new(status_code: u16, status_text: impl Into<String>, body: &str) -> Self {
        Self {
            status_code,
            status_text: status_text.into(),
            body_snippet: truncate_snippet(body),
        }
    }
}

/// One `record` call on the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordAttempt {
    pub lead_id: String,
    pub partner_id: String,
    pub target_url: String,
    pub payload: serde_json::Value,
    pub response: Option<ResponseSummary>,
    pub response_time_ms: u64,
    pub status: DeliveryStatus,
    pub error_message: Option<String>,
}

/// Persisted row.
///
/// Exactly one per (lead_id, partner_id). `attempts` counts `record` calls;
/// outcome fields always hold the most recent write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub lead_id: String,
    pub partner_id: String,
    pub target_url: String,
    pub payload_snapshot: serde_json::Value,
    pub response_code: Option<u16>,
    pub response_status: Option<String>,
    pub response_body_snippet: Option<String>,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub status: DeliveryStatus,
    pub delivered_at: DateTime<Utc>,
    pub attempts: u32,
}

impl DeliveryRecord {
    /// First write for a pair.
    pub fn from_attempt(attempt: &RecordAttempt, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            lead_id: attempt.lead_id.clone(),
            partner_id: attempt.partner_id.clone(),
            target_url: String::new(),
            payload_snapshot: serde_json::Value::Null,
            response_code: None,
            response_status: None,
            response_body_snippet: None,
            response_time_ms: None,
            error_message: None,
            status: attempt.status,
            delivered_at: now,
            attempts: 0,
        };
        record.apply(attempt, now);
        record
    }

    /// Upsert semantics: overwrite outcome fields, bump attempts.
    pub fn apply(&mut self, attempt: &RecordAttempt, now: DateTime<Utc>) {
        self.target_url = attempt.target_url.clone();
        self.payload_snapshot = attempt.payload.clone();
        self.response_code = attempt.response.as_ref().map(|r| r.status_code);
        self.response_status = attempt.response.as_ref().map(|r| r.status_text.clone());
        self.response_body_snippet = attempt.response.as_ref().map(|r| r.body_snippet.clone());
        self.response_time_ms = Some(attempt.response_time_ms);
        self.error_message = attempt.error_message.clone();
        self.status = attempt.status;
        self.delivered_at = now;
        self.attempts += 1;
    }

    /// Terminal record for a pair that never had an attempt recorded.
    pub fn terminal_placeholder(
        lead_id: &str,
        partner_id: &str,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            lead_id: lead_id.to_string(),
            partner_id: partner_id.to_string(),
            target_url: String::new(),
            payload_snapshot: serde_json::Value::Null,
            response_code: None,
            response_status: None,
            response_body_snippet: None,
            response_time_ms: None,
            error_message: Some(error_message.to_string()),
            status: DeliveryStatus::PermanentlyFailed,
            delivered_at: now,
            attempts: 0,
        }
    }
}

/// Counts by status, for dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub success: u64,
    pub failed: u64,
    pub permanently_failed: u64,
}

impl LedgerSummary {
    pub fn add(&mut self, status: DeliveryStatus, count: u64) {
        match status {
            DeliveryStatus::Success => self.success += count,
            DeliveryStatus::Failed => self.failed += count,
            DeliveryStatus::PermanentlyFailed => self.permanently_failed += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.success + self.failed + self.permanently_failed
    }
}

/// Keep at most `RESPONSE_SNIPPET_LIMIT` characters (not bytes).
pub fn truncate_snippet(body: &str) -> String {
    match body.char_indices().nth(RESPONSE_SNIPPET_LIMIT) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}
