//! Webhook delivery job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::auth::AuthConfig;

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// One unit of work: send `payload` to `target_url` on behalf of a partner.
///
/// `target_url` is expected to be validated (HTTPS, public host) by the caller.
/// The only field the queue mutates is `attempt_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookJob {
    pub lead_id: String,
    pub partner_id: String,
    pub target_url: String,
    pub payload: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_config: Option<AuthConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Number of times the job has been handed to the worker.
    #[serde(default)]
    pub attempt_count: u32,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl WebhookJob {
    pub fn new(
        lead_id: impl Into<String>,
        partner_id: impl Into<String>,
        target_url: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            lead_id: lead_id.into(),
            partner_id: partner_id.into(),
            target_url: target_url.into(),
            payload,
            auth_config: None,
            content_type: None,
            attempt_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth_config = Some(auth);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    /// Mark the start of a new attempt.
    pub fn start_attempt(&mut self) {
        self.attempt_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_defaults_to_json() {
        let job = WebhookJob::new("l1", "p1", "https://example.com", serde_json::json!({}));
        assert_eq!(job.content_type(), "application/json");

        let job = job.with_content_type("  ");
        assert_eq!(job.content_type(), "application/json");
    }

    #[test]
    fn content_type_override_is_used() {
        let job = WebhookJob::new("l1", "p1", "https://example.com", serde_json::json!({}))
            .with_content_type("application/x-www-form-urlencoded");
        assert_eq!(job.content_type(), "application/x-www-form-urlencoded");
    }

    #[test]
    fn deserializes_minimal_document() {
        let job: WebhookJob = serde_json::from_value(serde_json::json!({
            "lead_id": "lead-1",
            "partner_id": "partner-1",
            "target_url": "https://partner.example/hook",
            "payload": {"event": "lead.converted"}
        }))
        .unwrap();
        assert_eq!(job.attempt_count, 0);
        assert!(job.auth_config.is_none());
    }
}
