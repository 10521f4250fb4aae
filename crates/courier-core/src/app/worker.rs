//! DeliveryWorker - 1 job = 1 POST
//!
//! # フロー
//! 1. auth を解決（設定が壊れていれば HTTP は送らない）
//! 2. content-type + auth headers で POST
//! 3. 結果を ledger に記録（成功・失敗どちらも）
//! 4. 2xx 以外は `Err` で返す。retry するかどうかは queue が決める

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::HeaderMap;

use crate::auth::try_resolve_optional;
use crate::config::HttpConfig;
use crate::domain::{DeliveryError, DeliveryStatus, RecordAttempt, ResponseSummary, WebhookJob};
use crate::http::{build_client, classify_transport, read_snippet, request_headers};
use crate::ports::{DeliveryLedger, DeliveryReport, JobProcessor};

pub struct DeliveryWorker {
    client: Client,
    ledger: Arc<dyn DeliveryLedger>,
}

impl DeliveryWorker {
    pub fn new(client: Client, ledger: Arc<dyn DeliveryLedger>) -> Self {
        Self { client, ledger }
    }

    pub fn from_config(
        config: &HttpConfig,
        ledger: Arc<dyn DeliveryLedger>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_client(config)?, ledger))
    }

    async fn send(
        &self,
        job: &WebhookJob,
        url: &str,
        headers: HeaderMap,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let request = self.client.post(url).headers(headers);
        // JSON payloads go out as JSON; a string payload with a non-JSON
        // content type is sent as-is (form bodies, XML, ...)
        let request = match (&job.payload, is_json(job.content_type())) {
            (serde_json::Value::String(raw), false) => request.body(raw.clone()),
            // content-type is already set, so `json` keeps it
            (payload, _) => request.json(payload),
        };
        request.send().await
    }

    fn attempt(&self, job: &WebhookJob, status: DeliveryStatus) -> RecordAttempt {
        RecordAttempt {
            lead_id: job.lead_id.clone(),
            partner_id: job.partner_id.clone(),
            target_url: job.target_url.clone(),
            payload: job.payload.clone(),
            response: None,
            response_time_ms: 0,
            status,
            error_message: None,
        }
    }
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case("application/json") || essence.to_ascii_lowercase().ends_with("+json")
}

#[async_trait]
impl JobProcessor for DeliveryWorker {
    async fn process(&self, job: &WebhookJob) -> Result<DeliveryReport, DeliveryError> {
        let prepared = try_resolve_optional(job.auth_config.as_ref(), &job.target_url)
            .and_then(|auth| Ok((request_headers(job.content_type(), &auth)?, auth.url)));

        let (headers, url) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                tracing::warn!(
                    target: "courier::worker",
                    lead_id = %job.lead_id,
                    partner_id = %job.partner_id,
                    error = %err,
                    "auth configuration invalid, request not sent"
                );
                let mut attempt = self.attempt(job, DeliveryStatus::Failed);
                attempt.error_message = Some(format!("auth configuration invalid: {err}"));
                self.ledger.record(attempt).await;
                return Err(DeliveryError::AuthValidation(err));
            }
        };

        let started = Instant::now();
        let sent = self.send(job, &url, headers).await;

        let mut attempt = self.attempt(job, DeliveryStatus::Failed);
        let outcome = match sent {
            Ok(response) => {
                let status = response.status();
                let body = read_snippet(response).await;
                attempt.response_time_ms = started.elapsed().as_millis() as u64;
                let summary = ResponseSummary::new(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or_default(),
                    &body,
                );
                let body_snippet = summary.body_snippet.clone();
                attempt.response = Some(summary);

                if status.is_success() {
                    attempt.status = DeliveryStatus::Success;
                    Ok(DeliveryReport {
                        success: true,
                        status_code: status.as_u16(),
                        response_time_ms: attempt.response_time_ms,
                    })
                } else {
                    let err = DeliveryError::HttpStatus {
                        status: status.as_u16(),
                        body_snippet,
                    };
                    attempt.error_message = Some(err.to_string());
                    Err(err)
                }
            }
            Err(err) => {
                attempt.response_time_ms = started.elapsed().as_millis() as u64;
                let err = DeliveryError::Transport {
                    kind: classify_transport(&err),
                    message: err.to_string(),
                };
                attempt.error_message = Some(err.to_string());
                Err(err)
            }
        };

        match &outcome {
            Ok(report) => tracing::debug!(
                target: "courier::worker",
                lead_id = %job.lead_id,
                partner_id = %job.partner_id,
                status_code = report.status_code,
                response_time_ms = report.response_time_ms,
                "partner accepted webhook"
            ),
            Err(err) => tracing::warn!(
                target: "courier::worker",
                lead_id = %job.lead_id,
                partner_id = %job.partner_id,
                attempt = job.attempt_count,
                error = %err,
                "webhook attempt failed"
            ),
        }

        self.ledger.record(attempt).await;
        outcome
    }
}
