//! Live credential check against a partner endpoint.

use std::time::Instant;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use super::classify::{AuthTestVerdict, classify_auth_test};
use super::resolver::try_resolve;
use crate::domain::{AuthConfig, AuthError, DEFAULT_CONTENT_TYPE};
use crate::http::{classify_transport, request_headers};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthTestResult {
    pub verdict: AuthTestVerdict,
    /// `None` when no response arrived.
    pub status_code: Option<u16>,
    pub auth_valid: Option<bool>,
    pub message: String,
    pub response_time_ms: u64,
}

pub struct AuthProbe {
    client: Client,
}

impl AuthProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// POST `sample` to `target_url` with the resolved credentials.
    ///
    /// An unusable config is returned as `Err` before any request is made.
    pub async fn test(
        &self,
        config: &AuthConfig,
        target_url: &str,
        sample: &Value,
    ) -> Result<AuthTestResult, AuthError> {
        let resolved = try_resolve(&config.auth_type, &config.fields, target_url)?;
        let headers = request_headers(DEFAULT_CONTENT_TYPE, &resolved)?;

        tracing::debug!(
            target: "courier::auth",
            auth_type = %config.auth_type,
            url = %target_url,
            "probing partner credentials"
        );

        let started = Instant::now();
        let sent = self
            .client
            .post(&resolved.url)
            .headers(headers)
            .json(sample)
            .send()
            .await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let result = match sent {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let verdict = classify_auth_test(status_code);
                AuthTestResult {
                    verdict,
                    status_code: Some(status_code),
                    auth_valid: verdict.auth_valid(),
                    message: verdict.message(status_code),
                    response_time_ms,
                }
            }
            Err(err) => AuthTestResult {
                verdict: AuthTestVerdict::Inconclusive,
                status_code: None,
                auth_valid: None,
                message: format!("{}: {err}", classify_transport(&err).describe()),
                response_time_ms,
            },
        };
        Ok(result)
    }
}
