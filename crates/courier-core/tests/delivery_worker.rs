use std::sync::Arc;

use courier_core::config::HttpConfig;
use courier_core::domain::{AuthConfig, DeliveryError, DeliveryStatus, WebhookJob};
use courier_core::impls::MemoryLedger;
use courier_core::ports::{DeliveryLedger, JobProcessor};
use courier_core::DeliveryWorker;
use serde_json::json;
use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn worker(ledger: &Arc<MemoryLedger>) -> DeliveryWorker {
    let config = HttpConfig {
        timeout_secs: 5,
        user_agent: "courier-test".to_string(),
    };
    let ledger: Arc<dyn DeliveryLedger> = Arc::clone(ledger) as Arc<dyn DeliveryLedger>;
    DeliveryWorker::from_config(&config, ledger).unwrap()
}

fn job(server: &MockServer) -> WebhookJob {
    WebhookJob::new(
        "lead-1",
        "partner-1",
        format!("{}/hooks/lead", server.uri()),
        json!({"name": "Ada", "phone": "555-0100"}),
    )
}

#[tokio::test]
async fn delivers_with_resolved_auth_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/lead"))
        .and(header("authorization", "Bearer tok-123"))
        .and(header("content-type", "application/json"))
        .and(header("user-agent", "courier-test"))
        .and(body_json(json!({"name": "Ada", "phone": "555-0100"})))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .expect(1)
        .mount(&server)
        .await;

    let ledger = Arc::new(MemoryLedger::new());
    let report = worker(&ledger)
        .process(&job(&server).with_auth(AuthConfig::bearer("tok-123")))
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.status_code, 201);

    let record = ledger.get("lead-1", "partner-1").unwrap();
    assert_eq!(record.status, DeliveryStatus::Success);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.response_code, Some(201));
    assert_eq!(record.response_status.as_deref(), Some("Created"));
    assert_eq!(record.response_body_snippet.as_deref(), Some("created"));
    assert_eq!(record.error_message, None);
}

#[tokio::test]
async fn server_error_is_recorded_and_retriable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let ledger = Arc::new(MemoryLedger::new());
    let err = worker(&ledger).process(&job(&server)).await.unwrap_err();

    assert_eq!(
        err,
        DeliveryError::HttpStatus {
            status: 500,
            body_snippet: "upstream down".into()
        }
    );
    assert!(err.is_retriable());

    let record = ledger.get("lead-1", "partner-1").unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.response_code, Some(500));
    assert_eq!(record.response_body_snippet.as_deref(), Some("upstream down"));
    assert_eq!(record.error_message.as_deref(), Some("endpoint responded with HTTP 500"));
}

#[tokio::test]
async fn broken_auth_config_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let ledger = Arc::new(MemoryLedger::new());
    let broken = AuthConfig::new("api-key-header").with("key", "k-1");
    let err = worker(&ledger)
        .process(&job(&server).with_auth(broken))
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::AuthValidation(_)));
    assert!(!err.is_retriable());

    let record = ledger.get("lead-1", "partner-1").unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.response_code, None);
    assert!(
        record
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("header_name"))
    );
}

#[tokio::test]
async fn query_parameter_auth_rewrites_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/lead"))
        .and(query_param("api_token", "q-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let ledger = Arc::new(MemoryLedger::new());
    let auth = AuthConfig::new("query-parameter")
        .with("param_name", "api_token")
        .with("param_value", "q-1");
    worker(&ledger)
        .process(&job(&server).with_auth(auth))
        .await
        .unwrap();

    // the stored target is the configured one, without the secret
    let record = ledger.get("lead-1", "partner-1").unwrap();
    assert!(!record.target_url.contains("q-1"));
}

#[tokio::test]
async fn string_payload_with_custom_content_type_is_sent_raw() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("name=Ada&phone=555-0100"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let ledger = Arc::new(MemoryLedger::new());
    let mut job = job(&server).with_content_type("application/x-www-form-urlencoded");
    job.payload = json!("name=Ada&phone=555-0100");

    worker(&ledger).process(&job).await.unwrap();
}

#[tokio::test]
async fn redirects_are_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/lead"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/elsewhere"))
        .mount(&server)
        .await;
    Mock::given(path("/elsewhere"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let ledger = Arc::new(MemoryLedger::new());
    let err = worker(&ledger).process(&job(&server)).await.unwrap_err();
    assert!(matches!(err, DeliveryError::HttpStatus { status: 302, .. }));
}

#[tokio::test]
async fn oversized_error_body_is_recorded_as_snippet() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("e".repeat(512 * 1024)))
        .mount(&server)
        .await;

    let ledger = Arc::new(MemoryLedger::new());
    let err = worker(&ledger).process(&job(&server)).await.unwrap_err();
    assert!(matches!(
        &err,
        DeliveryError::HttpStatus { status: 502, body_snippet } if body_snippet.len() == 1000
    ));

    let record = ledger.get("lead-1", "partner-1").unwrap();
    assert_eq!(record.response_body_snippet.map(|s| s.len()), Some(1000));
}
