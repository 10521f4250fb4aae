//! Shared HTTP client construction and transport error classification.

use std::error::Error as _;

use reqwest::{Client, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::auth::ResolvedAuth;
use crate::config::HttpConfig;
use crate::domain::{AuthError, RESPONSE_SNIPPET_LIMIT, TransportErrorKind, truncate_snippet};

/// Client used for partner deliveries. Redirects are not followed: a partner
/// endpoint answering 3xx is a failed delivery, not a hop to somewhere else.
pub fn build_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(config.timeout())
        .user_agent(config.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// `content-type` first, then the resolved auth headers (which may override it).
pub fn request_headers(content_type: &str, auth: &ResolvedAuth) -> Result<HeaderMap, AuthError> {
    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(content_type).map_err(|_| AuthError::InvalidHeader {
        name: CONTENT_TYPE.to_string(),
    })?;
    headers.insert(CONTENT_TYPE, content_type);

    for (name, value) in &auth.headers {
        let invalid = || AuthError::InvalidHeader { name: name.clone() };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// Body snippet of a partner response. Stops downloading once the snippet is full.
///
/// A body that fails mid-read keeps what arrived so far.
pub async fn read_snippet(mut response: Response) -> String {
    // utf-8 は 1 文字最大 4 bytes
    let cap = RESPONSE_SNIPPET_LIMIT * 4;
    let mut buf: Vec<u8> = Vec::new();
    while buf.len() < cap {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) | Err(_) => break,
        }
    }
    buf.truncate(cap);
    truncate_snippet(&String::from_utf8_lossy(&buf))
}

/// Map a reqwest error onto a user-facing category.
pub fn classify_transport(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }

    // reqwest does not expose DNS/TLS/refused as flags; walk the source chain.
    let chain = error_chain(err).to_ascii_lowercase();
    if chain.contains("dns") || chain.contains("failed to lookup") || chain.contains("resolve") {
        TransportErrorKind::Dns
    } else if chain.contains("connection refused") {
        TransportErrorKind::ConnectionRefused
    } else if chain.contains("certificate") || chain.contains("tls") || chain.contains("ssl") {
        TransportErrorKind::Tls
    } else if err.is_connect() {
        TransportErrorKind::ConnectionRefused
    } else {
        TransportErrorKind::Other
    }
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_config(timeout_secs: u64) -> HttpConfig {
        HttpConfig {
            timeout_secs,
            user_agent: "courier-test".to_string(),
        }
    }

    async fn snippet_of(body: String) -> String {
        use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        let response = build_client(&http_config(5))
            .unwrap()
            .get(server.uri())
            .send()
            .await
            .unwrap();
        read_snippet(response).await
    }

    #[tokio::test]
    async fn large_body_is_cut_to_snippet() {
        let snippet = snippet_of("x".repeat(2 * 1024 * 1024)).await;
        assert_eq!(snippet.len(), RESPONSE_SNIPPET_LIMIT);
    }

    #[tokio::test]
    async fn multibyte_body_is_cut_on_char_boundary() {
        let snippet = snippet_of("é".repeat(RESPONSE_SNIPPET_LIMIT * 3)).await;
        assert_eq!(snippet.chars().count(), RESPONSE_SNIPPET_LIMIT);
        assert!(snippet.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn short_body_is_kept_whole() {
        assert_eq!(snippet_of("accepted".to_string()).await, "accepted");
    }

    #[test]
    fn auth_headers_override_content_type() {
        let mut auth = ResolvedAuth::default();
        auth.headers.insert("Content-Type".into(), "application/xml".into());
        auth.headers.insert("X-Api-Key".into(), "k".into());

        let headers = request_headers("application/json", &auth).unwrap();
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/xml");
        assert_eq!(headers.get("x-api-key").unwrap(), "k");
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn invalid_header_name_is_an_auth_error() {
        let mut auth = ResolvedAuth::default();
        auth.headers.insert("X Bad Header".into(), "v".into());

        let err = request_headers("application/json", &auth).unwrap_err();
        assert_eq!(
            err,
            AuthError::InvalidHeader {
                name: "X Bad Header".into()
            }
        );
    }

    #[tokio::test]
    async fn refused_connection_is_classified() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = build_client(&http_config(5)).unwrap();
        let err = client
            .post(format!("http://127.0.0.1:{port}/hook"))
            .send()
            .await
            .unwrap_err();

        assert_eq!(classify_transport(&err), TransportErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn unknown_host_is_dns() {
        let client = build_client(&http_config(5)).unwrap();
        let err = client
            .post("http://courier-test.invalid/hook")
            .send()
            .await
            .unwrap_err();

        assert_eq!(classify_transport(&err), TransportErrorKind::Dns);
    }
}
