//! Auth resolution: config -> request headers and URL.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use super::scheme::{AuthScheme, Pairs, ParsedAuth};
use crate::domain::{AuthConfig, AuthError};

/// Headers and URL to use for one request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ResolvedAuth {
    pub headers: BTreeMap<String, String>,
    pub url: String,
}

impl ResolvedAuth {
    fn new(url: &str) -> Self {
        Self {
            headers: BTreeMap::new(),
            url: url.to_string(),
        }
    }

    /// Insert, replacing any existing header with the same name in any case.
    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        self.headers.insert(name.to_string(), value.to_string());
    }

    fn merge_headers(&mut self, pairs: &Pairs) {
        for (name, value) in pairs {
            self.set_header(name, value);
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of `resolve`. Never an error: failures set `valid = false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthResolution {
    pub headers: BTreeMap<String, String>,
    pub url: String,
    pub valid: bool,
    pub error: Option<String>,
}

impl AuthResolution {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Resolve `auth_type` + raw fields against `target_url`.
///
/// On failure headers are empty and the URL is returned untouched.
pub fn resolve(auth_type: &str, fields: &Map<String, Value>, target_url: &str) -> AuthResolution {
    match try_resolve(auth_type, fields, target_url) {
        Ok(resolved) => AuthResolution {
            headers: resolved.headers,
            url: resolved.url,
            valid: true,
            error: None,
        },
        Err(err) => AuthResolution {
            headers: BTreeMap::new(),
            url: target_url.to_string(),
            valid: false,
            error: Some(err.to_string()),
        },
    }
}

/// Same as `resolve` but keeps the typed error.
pub fn try_resolve(
    auth_type: &str,
    fields: &Map<String, Value>,
    target_url: &str,
) -> Result<ResolvedAuth, AuthError> {
    let parsed = AuthScheme::parse(auth_type, fields)?;
    apply(&parsed, target_url)
}

/// Resolve an optional config; no config means no auth data.
pub fn try_resolve_optional(
    config: Option<&AuthConfig>,
    target_url: &str,
) -> Result<ResolvedAuth, AuthError> {
    match config {
        Some(config) => try_resolve(&config.auth_type, &config.fields, target_url),
        None => Ok(ResolvedAuth::new(target_url)),
    }
}

fn apply(parsed: &ParsedAuth, target_url: &str) -> Result<ResolvedAuth, AuthError> {
    let mut out = ResolvedAuth::new(target_url);

    match &parsed.scheme {
        AuthScheme::Bearer { token } => out.set_header("Authorization", &format!("Bearer {token}")),
        AuthScheme::ApiKey { header_name, key } => out.set_header(header_name, key),
        AuthScheme::Basic { username, password } => {
            let encoded = STANDARD.encode(format!("{username}:{password}"));
            out.set_header("Authorization", &format!("Basic {encoded}"));
        }
        AuthScheme::CustomHeaders { headers } => out.merge_headers(headers),
        AuthScheme::QueryParam { name, value } => {
            out.url = with_query_params(target_url, &[(name.clone(), value.clone())])?;
        }
        AuthScheme::OAuth2 { access_token } => {
            out.set_header("Authorization", &format!("Bearer {access_token}"))
        }
        AuthScheme::Custom {
            headers,
            url_params,
        } => {
            out.merge_headers(headers);
            out.url = with_query_params(target_url, url_params)?;
        }
    }

    // additional_headers always win
    out.merge_headers(&parsed.additional_headers);
    Ok(out)
}

/// Set query parameters, replacing existing ones with the same name.
fn with_query_params(target_url: &str, params: &[(String, String)]) -> Result<String, AuthError> {
    if params.is_empty() {
        return Ok(target_url.to_string());
    }

    let mut url = Url::parse(target_url).map_err(|e| AuthError::InvalidUrl {
        url: target_url.to_string(),
        reason: e.to_string(),
    })?;

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !params.iter().any(|(name, _)| name == k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in &retained {
            query.append_pair(k, v);
        }
        for (k, v) in params {
            query.append_pair(k, v);
        }
    }

    Ok(url.to_string())
}
