//! Validated auth schemes.
//!
//! `AuthScheme::parse` is the only place that reads raw config fields. Each
//! variant carries exactly what its kind needs, so the resolver never has to
//! deal with a half-filled config.

use serde_json::{Map, Value};

use crate::domain::AuthError;

/// Supported auth kinds. `as_str` is the canonical wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthKind {
    BearerToken,
    ApiKeyHeader,
    BasicCredentials,
    CustomHeaders,
    QueryParameter,
    OAuth2Bearer,
    FullyCustom,
}

impl AuthKind {
    pub const ALL: [AuthKind; 7] = [
        AuthKind::BearerToken,
        AuthKind::ApiKeyHeader,
        AuthKind::BasicCredentials,
        AuthKind::CustomHeaders,
        AuthKind::QueryParameter,
        AuthKind::OAuth2Bearer,
        AuthKind::FullyCustom,
    ];

    /// Accepts the canonical name and the short alias used by older integrations.
    pub fn parse(auth_type: &str) -> Option<Self> {
        match auth_type.trim().to_ascii_lowercase().as_str() {
            "bearer-token" | "bearer" => Some(AuthKind::BearerToken),
            "api-key-header" | "api_key" => Some(AuthKind::ApiKeyHeader),
            "basic-credentials" | "basic" => Some(AuthKind::BasicCredentials),
            "custom-headers" | "custom_headers" => Some(AuthKind::CustomHeaders),
            "query-parameter" | "query_param" => Some(AuthKind::QueryParameter),
            "oauth2-bearer" | "oauth2" => Some(AuthKind::OAuth2Bearer),
            "fully-custom" | "custom" => Some(AuthKind::FullyCustom),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthKind::BearerToken => "bearer-token",
            AuthKind::ApiKeyHeader => "api-key-header",
            AuthKind::BasicCredentials => "basic-credentials",
            AuthKind::CustomHeaders => "custom-headers",
            AuthKind::QueryParameter => "query-parameter",
            AuthKind::OAuth2Bearer => "oauth2-bearer",
            AuthKind::FullyCustom => "fully-custom",
        }
    }
}

/// Ordered (name, value) pairs.
pub type Pairs = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    Bearer { token: String },
    ApiKey { header_name: String, key: String },
    Basic { username: String, password: String },
    CustomHeaders { headers: Pairs },
    QueryParam { name: String, value: String },
    OAuth2 { access_token: String },
    Custom { headers: Pairs, url_params: Pairs },
}

/// A parsed config: the scheme plus headers merged after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAuth {
    pub scheme: AuthScheme,
    pub additional_headers: Pairs,
}

impl AuthScheme {
    pub fn parse(auth_type: &str, fields: &Map<String, Value>) -> Result<ParsedAuth, AuthError> {
        let kind =
            AuthKind::parse(auth_type).ok_or_else(|| AuthError::UnknownType(auth_type.to_string()))?;
        let name = kind.as_str();

        let scheme = match kind {
            AuthKind::BearerToken => AuthScheme::Bearer {
                token: required_str(name, fields, "token")?,
            },
            AuthKind::ApiKeyHeader => AuthScheme::ApiKey {
                key: required_str(name, fields, "key")?,
                header_name: required_str(name, fields, "header_name")?,
            },
            AuthKind::BasicCredentials => AuthScheme::Basic {
                username: required_str(name, fields, "username")?,
                password: required_str(name, fields, "password")?,
            },
            AuthKind::CustomHeaders => {
                let headers = match fields.get("headers") {
                    None | Some(Value::Null) => {
                        return Err(AuthError::MissingField {
                            auth_type: name,
                            field: "headers",
                        });
                    }
                    Some(value) => string_pairs(value).ok_or(AuthError::InvalidField {
                        auth_type: name,
                        field: "headers",
                        expected: "a map of header names to values",
                    })?,
                };
                AuthScheme::CustomHeaders { headers }
            }
            AuthKind::QueryParameter => AuthScheme::QueryParam {
                name: required_str(name, fields, "param_name")?,
                value: required_str(name, fields, "param_value")?,
            },
            AuthKind::OAuth2Bearer => AuthScheme::OAuth2 {
                access_token: required_str(name, fields, "access_token")?,
            },
            // fully-custom never fails: anything unusable is ignored
            AuthKind::FullyCustom => AuthScheme::Custom {
                headers: fields.get("headers").and_then(string_pairs).unwrap_or_default(),
                url_params: fields
                    .get("url_params")
                    .and_then(string_pairs)
                    .unwrap_or_default(),
            },
        };

        let additional_headers = fields
            .get("additional_headers")
            .and_then(string_pairs)
            .unwrap_or_default();

        Ok(ParsedAuth {
            scheme,
            additional_headers,
        })
    }
}

/// Required non-empty string. Empty counts as missing.
fn required_str(
    auth_type: &'static str,
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<String, AuthError> {
    match fields.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        None | Some(Value::Null) | Some(Value::String(_)) => {
            Err(AuthError::MissingField { auth_type, field })
        }
        Some(_) => Err(AuthError::InvalidField {
            auth_type,
            field,
            expected: "a string",
        }),
    }
}

/// Object of scalars -> pairs. Numbers and booleans are stringified, nulls and
/// nested values skipped. `None` when `value` is not an object.
fn string_pairs(value: &Value) -> Option<Pairs> {
    let Value::Object(map) = value else {
        return None;
    };
    let pairs = map
        .iter()
        .filter_map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((k.clone(), v))
        })
        .collect();
    Some(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn fields(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("test fields must be an object"),
        }
    }

    #[rstest]
    #[case("bearer-token", AuthKind::BearerToken)]
    #[case("bearer", AuthKind::BearerToken)]
    #[case("API-KEY-HEADER", AuthKind::ApiKeyHeader)]
    #[case("api_key", AuthKind::ApiKeyHeader)]
    #[case("basic", AuthKind::BasicCredentials)]
    #[case("custom_headers", AuthKind::CustomHeaders)]
    #[case("query_param", AuthKind::QueryParameter)]
    #[case("oauth2", AuthKind::OAuth2Bearer)]
    #[case("custom", AuthKind::FullyCustom)]
    fn kind_accepts_canonical_and_alias(#[case] raw: &str, #[case] expected: AuthKind) {
        assert_eq!(AuthKind::parse(raw), Some(expected));
    }

    #[test]
    fn canonical_names_round_trip() {
        for kind in AuthKind::ALL {
            assert_eq!(AuthKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn empty_string_counts_as_missing() {
        let err = AuthScheme::parse("bearer-token", &fields(json!({"token": "  "}))).unwrap_err();
        assert_eq!(
            err,
            AuthError::MissingField {
                auth_type: "bearer-token",
                field: "token"
            }
        );
    }

    #[test]
    fn non_string_secret_is_invalid() {
        let err = AuthScheme::parse("oauth2-bearer", &fields(json!({"access_token": 42})))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidField { field: "access_token", .. }));
    }

    #[test]
    fn custom_headers_must_be_a_map() {
        let err = AuthScheme::parse("custom-headers", &fields(json!({"headers": ["a"]})))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidField { field: "headers", .. }));
    }

    #[test]
    fn fully_custom_ignores_garbage() {
        let parsed = AuthScheme::parse(
            "fully-custom",
            &fields(json!({"headers": "nope", "url_params": {"a": 1, "b": null}})),
        )
        .unwrap();
        assert_eq!(
            parsed.scheme,
            AuthScheme::Custom {
                headers: vec![],
                url_params: vec![("a".into(), "1".into())],
            }
        );
    }
}
