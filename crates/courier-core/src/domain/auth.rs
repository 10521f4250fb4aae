//! Declarative auth configuration (wire form).
//!
//! The JSON shape is `{"type": "<kind>", ...fields}`. Fields are kept as a raw
//! JSON map so a config with missing or malformed fields still deserializes;
//! validation happens in `auth::AuthScheme::parse` and yields an error instead
//! of a crash.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names whose values are secrets.
const SECRET_FIELDS: &[&str] = &["token", "key", "password", "access_token", "param_value"];

/// Field names holding header maps (all values treated as secrets).
const HEADER_FIELDS: &[&str] = &["headers", "additional_headers"];

const MASK: &str = "********";

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: String,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl AuthConfig {
    pub fn new(auth_type: impl Into<String>) -> Self {
        Self {
            auth_type: auth_type.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new("bearer-token").with("token", token.into())
    }

    pub fn api_key(header_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new("api-key-header")
            .with("header_name", header_name.into())
            .with("key", key.into())
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new("basic-credentials")
            .with("username", username.into())
            .with("password", password.into())
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Copy with every secret value masked, safe for logs.
    pub fn redacted(&self) -> Self {
        let mut fields = self.fields.clone();
        for (name, value) in fields.iter_mut() {
            if SECRET_FIELDS.contains(&name.as_str()) && !value.is_null() {
                *value = Value::String(MASK.to_string());
            } else if HEADER_FIELDS.contains(&name.as_str())
                && let Value::Object(headers) = value
            {
                for header_value in headers.values_mut() {
                    *header_value = Value::String(MASK.to_string());
                }
            }
        }
        Self {
            auth_type: self.auth_type.clone(),
            fields,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = self.redacted();
        f.debug_struct("AuthConfig")
            .field("auth_type", &redacted.auth_type)
            .field("fields", &redacted.fields)
            .finish()
    }
}
