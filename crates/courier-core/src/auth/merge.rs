//! Merging a partial auth config update into the stored one.
//!
//! The configuration UI never echoes secrets back, so an update arrives with
//! blank secret fields. Blank fields must keep the stored value.

use serde_json::Value;

use super::scheme::AuthKind;
use crate::domain::AuthConfig;

/// Merge `incoming` over `existing`, keeping stored values wherever the
/// incoming field is null or an empty string.
///
/// A change of auth kind replaces the stored config entirely.
pub fn merge_secrets(existing: Option<&AuthConfig>, incoming: AuthConfig) -> AuthConfig {
    let Some(existing) = existing else {
        return incoming;
    };
    if !same_kind(&existing.auth_type, &incoming.auth_type) {
        return incoming;
    }

    let mut merged = existing.clone();
    merged.auth_type = incoming.auth_type;
    for (name, value) in incoming.fields {
        match merged.fields.get_mut(&name) {
            Some(current) => merge_value(current, value),
            None if !is_blank(&value) => {
                merged.fields.insert(name, value);
            }
            None => {}
        }
    }
    merged
}

fn same_kind(a: &str, b: &str) -> bool {
    match (AuthKind::parse(a), AuthKind::parse(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

fn merge_value(current: &mut Value, incoming: Value) {
    if is_blank(&incoming) {
        return;
    }
    match (current, incoming) {
        (Value::Object(current), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match current.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None if !is_blank(&value) => {
                        current.insert(key, value);
                    }
                    None => {}
                }
            }
        }
        (current, incoming) => *current = incoming,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
