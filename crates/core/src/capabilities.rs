//! Node capability sets and request requirement matching.
//!
//! A node declares capabilities as a JSON object of named boolean flags
//! (`{"git": true, "node": true, "python": false}`). An execution request
//! may list capability names it requires; it is only offered to nodes whose
//! flags are `true` for every required name.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::CoreError;

/// Maximum number of capability flags a node may declare.
const MAX_CAPABILITIES: usize = 32;

/// Maximum length of a capability name.
const MAX_CAPABILITY_LEN: usize = 64;

/// Validate a single capability name.
///
/// Names are lowercase ASCII alphanumerics plus hyphen, underscore, and dot.
pub fn validate_capability_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Capability name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_CAPABILITY_LEN {
        return Err(CoreError::Validation(format!(
            "Capability name must not exceed {MAX_CAPABILITY_LEN} characters"
        )));
    }
    if !name.chars().all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' || c == '.'
    }) {
        return Err(CoreError::Validation(format!(
            "Capability \"{name}\" may only contain lowercase letters, digits, '-', '_' or '.'"
        )));
    }
    Ok(())
}

/// Validate a node's declared capability object.
///
/// `Null` is accepted and treated as "no capabilities".
pub fn validate_capability_set(value: &Value) -> Result<(), CoreError> {
    let map = match value {
        Value::Null => return Ok(()),
        Value::Object(map) => map,
        _ => {
            return Err(CoreError::Validation(
                "Capabilities must be an object of boolean flags".to_string(),
            ))
        }
    };
    if map.len() > MAX_CAPABILITIES {
        return Err(CoreError::Validation(format!(
            "A node may declare at most {MAX_CAPABILITIES} capabilities"
        )));
    }
    for (name, flag) in map {
        validate_capability_name(name)?;
        if !flag.is_boolean() {
            return Err(CoreError::Validation(format!(
                "Capability \"{name}\" must be a boolean"
            )));
        }
    }
    Ok(())
}

/// Validate a request's list of required capability names.
pub fn validate_requirements(required: &[String]) -> Result<(), CoreError> {
    if required.len() > MAX_CAPABILITIES {
        return Err(CoreError::Validation(format!(
            "A request may require at most {MAX_CAPABILITIES} capabilities"
        )));
    }
    let mut seen = HashSet::with_capacity(required.len());
    for name in required {
        validate_capability_name(name)?;
        if !seen.insert(name.as_str()) {
            return Err(CoreError::Validation(format!(
                "Duplicate required capability: \"{name}\""
            )));
        }
    }
    Ok(())
}

/// Normalise a capability value into an object (treating `Null` as empty).
pub fn normalize(value: Option<Value>) -> Value {
    match value {
        Some(Value::Object(map)) => Value::Object(map),
        _ => Value::Object(Map::new()),
    }
}

/// Names of the capabilities whose flag is `true`, sorted.
pub fn enabled_capabilities(value: &Value) -> Vec<String> {
    let mut names: Vec<String> = value
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(_, flag)| flag.as_bool() == Some(true))
                .map(|(name, _)| name.clone())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Whether a node with the `enabled` capability names satisfies `required`.
///
/// An empty requirement list is satisfied by every node.
pub fn satisfies(enabled: &[String], required: &[String]) -> bool {
    required.iter().all(|req| enabled.iter().any(|e| e == req))
}

/// Parse a stored JSON array of required capability names.
///
/// Non-string entries are ignored; anything but an array yields no
/// requirements.
pub fn requirements_from_value(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn enabled_capabilities_skip_false_flags() {
        let caps = json!({"git": true, "python": false, "node": true});
        assert_eq!(enabled_capabilities(&caps), vec!["git", "node"]);
    }

    #[test]
    fn enabled_capabilities_of_non_object_is_empty() {
        assert!(enabled_capabilities(&json!(null)).is_empty());
        assert!(enabled_capabilities(&json!(["git"])).is_empty());
    }

    #[test]
    fn empty_requirements_always_satisfied() {
        assert!(satisfies(&[], &[]));
        assert!(satisfies(&["git".to_string()], &[]));
    }

    #[test]
    fn missing_requirement_not_satisfied() {
        let enabled = vec!["git".to_string()];
        let required = vec!["git".to_string(), "docker".to_string()];
        assert!(!satisfies(&enabled, &required));
    }

    #[test]
    fn capability_set_must_be_boolean_object() {
        assert!(validate_capability_set(&json!({"git": true})).is_ok());
        assert!(validate_capability_set(&json!(null)).is_ok());
        assert!(validate_capability_set(&json!({"git": "yes"})).is_err());
        assert!(validate_capability_set(&json!(["git"])).is_err());
        assert!(validate_capability_set(&json!({"Git": true})).is_err());
    }

    #[test]
    fn duplicate_requirement_rejected() {
        let required = vec!["git".to_string(), "git".to_string()];
        assert!(validate_requirements(&required).is_err());
    }

    #[test]
    fn requirements_parse_from_json_array() {
        let value = json!(["git", 3, "node"]);
        assert_eq!(requirements_from_value(&value), vec!["git", "node"]);
        assert!(requirements_from_value(&json!({})).is_empty());
    }

    #[test]
    fn normalize_replaces_null_with_empty_object() {
        assert_eq!(normalize(None), json!({}));
        assert_eq!(normalize(Some(json!(null))), json!({}));
        assert_eq!(normalize(Some(json!({"git": true}))), json!({"git": true}));
    }
}
