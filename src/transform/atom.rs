//! Value-level REST ↔ storage conversion.
//!
//! Storage keeps the tagged encodings for dates, binary blobs, geo points
//! and files, so most atoms pass through unchanged. The two asymmetries are
//! pointers, which collapse to a single `<class>$<id>` token at the top
//! level of a field, and ACLs, which become a pair of permission vectors.

use serde_json::{Map, Value};

use crate::error::{PlinthError, PlinthResult};
use crate::value::RestValue;

/// Where a value sits relative to its field. Only a top-level pointer
/// collapses to the token form; inside arrays and nested objects it stays a
/// tagged object so the shape remains self-describing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomPosition {
    TopLevel,
    Nested,
}

/// Converts one decoded REST value to its storage form.
pub fn storage_value(value: &RestValue, position: AtomPosition) -> PlinthResult<Value> {
    match value {
        RestValue::Pointer {
            class_name,
            object_id,
        } if position == AtomPosition::TopLevel => {
            Ok(Value::String(format!("{}${}", class_name, object_id)))
        }
        RestValue::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(storage_value(item, AtomPosition::Nested)?);
            }
            Ok(Value::Array(out))
        }
        RestValue::Object(map) => {
            let mut out = Map::new();
            for (key, item) in map {
                if key.contains('$') || key.contains('.') {
                    return Err(PlinthError::InvalidNestedKey(format!(
                        "nested key '{}' contains '$' or '.'",
                        key
                    )));
                }
                out.insert(key.clone(), storage_value(item, AtomPosition::Nested)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.to_json()),
    }
}

/// Decodes raw REST JSON and converts it in one step.
pub fn transform_atom(value: &Value, position: AtomPosition) -> PlinthResult<Value> {
    let decoded = RestValue::from_json(value)?;
    storage_value(&decoded, position)
}

/// Splits a `<class>$<id>` storage token.
pub fn split_pointer_token(token: &str) -> Option<(&str, &str)> {
    token.split_once('$')
}

/// Translates a REST ACL map into read and write permission vectors.
///
/// Each entry must be `{"read": true}` / `{"write": true}` style with only
/// boolean `true` grants; anything else is a malformed ACL.
pub fn transform_acl(acl: &Value) -> PlinthResult<(Vec<String>, Vec<String>)> {
    let entries = acl
        .as_object()
        .ok_or_else(|| PlinthError::IncorrectType("ACL must be an object".to_string()))?;
    let mut rperm = Vec::new();
    let mut wperm = Vec::new();
    for (grantee, grants) in entries {
        let grants = grants.as_object().ok_or_else(|| {
            PlinthError::IncorrectType(format!("ACL entry for '{}' must be an object", grantee))
        })?;
        for (grant, allowed) in grants {
            match (grant.as_str(), allowed) {
                ("read", Value::Bool(true)) => rperm.push(grantee.clone()),
                ("write", Value::Bool(true)) => wperm.push(grantee.clone()),
                ("read", Value::Bool(false)) | ("write", Value::Bool(false)) => {}
                _ => {
                    return Err(PlinthError::IncorrectType(format!(
                        "ACL entry for '{}' has an invalid '{}' grant",
                        grantee, grant
                    )))
                }
            }
        }
    }
    Ok((rperm, wperm))
}

/// Rebuilds the REST ACL map from stored permission vectors.
pub fn untransform_acl(rperm: Option<&Value>, wperm: Option<&Value>) -> Option<Value> {
    let mut acl: Map<String, Value> = Map::new();
    let mut grant = |vector: Option<&Value>, grant_name: &str| {
        if let Some(grantees) = vector.and_then(Value::as_array) {
            for grantee in grantees.iter().filter_map(Value::as_str) {
                let entry = acl
                    .entry(grantee.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(entry) = entry.as_object_mut() {
                    entry.insert(grant_name.to_string(), Value::Bool(true));
                }
            }
        }
    };
    grant(rperm, "read");
    grant(wperm, "write");
    if acl.is_empty() {
        None
    } else {
        Some(Value::Object(acl))
    }
}
