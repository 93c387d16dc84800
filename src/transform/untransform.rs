//! Storage document → REST object.
//!
//! The exact inverse of the write path: reserved columns regain their REST
//! names, permission vectors fold back into an ACL map, pointer tokens are
//! rebuilt into tagged objects and checked against the schema, and
//! per-provider auth columns merge into one `authData` map. Private columns
//! with no REST counterpart are dropped rather than leaked.

use serde_json::{Map, Value};

use crate::error::{PlinthError, PlinthResult};
use crate::schema::{ClassSchema, FieldType};

use super::atom::{split_pointer_token, untransform_acl};

fn plain_iso(value: &Value) -> Value {
    match value.get("iso").and_then(Value::as_str) {
        Some(iso) => Value::String(iso.to_string()),
        None => value.clone(),
    }
}

fn pointer_from_token(
    schema: &ClassSchema,
    field: &str,
    token: &Value,
) -> PlinthResult<Value> {
    let token = token.as_str().ok_or_else(|| {
        PlinthError::IncorrectType(format!(
            "stored pointer for '{}' is not a string token",
            field
        ))
    })?;
    let (class_name, object_id) = split_pointer_token(token).ok_or_else(|| {
        PlinthError::IncorrectType(format!(
            "stored pointer for '{}' is malformed: '{}'",
            field, token
        ))
    })?;
    if let Some(FieldType::Pointer { target_class }) = schema.expected_type(field) {
        if class_name != target_class {
            return Err(PlinthError::IncorrectType(format!(
                "pointer for '{}' references class {} but the schema expects {}",
                field, class_name, target_class
            )));
        }
    }
    Ok(serde_json::json!({
        "__type": "Pointer",
        "className": class_name,
        "objectId": object_id,
    }))
}

/// Rebuilds the REST form of one stored document.
pub fn untransform_object(schema: &ClassSchema, doc: &Value) -> PlinthResult<Value> {
    let stored = doc.as_object().ok_or_else(|| {
        PlinthError::Serialization("stored document is not an object".to_string())
    })?;
    let mut rest = Map::new();
    let mut auth_data = Map::new();
    for (key, value) in stored {
        match key.as_str() {
            "_id" => {
                rest.insert("objectId".to_string(), value.clone());
            }
            "_created_at" => {
                rest.insert("createdAt".to_string(), plain_iso(value));
            }
            "_updated_at" => {
                rest.insert("updatedAt".to_string(), plain_iso(value));
            }
            "_session_token" => {
                rest.insert("sessionToken".to_string(), value.clone());
            }
            "_expires_at" => {
                rest.insert("expiresAt".to_string(), value.clone());
            }
            "_hashed_password" => {
                rest.insert("password".to_string(), value.clone());
            }
            "_rperm" | "_wperm" => {}
            _ => {
                if let Some(provider) = key.strip_prefix("_auth_data_") {
                    auth_data.insert(provider.to_string(), value.clone());
                } else if let Some(field) = key.strip_prefix("_p_") {
                    rest.insert(field.to_string(), pointer_from_token(schema, field, value)?);
                } else if key.starts_with('_') {
                    // Private column with no REST counterpart.
                } else {
                    rest.insert(key.clone(), value.clone());
                }
            }
        }
    }
    if !auth_data.is_empty() {
        rest.insert("authData".to_string(), Value::Object(auth_data));
    }
    if let Some(acl) = untransform_acl(stored.get("_rperm"), stored.get("_wperm")) {
        rest.insert("ACL".to_string(), acl);
    }
    for (field, field_type) in &schema.fields {
        if let FieldType::Relation { target_class } = field_type {
            rest.insert(
                field.clone(),
                serde_json::json!({"__type": "Relation", "className": target_class}),
            );
        }
    }
    Ok(Value::Object(rest))
}
