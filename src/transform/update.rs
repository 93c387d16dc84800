//! REST write payloads → storage writes.
//!
//! Create and update share the per-key routing (reserved names, ACL
//! translation, authData expansion, pointer prefixing) but differ in what
//! happens to update operators: an update groups them into storage operator
//! maps, a create flattens them into the initial document.

use serde_json::{Map, Number, Value};

use crate::error::{PlinthError, PlinthResult};
use crate::schema::ClassSchema;
use crate::value::RestValue;

use super::atom::{transform_acl, transform_atom, AtomPosition};
use super::query::{rest_key_is_valid, transform_key};

fn storage_write_key(schema: &ClassSchema, key: &str, value: Option<&Value>) -> String {
    if schema.class_name == "_User" && key == "password" {
        return "_hashed_password".to_string();
    }
    let untyped_pointer = schema.expected_type(key).is_none()
        && value
            .and_then(|v| v.get("__type"))
            .and_then(Value::as_str)
            == Some("Pointer");
    if untyped_pointer {
        return format!("_p_{}", key);
    }
    transform_key(schema, key)
}

fn timestamp_value(key: &str, value: &Value) -> PlinthResult<Value> {
    if let Some(iso) = value.as_str() {
        let parsed = crate::value::parse_iso(iso)?;
        return Ok(RestValue::Date(parsed).to_json());
    }
    match RestValue::from_json(value)? {
        date @ RestValue::Date(_) => Ok(date.to_json()),
        _ => Err(PlinthError::IncorrectType(format!(
            "{} must be a date",
            key
        ))),
    }
}

fn operator_objects<'a>(value: &'a Value, op: &str) -> PlinthResult<&'a Vec<Value>> {
    value.get("objects").and_then(Value::as_array).ok_or_else(|| {
        PlinthError::IncorrectType(format!("{} requires an 'objects' array", op))
    })
}

fn increment_amount(value: &Value) -> PlinthResult<Number> {
    value
        .get("amount")
        .and_then(Value::as_number)
        .cloned()
        .ok_or_else(|| {
            PlinthError::IncorrectType("Increment requires a numeric 'amount'".to_string())
        })
}

fn interior_atoms(objects: &[Value]) -> PlinthResult<Vec<Value>> {
    let mut out = Vec::with_capacity(objects.len());
    for object in objects {
        out.push(transform_atom(object, AtomPosition::Nested)?);
    }
    Ok(out)
}

fn expand_auth_data(
    value: &Value,
    mut on_entry: impl FnMut(String, Option<&Value>) -> PlinthResult<()>,
) -> PlinthResult<()> {
    let providers = value.as_object().ok_or_else(|| {
        PlinthError::IncorrectType("authData must be an object keyed by provider".to_string())
    })?;
    for (provider, data) in providers {
        let column = format!("_auth_data_{}", provider);
        if data.is_null() {
            on_entry(column, None)?;
        } else {
            on_entry(column, Some(data))?;
        }
    }
    Ok(())
}

/// Builds the initial storage document for a create. Update operators are
/// flattened into their resulting values.
pub fn storage_object_for_create(schema: &ClassSchema, object: &Value) -> PlinthResult<Value> {
    let fields = object
        .as_object()
        .ok_or_else(|| PlinthError::IncorrectType("object must be a JSON object".to_string()))?;
    let mut doc = Map::new();
    for (key, value) in fields {
        match key.as_str() {
            "objectId" => {
                let id = value.as_str().ok_or_else(|| {
                    PlinthError::IncorrectType("objectId must be a string".to_string())
                })?;
                doc.insert("_id".to_string(), Value::String(id.to_string()));
            }
            "createdAt" => {
                doc.insert("_created_at".to_string(), timestamp_value(key, value)?);
            }
            "updatedAt" => {
                doc.insert("_updated_at".to_string(), timestamp_value(key, value)?);
            }
            "expiresAt" => {
                doc.insert("_expires_at".to_string(), timestamp_value(key, value)?);
            }
            "sessionToken" => {
                doc.insert("_session_token".to_string(), value.clone());
            }
            "ACL" => {
                let (rperm, wperm) = transform_acl(value)?;
                doc.insert("_rperm".to_string(), Value::from(rperm));
                doc.insert("_wperm".to_string(), Value::from(wperm));
            }
            "authData" => {
                expand_auth_data(value, |column, data| {
                    if let Some(data) = data {
                        doc.insert(column, data.clone());
                    }
                    Ok(())
                })?;
            }
            _ => {
                if !rest_key_is_valid(key) {
                    return Err(PlinthError::InvalidKeyName(format!(
                        "invalid field name '{}'",
                        key
                    )));
                }
                let storage_key = storage_write_key(schema, key, Some(value));
                if let Some(flattened) = flatten_operator(value)? {
                    if let Some(flattened) = flattened {
                        doc.insert(storage_key, flattened);
                    }
                } else {
                    doc.insert(storage_key, transform_atom(value, AtomPosition::TopLevel)?);
                }
            }
        }
    }
    Ok(Value::Object(doc))
}

/// `Ok(None)` means the value is not an operator map. `Ok(Some(None))` means
/// the operator flattens to nothing (`Delete`).
#[allow(clippy::option_option)]
fn flatten_operator(value: &Value) -> PlinthResult<Option<Option<Value>>> {
    let op = match value.get("__op").and_then(Value::as_str) {
        Some(op) => op,
        None => return Ok(None),
    };
    let flattened = match op {
        "Delete" => None,
        "Increment" => Some(Value::Number(increment_amount(value)?)),
        "Add" => Some(Value::Array(interior_atoms(operator_objects(value, op)?)?)),
        "AddUnique" => {
            let atoms = interior_atoms(operator_objects(value, op)?)?;
            let mut unique: Vec<Value> = Vec::with_capacity(atoms.len());
            for atom in atoms {
                if !unique.contains(&atom) {
                    unique.push(atom);
                }
            }
            Some(Value::Array(unique))
        }
        "Remove" => Some(Value::Array(Vec::new())),
        "AddRelation" | "RemoveRelation" | "Batch" => {
            return Err(PlinthError::IncorrectType(format!(
                "{} must target a relation field",
                op
            )))
        }
        other => {
            return Err(PlinthError::IncorrectType(format!(
                "unknown update operator '{}'",
                other
            )))
        }
    };
    Ok(Some(flattened))
}

#[derive(Default)]
struct UpdateGroups {
    set: Map<String, Value>,
    unset: Map<String, Value>,
    inc: Map<String, Value>,
    push: Map<String, Value>,
    add_to_set: Map<String, Value>,
    pull_all: Map<String, Value>,
}

impl UpdateGroups {
    fn into_value(self) -> Value {
        let mut out = Map::new();
        let groups = [
            ("$set", self.set),
            ("$unset", self.unset),
            ("$inc", self.inc),
            ("$push", self.push),
            ("$addToSet", self.add_to_set),
            ("$pullAll", self.pull_all),
        ];
        for (name, group) in groups {
            if !group.is_empty() {
                out.insert(name.to_string(), Value::Object(group));
            }
        }
        Value::Object(out)
    }
}

fn each_wrapper(items: Vec<Value>) -> Value {
    let mut wrapper = Map::new();
    wrapper.insert("$each".to_string(), Value::Array(items));
    Value::Object(wrapper)
}

/// Groups a REST update into storage operator maps.
pub fn transform_update(schema: &ClassSchema, update: &Value) -> PlinthResult<Value> {
    let fields = update
        .as_object()
        .ok_or_else(|| PlinthError::IncorrectType("update must be a JSON object".to_string()))?;
    let mut groups = UpdateGroups::default();
    for (key, value) in fields {
        match key.as_str() {
            "objectId" | "createdAt" => {
                return Err(PlinthError::InvalidKeyName(format!(
                    "{} cannot be updated",
                    key
                )));
            }
            "updatedAt" => {
                groups
                    .set
                    .insert("_updated_at".to_string(), timestamp_value(key, value)?);
            }
            "expiresAt" => {
                groups
                    .set
                    .insert("_expires_at".to_string(), timestamp_value(key, value)?);
            }
            "sessionToken" => {
                groups
                    .set
                    .insert("_session_token".to_string(), value.clone());
            }
            "ACL" => {
                let (rperm, wperm) = transform_acl(value)?;
                groups.set.insert("_rperm".to_string(), Value::from(rperm));
                groups.set.insert("_wperm".to_string(), Value::from(wperm));
            }
            "authData" => {
                expand_auth_data(value, |column, data| {
                    match data {
                        Some(data) => {
                            groups.set.insert(column, data.clone());
                        }
                        None => {
                            groups.unset.insert(column, Value::Bool(true));
                        }
                    }
                    Ok(())
                })?;
            }
            _ => {
                if !rest_key_is_valid(key) {
                    return Err(PlinthError::InvalidKeyName(format!(
                        "invalid field name '{}'",
                        key
                    )));
                }
                let storage_key = storage_write_key(schema, key, Some(value));
                group_key_value(&mut groups, storage_key, value)?;
            }
        }
    }
    Ok(groups.into_value())
}

fn group_key_value(
    groups: &mut UpdateGroups,
    storage_key: String,
    value: &Value,
) -> PlinthResult<()> {
    let op = match value.get("__op").and_then(Value::as_str) {
        Some(op) => op,
        None => {
            groups
                .set
                .insert(storage_key, transform_atom(value, AtomPosition::TopLevel)?);
            return Ok(());
        }
    };
    match op {
        "Delete" => {
            groups.unset.insert(storage_key, Value::Bool(true));
        }
        "Increment" => {
            groups
                .inc
                .insert(storage_key, Value::Number(increment_amount(value)?));
        }
        "Add" => {
            let items = interior_atoms(operator_objects(value, op)?)?;
            groups.push.insert(storage_key, each_wrapper(items));
        }
        "AddUnique" => {
            let items = interior_atoms(operator_objects(value, op)?)?;
            groups.add_to_set.insert(storage_key, each_wrapper(items));
        }
        "Remove" => {
            let items = interior_atoms(operator_objects(value, op)?)?;
            groups.pull_all.insert(storage_key, Value::Array(items));
        }
        "AddRelation" | "RemoveRelation" | "Batch" => {
            return Err(PlinthError::IncorrectType(format!(
                "{} must target a relation field",
                op
            )));
        }
        other => {
            return Err(PlinthError::IncorrectType(format!(
                "unknown update operator '{}'",
                other
            )));
        }
    }
    Ok(())
}

/// Keys in an update whose `Increment` results should be echoed back to the
/// caller after a sanitized update.
pub fn increment_keys(update: &Value) -> Vec<String> {
    update
        .as_object()
        .map(|fields| {
            fields
                .iter()
                .filter(|(_, value)| {
                    value.get("__op").and_then(Value::as_str) == Some("Increment")
                })
                .map(|(key, _)| key.clone())
                .collect()
        })
        .unwrap_or_default()
}
