//! REST query → storage query translation.
//!
//! Rewrites key names (reserved pseudo-fields, pointer prefixes, authData
//! lookups), lowers `$or`/`$and` recursively, and converts every constraint
//! operand through the atom codec. The output only ever contains keys and
//! operators the bundled matcher understands.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{PlinthError, PlinthResult};
use crate::schema::{ClassSchema, FieldType};

use super::atom::{transform_atom, AtomPosition};

static QUERY_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_.]*$").expect("valid query key regex"));

static REGEX_OPTIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[imxs]*$").expect("valid regex options regex"));

/// Miles and kilometers per radian of arc on the reference sphere, used to
/// normalize the `$maxDistance` unit variants.
const EARTH_RADIUS_MILES: f64 = 3958.8;
const EARTH_RADIUS_KILOMETERS: f64 = 6371.0;

/// REST key shape shared by queries and write payloads: leading letter,
/// then letters, digits, underscores and dots.
pub(super) fn rest_key_is_valid(key: &str) -> bool {
    QUERY_KEY_RE.is_match(key)
}

/// Maps one REST key to its storage column. Used for query keys and sort
/// keys alike; pointer-typed fields pick up the `_p_` prefix.
pub fn transform_key(schema: &ClassSchema, key: &str) -> String {
    match key {
        "objectId" | "_id" => "_id".to_string(),
        "createdAt" | "_created_at" => "_created_at".to_string(),
        "updatedAt" | "_updated_at" => "_updated_at".to_string(),
        "sessionToken" | "_session_token" => "_session_token".to_string(),
        "expiresAt" | "_expires_at" => "_expires_at".to_string(),
        _ => match schema.expected_type(key) {
            Some(FieldType::Pointer { .. }) => format!("_p_{}", key),
            _ => key.to_string(),
        },
    }
}

fn is_constraint_map(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.keys().any(|k| k.starts_with('$')))
        .unwrap_or(false)
}

/// Translates a whole REST `where` clause.
pub fn transform_where(schema: &ClassSchema, query: &Value) -> PlinthResult<Value> {
    let clauses = query
        .as_object()
        .ok_or_else(|| PlinthError::IncorrectType("query must be an object".to_string()))?;
    let mut out = Map::new();
    for (key, value) in clauses {
        match key.as_str() {
            "$or" | "$and" => {
                let branches = value.as_array().ok_or_else(|| {
                    PlinthError::IncorrectType(format!("{} requires an array of queries", key))
                })?;
                let mut transformed = Vec::with_capacity(branches.len());
                for branch in branches {
                    transformed.push(transform_where(schema, branch)?);
                }
                out.insert(key.clone(), Value::Array(transformed));
            }
            _ => {
                let (storage_key, storage_value) = transform_query_key_value(schema, key, value)?;
                out.insert(storage_key, storage_value);
            }
        }
    }
    Ok(Value::Object(out))
}

fn transform_query_key_value(
    schema: &ClassSchema,
    key: &str,
    value: &Value,
) -> PlinthResult<(String, Value)> {
    if key == "ACL" {
        return Err(PlinthError::InvalidKeyName(
            "Cannot query on ACL.".to_string(),
        ));
    }
    if key == "_rperm" || key == "_wperm" {
        // Injected by the access-control layer, already storage-shaped.
        return Ok((key.to_string(), value.clone()));
    }
    if let Some(rest) = key.strip_prefix("authData.") {
        // Only the per-provider id is queryable.
        let mut parts = rest.splitn(2, '.');
        let provider = parts.next().unwrap_or_default();
        let tail = parts.next();
        if provider.is_empty() || tail != Some("id") {
            return Err(PlinthError::InvalidKeyName(format!(
                "queries on authData must use authData.<provider>.id, got '{}'",
                key
            )));
        }
        let storage_key = format!("_auth_data_{}.id", provider);
        let storage_value = transform_constraint_or_atom(value)?;
        return Ok((storage_key, storage_value));
    }
    if !QUERY_KEY_RE.is_match(key) {
        return Err(PlinthError::InvalidKeyName(format!(
            "invalid query key '{}'",
            key
        )));
    }

    let expected = schema.expected_type(key);
    let queries_untyped_pointer = expected.is_none()
        && value.get("__type").and_then(Value::as_str) == Some("Pointer");
    let storage_key = if queries_untyped_pointer {
        format!("_p_{}", key)
    } else {
        transform_key(schema, key)
    };

    let storage_value = match storage_key.as_str() {
        "_created_at" | "_updated_at" | "_expires_at" => transform_date_constraint(value)?,
        _ => transform_constraint_or_atom(value)?,
    };
    Ok((storage_key, storage_value))
}

fn transform_constraint_or_atom(value: &Value) -> PlinthResult<Value> {
    if is_constraint_map(value) {
        transform_constraint(value)
    } else {
        transform_atom(value, AtomPosition::TopLevel)
    }
}

/// Reserved timestamp columns accept plain ISO strings in queries but are
/// stored as tagged dates.
fn transform_date_constraint(value: &Value) -> PlinthResult<Value> {
    if is_constraint_map(value) {
        let ops = value.as_object().ok_or_else(|| {
            PlinthError::IncorrectType("constraint must be an object".to_string())
        })?;
        let mut out = Map::new();
        for (op, operand) in ops {
            match op.as_str() {
                "$lt" | "$lte" | "$gt" | "$gte" | "$eq" | "$ne" => {
                    out.insert(op.clone(), date_operand(operand)?);
                }
                _ => {
                    let rewritten = transform_constraint(
                        &Value::Object(Map::from_iter([(op.clone(), operand.clone())])),
                    )?;
                    if let Value::Object(rewritten) = rewritten {
                        out.extend(rewritten);
                    }
                }
            }
        }
        Ok(Value::Object(out))
    } else {
        date_operand(value)
    }
}

fn date_operand(value: &Value) -> PlinthResult<Value> {
    if let Some(iso) = value.as_str() {
        let parsed = crate::value::parse_iso(iso)?;
        return Ok(crate::value::RestValue::Date(parsed).to_json());
    }
    transform_atom(value, AtomPosition::TopLevel)
}

fn transform_constraint(constraint: &Value) -> PlinthResult<Value> {
    let ops = constraint
        .as_object()
        .ok_or_else(|| PlinthError::IncorrectType("constraint must be an object".to_string()))?;
    let mut out = Map::new();
    for (op, operand) in ops {
        match op.as_str() {
            "$lt" | "$lte" | "$gt" | "$gte" | "$eq" | "$ne" => {
                out.insert(op.clone(), transform_atom(operand, AtomPosition::TopLevel)?);
            }
            "$in" | "$nin" | "$all" => {
                let items = operand.as_array().ok_or_else(|| {
                    PlinthError::IncorrectType(format!("{} requires an array operand", op))
                })?;
                let mut transformed = Vec::with_capacity(items.len());
                for item in items {
                    transformed.push(transform_atom(item, AtomPosition::TopLevel)?);
                }
                out.insert(op.clone(), Value::Array(transformed));
            }
            "$exists" => {
                if !operand.is_boolean() {
                    return Err(PlinthError::IncorrectType(
                        "$exists requires a boolean operand".to_string(),
                    ));
                }
                out.insert(op.clone(), operand.clone());
            }
            "$regex" => {
                if !operand.is_string() {
                    return Err(PlinthError::IncorrectType(
                        "$regex requires a string operand".to_string(),
                    ));
                }
                out.insert(op.clone(), operand.clone());
            }
            "$options" => {
                let options = operand.as_str().ok_or_else(|| {
                    PlinthError::IncorrectType("$options requires a string operand".to_string())
                })?;
                if !REGEX_OPTIONS_RE.is_match(options) {
                    return Err(PlinthError::IncorrectType(format!(
                        "bad $options value '{}'",
                        options
                    )));
                }
                out.insert(op.clone(), operand.clone());
            }
            "$nearSphere" => {
                out.insert(op.clone(), geo_operand(operand, op)?);
            }
            "$maxDistance" | "$maxDistanceInRadians" => {
                out.insert("$maxDistance".to_string(), distance_operand(operand, 1.0)?);
            }
            "$maxDistanceInMiles" => {
                out.insert(
                    "$maxDistance".to_string(),
                    distance_operand(operand, EARTH_RADIUS_MILES)?,
                );
            }
            "$maxDistanceInKilometers" => {
                out.insert(
                    "$maxDistance".to_string(),
                    distance_operand(operand, EARTH_RADIUS_KILOMETERS)?,
                );
            }
            "$within" => {
                let corners = operand
                    .get("$box")
                    .and_then(Value::as_array)
                    .filter(|corners| corners.len() == 2)
                    .ok_or_else(|| {
                        PlinthError::IncorrectType(
                            "$within requires a $box with exactly two GeoPoints".to_string(),
                        )
                    })?;
                let bottom_left = geo_operand(&corners[0], "$box")?;
                let top_right = geo_operand(&corners[1], "$box")?;
                let mut wrapper = Map::new();
                wrapper.insert(
                    "$box".to_string(),
                    Value::Array(vec![bottom_left, top_right]),
                );
                out.insert(op.clone(), Value::Object(wrapper));
            }
            "$select" | "$dontSelect" => {
                return Err(PlinthError::CommandUnavailable(format!(
                    "the {} operator is not supported",
                    op
                )));
            }
            other => {
                return Err(PlinthError::InvalidKeyName(format!(
                    "invalid operator '{}' in query constraint",
                    other
                )));
            }
        }
    }
    Ok(Value::Object(out))
}

fn geo_operand(operand: &Value, op: &str) -> PlinthResult<Value> {
    let decoded = crate::value::RestValue::from_json(operand)?;
    match decoded {
        crate::value::RestValue::GeoPoint { .. } => Ok(decoded.to_json()),
        _ => Err(PlinthError::IncorrectType(format!(
            "{} requires a GeoPoint operand",
            op
        ))),
    }
}

fn distance_operand(operand: &Value, divisor: f64) -> PlinthResult<Value> {
    let distance = operand.as_f64().ok_or_else(|| {
        PlinthError::IncorrectType("distance constraints require a number".to_string())
    })?;
    Ok(Value::from(distance / divisor))
}
