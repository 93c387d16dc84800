//! Query evaluation and update application for the bundled backends.
//!
//! Both in-tree adapters store documents as plain JSON, so they share one
//! evaluator for storage-shaped queries and one mutator for grouped update
//! operators. Comparison semantics follow the document-store conventions the
//! transform layer targets: a missing key compares like null, equality
//! against an array field matches any element, and range operators only
//! apply to values of the same type.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::error::{PlinthError, PlinthResult};

/// Resolves a possibly dotted key path against a document.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn set_path(doc: &mut Map<String, Value>, path: &str, value: Value) -> PlinthResult<()> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for part in &parts[..parts.len() - 1] {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = slot.as_object_mut().ok_or_else(|| {
            PlinthError::Storage(format!(
                "cannot set '{}': '{}' is not a nested object",
                path, part
            ))
        })?;
    }
    current.insert(parts[parts.len() - 1].to_string(), value);
    Ok(())
}

fn remove_path(doc: &mut Map<String, Value>, path: &str) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for part in &parts[..parts.len() - 1] {
        match current.get_mut(*part).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return,
        }
    }
    current.remove(parts[parts.len() - 1]);
}

/// Deep equality with numeric coercion: integer and float encodings of the
/// same number are equal, everything else is structural.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|other| values_equal(v, other)).unwrap_or(false))
        }
        _ => a == b,
    }
}

fn as_tagged_date(value: &Value) -> Option<&str> {
    let obj = value.as_object()?;
    if obj.get("__type").and_then(Value::as_str) == Some("Date") {
        obj.get("iso").and_then(Value::as_str)
    } else {
        None
    }
}

/// Orders two values when they are of comparable types. Tagged dates order
/// chronologically; mixed types do not order.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(a_iso), Some(b_iso)) = (as_tagged_date(a), as_tagged_date(b)) {
        let a_ts = chrono::DateTime::parse_from_rfc3339(a_iso).ok()?;
        let b_ts = chrono::DateTime::parse_from_rfc3339(b_iso).ok()?;
        return Some(a_ts.cmp(&b_ts));
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    if as_tagged_date(value).is_some() {
        return 4;
    }
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Bool(_) => 3,
        Value::Object(_) => 5,
        Value::Array(_) => 6,
    }
}

/// Equality as queries see it: direct match, or containment when the stored
/// value is an array and the probe is not.
fn equality_matches(stored: &Value, probe: &Value) -> bool {
    if values_equal(stored, probe) {
        return true;
    }
    match stored {
        Value::Array(items) if !probe.is_array() => {
            items.iter().any(|item| values_equal(item, probe))
        }
        _ => false,
    }
}

fn geo_point(value: &Value) -> Option<(f64, f64)> {
    let obj = value.as_object()?;
    if obj.get("__type").and_then(Value::as_str) != Some("GeoPoint") {
        return None;
    }
    Some((
        obj.get("latitude")?.as_f64()?,
        obj.get("longitude")?.as_f64()?,
    ))
}

/// Central angle between two points on the unit sphere, in radians.
fn central_angle(a: (f64, f64), b: (f64, f64)) -> f64 {
    let to_rad = std::f64::consts::PI / 180.0;
    let (lat1, lon1) = (a.0 * to_rad, a.1 * to_rad);
    let (lat2, lon2) = (b.0 * to_rad, b.1 * to_rad);
    let sin_lat = ((lat2 - lat1) / 2.0).sin();
    let sin_lon = ((lon2 - lon1) / 2.0).sin();
    let h = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lon * sin_lon;
    2.0 * h.sqrt().min(1.0).asin()
}

fn matches_in(stored: Option<&Value>, candidates: &Value) -> PlinthResult<bool> {
    let list = candidates.as_array().ok_or_else(|| {
        PlinthError::Storage("$in and $nin require an array argument".to_string())
    })?;
    let stored = stored.unwrap_or(&Value::Null);
    Ok(list.iter().any(|probe| equality_matches(stored, probe)))
}

fn matches_operator(
    stored: Option<&Value>,
    op: &str,
    arg: &Value,
    constraint: &Map<String, Value>,
) -> PlinthResult<bool> {
    match op {
        "$eq" => Ok(equality_matches(stored.unwrap_or(&Value::Null), arg)),
        "$ne" => Ok(!equality_matches(stored.unwrap_or(&Value::Null), arg)),
        "$lt" | "$lte" | "$gt" | "$gte" => {
            let stored = match stored {
                Some(value) => value,
                None => return Ok(false),
            };
            let ordering = match compare_values(stored, arg) {
                Some(ordering) => ordering,
                None => return Ok(false),
            };
            Ok(match op {
                "$lt" => ordering == Ordering::Less,
                "$lte" => ordering != Ordering::Greater,
                "$gt" => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
        "$in" => matches_in(stored, arg),
        "$nin" => Ok(!matches_in(stored, arg)?),
        "$all" => {
            let wanted = arg.as_array().ok_or_else(|| {
                PlinthError::Storage("$all requires an array argument".to_string())
            })?;
            let stored = match stored.and_then(Value::as_array) {
                Some(items) => items,
                None => return Ok(wanted.is_empty()),
            };
            Ok(wanted
                .iter()
                .all(|probe| stored.iter().any(|item| values_equal(item, probe))))
        }
        "$exists" => {
            let wanted = arg.as_bool().ok_or_else(|| {
                PlinthError::Storage("$exists requires a boolean argument".to_string())
            })?;
            Ok(stored.is_some() == wanted)
        }
        "$regex" => {
            let pattern = arg.as_str().ok_or_else(|| {
                PlinthError::Storage("$regex requires a string argument".to_string())
            })?;
            let options = constraint
                .get("$options")
                .and_then(Value::as_str)
                .unwrap_or("");
            let full = if options.is_empty() {
                pattern.to_string()
            } else {
                format!("(?{}){}", options, pattern)
            };
            let re = regex::Regex::new(&full).map_err(|e| {
                PlinthError::IncorrectType(format!("invalid regular expression: {}", e))
            })?;
            Ok(stored
                .and_then(Value::as_str)
                .map(|text| re.is_match(text))
                .unwrap_or(false))
        }
        // Handled alongside the operator that consumes it.
        "$options" | "$maxDistance" => Ok(true),
        "$nearSphere" => {
            let center = geo_point(arg).ok_or_else(|| {
                PlinthError::Storage("$nearSphere requires a GeoPoint argument".to_string())
            })?;
            let stored = match stored.and_then(geo_point) {
                Some(point) => point,
                None => return Ok(false),
            };
            match constraint.get("$maxDistance") {
                Some(max) => {
                    let max = max.as_f64().ok_or_else(|| {
                        PlinthError::Storage("$maxDistance requires a number".to_string())
                    })?;
                    Ok(central_angle(center, stored) <= max)
                }
                None => Ok(true),
            }
        }
        "$within" => {
            let corners = arg
                .get("$box")
                .and_then(Value::as_array)
                .filter(|b| b.len() == 2)
                .ok_or_else(|| {
                    PlinthError::Storage("$within requires a $box of two GeoPoints".to_string())
                })?;
            let bottom_left = geo_point(&corners[0]).ok_or_else(|| {
                PlinthError::Storage("$box corners must be GeoPoints".to_string())
            })?;
            let top_right = geo_point(&corners[1]).ok_or_else(|| {
                PlinthError::Storage("$box corners must be GeoPoints".to_string())
            })?;
            let stored = match stored.and_then(geo_point) {
                Some(point) => point,
                None => return Ok(false),
            };
            Ok(stored.0 >= bottom_left.0
                && stored.0 <= top_right.0
                && stored.1 >= bottom_left.1
                && stored.1 <= top_right.1)
        }
        other => Err(PlinthError::Storage(format!(
            "unsupported query operator '{}'",
            other
        ))),
    }
}

fn is_operator_map(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.keys().any(|k| k.starts_with('$')))
        .unwrap_or(false)
}

/// Evaluates a storage-shaped query against a document.
pub fn matches_query(doc: &Value, query: &Value) -> PlinthResult<bool> {
    let clauses = query
        .as_object()
        .ok_or_else(|| PlinthError::Storage("query is not an object".to_string()))?;
    for (key, constraint) in clauses {
        match key.as_str() {
            "$or" => {
                let branches = constraint.as_array().ok_or_else(|| {
                    PlinthError::Storage("$or requires an array of queries".to_string())
                })?;
                let mut any = false;
                for branch in branches {
                    if matches_query(doc, branch)? {
                        any = true;
                        break;
                    }
                }
                if !any {
                    return Ok(false);
                }
            }
            "$and" => {
                let branches = constraint.as_array().ok_or_else(|| {
                    PlinthError::Storage("$and requires an array of queries".to_string())
                })?;
                for branch in branches {
                    if !matches_query(doc, branch)? {
                        return Ok(false);
                    }
                }
            }
            field => {
                let stored = get_path(doc, field);
                if is_operator_map(constraint) {
                    let ops = constraint.as_object().ok_or_else(|| {
                        PlinthError::Storage("constraint is not an object".to_string())
                    })?;
                    for (op, arg) in ops {
                        if !matches_operator(stored, op, arg, ops)? {
                            return Ok(false);
                        }
                    }
                } else if !equality_matches(stored.unwrap_or(&Value::Null), constraint) {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

/// Sorts, skips and limits a matched result set.
pub fn apply_find_options(results: Vec<Value>, options: &super::AdapterFindOptions) -> Vec<Value> {
    let mut results = results;
    if !options.sort.is_empty() {
        sort_documents(&mut results, &options.sort);
    }
    let skip = options.skip.unwrap_or(0) as usize;
    let mut results: Vec<Value> = results.into_iter().skip(skip).collect();
    if let Some(limit) = options.limit {
        results.truncate(limit as usize);
    }
    results
}

/// Stable multi-key sort over matched documents.
pub fn sort_documents(docs: &mut [Value], sort: &[(String, super::SortOrder)]) {
    docs.sort_by(|a, b| {
        for (key, order) in sort {
            let left = get_path(a, key).cloned().unwrap_or(Value::Null);
            let right = get_path(b, key).cloned().unwrap_or(Value::Null);
            let ordering = compare_values(&left, &right)
                .unwrap_or_else(|| type_rank(&left).cmp(&type_rank(&right)));
            let ordering = match order {
                super::SortOrder::Ascending => ordering,
                super::SortOrder::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn each_values<'a>(arg: &'a Value, op: &str) -> PlinthResult<&'a Vec<Value>> {
    arg.get("$each").and_then(Value::as_array).ok_or_else(|| {
        PlinthError::Storage(format!("{} requires an object with an $each array", op))
    })
}

/// Applies a grouped update to a document in place.
pub fn apply_update(doc: &mut Map<String, Value>, update: &Value) -> PlinthResult<()> {
    let groups = update
        .as_object()
        .ok_or_else(|| PlinthError::Storage("update is not an object".to_string()))?;
    for (op, args) in groups {
        let args = args.as_object().ok_or_else(|| {
            PlinthError::Storage(format!("{} arguments are not an object", op))
        })?;
        match op.as_str() {
            "$set" => {
                for (path, value) in args {
                    set_path(doc, path, value.clone())?;
                }
            }
            "$unset" => {
                for path in args.keys() {
                    remove_path(doc, path);
                }
            }
            "$inc" => {
                for (path, amount) in args {
                    let amount = amount.as_f64().ok_or_else(|| {
                        PlinthError::Storage("$inc requires a numeric amount".to_string())
                    })?;
                    let current = match get_path(&Value::Object(doc.clone()), path) {
                        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                        Some(_) => {
                            return Err(PlinthError::Storage(format!(
                                "cannot apply $inc to non-numeric field '{}'",
                                path
                            )))
                        }
                        None => 0.0,
                    };
                    let next = current + amount;
                    let number = if next.fract() == 0.0 && next.abs() < 9e15 {
                        Value::from(next as i64)
                    } else {
                        Value::from(next)
                    };
                    set_path(doc, path, number)?;
                }
            }
            "$push" => {
                for (path, arg) in args {
                    let additions = each_values(arg, "$push")?.clone();
                    let mut items = take_array(doc, path)?;
                    items.extend(additions);
                    set_path(doc, path, Value::Array(items))?;
                }
            }
            "$addToSet" => {
                for (path, arg) in args {
                    let additions = each_values(arg, "$addToSet")?;
                    let mut items = take_array(doc, path)?;
                    for value in additions {
                        if !items.iter().any(|item| values_equal(item, value)) {
                            items.push(value.clone());
                        }
                    }
                    set_path(doc, path, Value::Array(items))?;
                }
            }
            "$pullAll" => {
                for (path, arg) in args {
                    let removals = arg.as_array().ok_or_else(|| {
                        PlinthError::Storage("$pullAll requires an array".to_string())
                    })?;
                    let items = take_array(doc, path)?;
                    let kept: Vec<Value> = items
                        .into_iter()
                        .filter(|item| !removals.iter().any(|r| values_equal(item, r)))
                        .collect();
                    set_path(doc, path, Value::Array(kept))?;
                }
            }
            other => {
                return Err(PlinthError::Storage(format!(
                    "unsupported update operator '{}'",
                    other
                )))
            }
        }
    }
    Ok(())
}

fn take_array(doc: &mut Map<String, Value>, path: &str) -> PlinthResult<Vec<Value>> {
    match get_path(&Value::Object(doc.clone()), path) {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(PlinthError::Storage(format!(
            "cannot apply an array operator to non-array field '{}'",
            path
        ))),
        None => Ok(Vec::new()),
    }
}

/// Seed for an upsert miss: the query's literal equality fields.
pub fn seed_from_query(query: &Value) -> PlinthResult<Map<String, Value>> {
    let clauses = query
        .as_object()
        .ok_or_else(|| PlinthError::Storage("query is not an object".to_string()))?;
    let mut seed = Map::new();
    for (key, constraint) in clauses {
        if key == "$or" || key == "$and" {
            continue;
        }
        if is_operator_map(constraint) {
            if let Some(eq) = constraint.get("$eq") {
                set_path(&mut seed, key, eq.clone())?;
            }
        } else {
            set_path(&mut seed, key, constraint.clone())?;
        }
    }
    Ok(seed)
}
