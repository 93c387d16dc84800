//! Many-to-many relations over synthetic join collections.
//!
//! A Relation field stores no column on its owning class. The edges live in
//! a dedicated collection named `_Join:<field>:<owning class>` whose records
//! are `{relatedId, owningId}` pairs. This module owns every read and write
//! of those collections and rewrites relation constraints into plain
//! objectId id-set constraints before the transform layer runs.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::debug;
use serde_json::{json, Map, Value};

use crate::adapter::{AdapterFindOptions, StorageAdapter};
use crate::error::{PlinthError, PlinthResult};
use crate::schema::{join_class_name, FieldType, SchemaController};
use crate::value::RestValue;

/// One collected relation mutation: the ids to attach to or detach from a
/// field of the owning object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationOp {
    pub field: String,
    pub adding: bool,
    pub object_ids: Vec<String>,
}

/// Reads and writes join collections for one storage adapter.
pub struct RelationManager {
    adapter: Arc<dyn StorageAdapter>,
}

impl RelationManager {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        RelationManager { adapter }
    }

    /// Inserts one edge. Upserting on the full pair makes duplicate adds
    /// harmless.
    pub fn add_relation(
        &self,
        field: &str,
        from_class: &str,
        from_id: &str,
        to_id: &str,
    ) -> PlinthResult<()> {
        let join = join_class_name(field, from_class);
        let query = json!({"relatedId": to_id, "owningId": from_id});
        let update = json!({"$set": {"relatedId": to_id, "owningId": from_id}});
        debug!("adding relation {}: {} -> {}", join, from_id, to_id);
        self.adapter.upsert_one_object(&join, &query, &update)
    }

    /// Deletes one edge. Removing a missing edge is a no-op.
    pub fn remove_relation(
        &self,
        field: &str,
        from_class: &str,
        from_id: &str,
        to_id: &str,
    ) -> PlinthResult<()> {
        let join = join_class_name(field, from_class);
        let query = json!({"relatedId": to_id, "owningId": from_id});
        debug!("removing relation {}: {} -> {}", join, from_id, to_id);
        self.adapter.delete_objects_by_query(&join, &query)?;
        Ok(())
    }

    /// Pulls AddRelation/RemoveRelation operators (possibly wrapped in a
    /// Batch) out of an update payload and strips their keys, so only plain
    /// fields continue toward storage.
    pub fn collect_relation_updates(&self, update: &mut Value) -> PlinthResult<Vec<RelationOp>> {
        let map = match update.as_object_mut() {
            Some(map) => map,
            None => return Ok(Vec::new()),
        };
        let keys: Vec<String> = map.keys().cloned().collect();
        let mut collected = Vec::new();
        for key in keys {
            let ops = match map.get(&key) {
                Some(value) => relation_ops_for_value(&key, value)?,
                None => Vec::new(),
            };
            if ops.is_empty() {
                continue;
            }
            collected.extend(ops);
            map.remove(&key);
        }
        Ok(collected)
    }

    /// Performs the join mutations collected from one update payload.
    pub fn apply_relation_updates(
        &self,
        class_name: &str,
        object_id: &str,
        ops: &[RelationOp],
    ) -> PlinthResult<()> {
        for op in ops {
            for related_id in &op.object_ids {
                if op.adding {
                    self.add_relation(&op.field, class_name, object_id, related_id)?;
                } else {
                    self.remove_relation(&op.field, class_name, object_id, related_id)?;
                }
            }
        }
        Ok(())
    }

    /// [`Self::collect_relation_updates`] followed by
    /// [`Self::apply_relation_updates`] against one object.
    pub fn handle_relation_updates(
        &self,
        class_name: &str,
        object_id: &str,
        update: &mut Value,
    ) -> PlinthResult<()> {
        let ops = self.collect_relation_updates(update)?;
        self.apply_relation_updates(class_name, object_id, &ops)
    }

    /// Ids on the owning side whose `field` relation contains any of
    /// `related_ids`.
    pub fn owning_ids(
        &self,
        class_name: &str,
        field: &str,
        related_ids: &[String],
    ) -> PlinthResult<Vec<String>> {
        let query = json!({"relatedId": {"$in": related_ids}});
        let rows = self.adapter.find(
            &join_class_name(field, class_name),
            &query,
            &AdapterFindOptions::default(),
        )?;
        Ok(column_values(&rows, "owningId"))
    }

    /// Ids on the related side attached to `owning_id` through `field`.
    pub fn related_ids(
        &self,
        class_name: &str,
        field: &str,
        owning_id: &str,
    ) -> PlinthResult<Vec<String>> {
        let query = json!({ "owningId": owning_id });
        let rows = self.adapter.find(
            &join_class_name(field, class_name),
            &query,
            &AdapterFindOptions::default(),
        )?;
        Ok(column_values(&rows, "relatedId"))
    }

    /// Rewrites every `$relatedTo {object, key}` clause into an objectId
    /// id-set constraint. The clause selects records of the queried class
    /// whose `key` relation contains the named object, so the lookup runs
    /// against the queried class's own join collection, member side in,
    /// owner side out.
    pub fn reduce_relation_keys(&self, class_name: &str, query: &mut Value) -> PlinthResult<()> {
        let map = match query.as_object_mut() {
            Some(map) => map,
            None => return Ok(()),
        };
        for branch_key in ["$or", "$and"] {
            if let Some(Value::Array(branches)) = map.get_mut(branch_key) {
                for branch in branches.iter_mut() {
                    self.reduce_relation_keys(class_name, branch)?;
                }
            }
        }
        if let Some(related_to) = map.remove("$relatedTo") {
            let key = related_to
                .get("key")
                .and_then(Value::as_str)
                .ok_or_else(improper_related_to)?;
            let object = related_to.get("object").ok_or_else(improper_related_to)?;
            if object.get("__type").and_then(Value::as_str) != Some("Pointer")
                || object.get("className").and_then(Value::as_str).is_none()
            {
                return Err(improper_related_to());
            }
            let member_id = object
                .get("objectId")
                .and_then(Value::as_str)
                .ok_or_else(improper_related_to)?;
            let ids = self.owning_ids(class_name, key, &[member_id.to_string()])?;
            add_in_object_ids(ids, map);
        }
        Ok(())
    }

    /// Rewrites Relation-field comparisons (implicit equality, $eq, $ne,
    /// $in, $nin over Pointer values) into objectId id sets resolved from
    /// the join collection. A pointer with no edges resolves to an empty id
    /// set, which matches nothing.
    pub fn reduce_in_relation(
        &self,
        class_name: &str,
        query: &mut Value,
        schema: &SchemaController,
    ) -> PlinthResult<()> {
        if let Some(map) = query.as_object_mut() {
            for branch_key in ["$or", "$and"] {
                if let Some(Value::Array(branches)) = map.get_mut(branch_key) {
                    for branch in branches.iter_mut() {
                        self.reduce_in_relation(class_name, branch, schema)?;
                    }
                }
            }
        }
        let keys: Vec<String> = match query.as_object() {
            Some(map) => map
                .keys()
                .filter(|key| !key.starts_with('$'))
                .cloned()
                .collect(),
            None => return Ok(()),
        };
        for key in keys {
            let is_relation = matches!(
                schema.get_expected_type(class_name, &key)?,
                Some(FieldType::Relation { .. })
            );
            if !is_relation {
                continue;
            }
            let constraint = match query.as_object_mut().and_then(|map| map.remove(&key)) {
                Some(constraint) => constraint,
                None => continue,
            };
            for (negated, related) in relation_constraint_groups(&key, &constraint)? {
                let owning = self.owning_ids(class_name, &key, &related)?;
                if let Some(map) = query.as_object_mut() {
                    if negated {
                        add_not_in_object_ids(owning, map);
                    } else {
                        add_in_object_ids(owning, map);
                    }
                }
            }
        }
        Ok(())
    }
}

/// When `operation` is denied at the class level but a pointer-field
/// exemption exists, narrows `query` so it can only reach records whose
/// exempted fields point at the calling user. `None` means the caller has
/// no path to any record at all.
pub fn add_pointer_permissions(
    schema: &SchemaController,
    class_name: &str,
    operation: &str,
    query: &Value,
    acl_group: &[String],
) -> PlinthResult<Option<Value>> {
    let class = match schema.get_one_schema(class_name, false)? {
        Some(class) => class,
        None => return Ok(Some(query.clone())),
    };
    let clp = &class.class_level_permissions;
    if clp.is_granted(operation, acl_group) {
        return Ok(Some(query.clone()));
    }
    let fields = clp.user_fields(operation);
    if fields.is_empty() {
        return Ok(Some(query.clone()));
    }
    // Role entries aside, the group carries at most the calling user's id.
    let users: Vec<&String> = acl_group
        .iter()
        .filter(|entry| *entry != "*" && !entry.starts_with("role:"))
        .collect();
    let user_id = match users.as_slice() {
        [single] => single.as_str(),
        _ => return Ok(None),
    };
    let user_pointer = json!({
        "__type": "Pointer",
        "className": "_User",
        "objectId": user_id
    });

    let mut clauses: Vec<Value> = Vec::new();
    for field in fields {
        if query.get(field).is_some() {
            let mut pointer_clause = Map::new();
            pointer_clause.insert(field.clone(), user_pointer.clone());
            clauses.push(json!({"$and": [Value::Object(pointer_clause), query.clone()]}));
        } else {
            let mut merged = query.as_object().cloned().unwrap_or_default();
            merged.insert(field.clone(), user_pointer.clone());
            clauses.push(Value::Object(merged));
        }
    }
    if clauses.len() == 1 {
        return Ok(clauses.pop());
    }
    Ok(Some(json!({ "$or": clauses })))
}

fn relation_ops_for_value(field: &str, value: &Value) -> PlinthResult<Vec<RelationOp>> {
    let op_name = match value.get("__op").and_then(Value::as_str) {
        Some(op_name) => op_name,
        None => return Ok(Vec::new()),
    };
    match op_name {
        "AddRelation" => Ok(vec![RelationOp {
            field: field.to_string(),
            adding: true,
            object_ids: relation_object_ids(value, op_name)?,
        }]),
        "RemoveRelation" => Ok(vec![RelationOp {
            field: field.to_string(),
            adding: false,
            object_ids: relation_object_ids(value, op_name)?,
        }]),
        "Batch" => {
            let ops = value.get("ops").and_then(Value::as_array).ok_or_else(|| {
                PlinthError::IncorrectType("Batch requires an ops array".to_string())
            })?;
            let mut collected = Vec::new();
            for op in ops {
                let mut inner = relation_ops_for_value(field, op)?;
                if inner.is_empty() {
                    return Err(PlinthError::IncorrectType(
                        "Batch supports AddRelation and RemoveRelation only".to_string(),
                    ));
                }
                collected.append(&mut inner);
            }
            Ok(collected)
        }
        _ => Ok(Vec::new()),
    }
}

fn relation_object_ids(operator: &Value, op_name: &str) -> PlinthResult<Vec<String>> {
    let objects = operator.get("objects").and_then(Value::as_array).ok_or_else(|| {
        PlinthError::IncorrectType(format!("{} requires an array of Pointer values", op_name))
    })?;
    let mut ids = Vec::new();
    for object in objects {
        match RestValue::from_json(object)? {
            RestValue::Pointer { object_id, .. } => ids.push(object_id),
            _ => {
                return Err(PlinthError::IncorrectType(format!(
                    "{} requires an array of Pointer values",
                    op_name
                )))
            }
        }
    }
    Ok(ids)
}

fn relation_constraint_groups(
    key: &str,
    constraint: &Value,
) -> PlinthResult<Vec<(bool, Vec<String>)>> {
    let map = constraint
        .as_object()
        .ok_or_else(|| relation_constraint_error(key))?;
    if map.get("__type").and_then(Value::as_str) == Some("Pointer") {
        return Ok(vec![(false, vec![required_pointer_id(constraint, key)?])]);
    }
    let mut groups = Vec::new();
    for (constraint_key, value) in map {
        match constraint_key.as_str() {
            "$eq" => groups.push((false, vec![required_pointer_id(value, key)?])),
            "$ne" => groups.push((true, vec![required_pointer_id(value, key)?])),
            "$in" => groups.push((false, pointer_id_list(value, key)?)),
            "$nin" => groups.push((true, pointer_id_list(value, key)?)),
            _ => return Err(relation_constraint_error(key)),
        }
    }
    Ok(groups)
}

fn required_pointer_id(value: &Value, key: &str) -> PlinthResult<String> {
    match RestValue::from_json(value) {
        Ok(RestValue::Pointer { object_id, .. }) => Ok(object_id),
        _ => Err(relation_constraint_error(key)),
    }
}

fn pointer_id_list(value: &Value, key: &str) -> PlinthResult<Vec<String>> {
    let values = value
        .as_array()
        .ok_or_else(|| relation_constraint_error(key))?;
    values
        .iter()
        .map(|value| required_pointer_id(value, key))
        .collect()
}

fn relation_constraint_error(key: &str) -> PlinthError {
    PlinthError::IncorrectType(format!(
        "relation field {} takes Pointer comparisons only",
        key
    ))
}

fn improper_related_to() -> PlinthError {
    PlinthError::IncorrectType("improper usage of $relatedTo".to_string())
}

fn column_values(rows: &[Value], column: &str) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get(column).and_then(Value::as_str).map(str::to_string))
        .collect()
}

fn string_ids(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect()
}

/// Intersects the found ids with any objectId constraint already present,
/// leaving `objectId: {"$in": [...]}` behind. An equality constraint is kept
/// alongside the narrowed list.
fn add_in_object_ids(ids: Vec<String>, query: &mut Map<String, Value>) {
    let mut lists = vec![ids];
    let mut constraint = match query.remove("objectId") {
        Some(Value::String(id)) => {
            lists.push(vec![id.clone()]);
            let mut eq = Map::new();
            eq.insert("$eq".to_string(), Value::String(id));
            eq
        }
        Some(Value::Object(existing)) => {
            if let Some(id) = existing.get("$eq").and_then(Value::as_str) {
                lists.push(vec![id.to_string()]);
            }
            if let Some(in_list) = existing.get("$in").and_then(Value::as_array) {
                lists.push(string_ids(in_list));
            }
            existing
        }
        _ => Map::new(),
    };
    let intersection = intersect(lists);
    constraint.insert("$in".to_string(), json!(intersection));
    query.insert("objectId".to_string(), Value::Object(constraint));
}

/// Unions the found ids into an `objectId: {"$nin": [...]}` constraint.
fn add_not_in_object_ids(ids: Vec<String>, query: &mut Map<String, Value>) {
    let mut constraint = match query.remove("objectId") {
        Some(Value::String(id)) => {
            let mut eq = Map::new();
            eq.insert("$eq".to_string(), Value::String(id));
            eq
        }
        Some(Value::Object(existing)) => existing,
        _ => Map::new(),
    };
    let mut all = constraint
        .get("$nin")
        .and_then(Value::as_array)
        .map(|existing| string_ids(existing))
        .unwrap_or_default();
    for id in ids {
        if !all.contains(&id) {
            all.push(id);
        }
    }
    constraint.insert("$nin".to_string(), json!(all));
    query.insert("objectId".to_string(), Value::Object(constraint));
}

fn intersect(lists: Vec<Vec<String>>) -> Vec<String> {
    let mut iter = lists.into_iter();
    let mut result = match iter.next() {
        Some(first) => first,
        None => return Vec::new(),
    };
    let mut seen = BTreeSet::new();
    result.retain(|id| seen.insert(id.clone()));
    for list in iter {
        let allowed: BTreeSet<&str> = list.iter().map(String::as_str).collect();
        result.retain(|id| allowed.contains(id.as_str()));
    }
    result
}
