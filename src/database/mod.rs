//! Request orchestration over one storage adapter.
//!
//! The controller composes the schema, relation and transform layers into
//! the externally visible operations: find, get, count, create, update and
//! destroy, plus the administrative schema calls. Reads follow one pipeline:
//! relation reduction, pointer-permission augmentation, the class-level
//! permission check, ACL narrowing, then the key/value transform; only the
//! transformed query ever reaches the adapter, and only untransformed
//! records ever leave.
//!
//! Access control rides on the `acl` option. `None` is elevated access and
//! skips permission checks, ACL narrowing and sensitive-field filtering.
//! `Some(group)` carries the caller's grantee group: the user id and
//! `role:` names, without the implicit `"*"`, so an anonymous caller is
//! `Some(vec![])`.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::adapter::{AdapterFindOptions, SortOrder, StorageAdapter};
use crate::error::{PlinthError, PlinthResult};
use crate::relation::{add_pointer_permissions, RelationManager};
use crate::schema::cache::SchemaCache;
use crate::schema::controller::invalid_class_name;
use crate::schema::{
    class_name_is_valid, field_name_is_valid, is_join_class, join_class_name, ClassSchema,
    SchemaController,
};
use crate::transform::{
    increment_keys, storage_object_for_create, transform_key, transform_update, transform_where,
    untransform_object,
};
use crate::value::format_iso;

/// Options for [`DatabaseController::find`], `get` and `count`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Caller's grantee group; `None` is elevated access.
    pub acl: Option<Vec<String>>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// REST field names, applied in order; a `-` prefix sorts descending.
    pub sort: Vec<String>,
}

/// Options for [`DatabaseController::create`] and `destroy`.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Caller's grantee group; `None` is elevated access.
    pub acl: Option<Vec<String>>,
}

/// Options for [`DatabaseController::update`].
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Caller's grantee group; `None` is elevated access.
    pub acl: Option<Vec<String>>,
    /// Update every match instead of the first.
    pub many: bool,
    /// Seed a new record from the query when nothing matches.
    pub upsert: bool,
    /// Return the full updated record instead of the increment deltas.
    pub skip_sanitization: bool,
}

/// The externally visible face of the engine: one controller per store.
pub struct DatabaseController {
    adapter: Arc<dyn StorageAdapter>,
    schema: SchemaController,
    relations: RelationManager,
}

impl DatabaseController {
    pub fn new(adapter: Arc<dyn StorageAdapter>, cache: Arc<SchemaCache>) -> Self {
        DatabaseController {
            schema: SchemaController::new(adapter.clone(), cache),
            relations: RelationManager::new(adapter.clone()),
            adapter,
        }
    }

    /// The schema controller, for administrative schema operations.
    pub fn schema(&self) -> &SchemaController {
        &self.schema
    }

    /// The relation manager, for direct join-collection edits.
    pub fn relations(&self) -> &RelationManager {
        &self.relations
    }

    /// Forces a cache reload and hands back the schema controller.
    pub fn load_schema(&self) -> PlinthResult<&SchemaController> {
        self.schema.reload_data()?;
        Ok(&self.schema)
    }

    /// Runs a query. Zero matches is an empty result, never an error, except
    /// that a blocked single-object lookup reports the object as missing
    /// rather than leaking why.
    pub fn find(
        &self,
        class_name: &str,
        query: &Value,
        options: &FindOptions,
    ) -> PlinthResult<Vec<Value>> {
        let operation = read_operation(query);
        let (schema, storage_query) =
            match self.prepare_read(class_name, query, options, operation)? {
                Some(prepared) => prepared,
                None if operation == "get" => return Err(object_not_found()),
                None => return Ok(Vec::new()),
            };
        let adapter_options = AdapterFindOptions {
            skip: options.skip,
            limit: options.limit,
            sort: storage_sort(&schema, &options.sort)?,
        };
        let docs = self
            .adapter
            .find(class_name, &storage_query, &adapter_options)?;
        let mut results = Vec::with_capacity(docs.len());
        for doc in &docs {
            let mut rest = untransform_object(&schema, doc)?;
            filter_sensitive_data(class_name, &mut rest, &options.acl);
            results.push(rest);
        }
        Ok(results)
    }

    /// Fetches one record by id.
    pub fn get(
        &self,
        class_name: &str,
        object_id: &str,
        options: &FindOptions,
    ) -> PlinthResult<Value> {
        let query = json!({ "objectId": object_id });
        let mut results = self.find(class_name, &query, options)?;
        match results.pop() {
            Some(object) if results.is_empty() => Ok(object),
            Some(_) => Err(PlinthError::Internal(format!(
                "multiple records share objectId {} in {}",
                object_id, class_name
            ))),
            None => Err(object_not_found()),
        }
    }

    /// Counts matches under the same permission and ACL rules as `find`.
    /// Skip, limit and sort do not apply.
    pub fn count(
        &self,
        class_name: &str,
        query: &Value,
        options: &FindOptions,
    ) -> PlinthResult<u64> {
        let operation = read_operation(query);
        match self.prepare_read(class_name, query, options, operation)? {
            Some((_, storage_query)) => self.adapter.count(class_name, &storage_query),
            None => Ok(0),
        }
    }

    /// Persists one REST object, lazily creating the class and any unseen
    /// fields. The caller's timestamps are overwritten, a missing objectId
    /// is generated, and relation operators are applied to the join
    /// collections rather than stored. Returns the object as persisted.
    pub fn create(
        &self,
        class_name: &str,
        object: &Value,
        options: &WriteOptions,
    ) -> PlinthResult<Value> {
        if !class_name_is_valid(class_name) || is_join_class(class_name) {
            return Err(invalid_class_name(class_name));
        }
        let mut object = object.clone();
        let object_id = match object.get("objectId").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => new_object_id(),
        };
        let now = format_iso(&Utc::now());
        {
            let map = object.as_object_mut().ok_or_else(|| {
                PlinthError::IncorrectType("object must be a JSON object".to_string())
            })?;
            map.insert("objectId".to_string(), Value::String(object_id.clone()));
            map.insert("createdAt".to_string(), Value::String(now.clone()));
            map.insert("updatedAt".to_string(), Value::String(now));
        }
        if let Some(group) = &options.acl {
            self.schema.validate_permission(class_name, group, "create")?;
        }
        self.schema.enforce_class_exists(class_name)?;
        self.validate_object(class_name, &object, None, options)?;
        let relation_ops = self.relations.collect_relation_updates(&mut object)?;

        let schema = self.fresh_schema(class_name)?;
        let doc = storage_object_for_create(&schema, &object)?;
        // Join edges land before the record itself; a mid-sequence failure
        // leaves edges without an owner rather than an owner missing edges.
        self.relations
            .apply_relation_updates(class_name, &object_id, &relation_ops)?;
        self.adapter.create_object(class_name, &doc)?;
        debug!("created {} object {}", class_name, object_id);
        Ok(object)
    }

    /// Applies a REST update to matching records. The default mode updates
    /// the first match and returns the increment deltas; `many` touches every
    /// match and `upsert` seeds a record on a miss, both returning an empty
    /// object.
    pub fn update(
        &self,
        class_name: &str,
        query: &Value,
        update: &Value,
        options: &UpdateOptions,
    ) -> PlinthResult<Value> {
        if !class_name_is_valid(class_name) || is_join_class(class_name) {
            return Err(invalid_class_name(class_name));
        }
        let delta_keys = increment_keys(update);
        let mut update = update.clone();
        {
            let map = update.as_object_mut().ok_or_else(|| {
                PlinthError::IncorrectType("update must be a JSON object".to_string())
            })?;
            map.insert(
                "updatedAt".to_string(),
                Value::String(format_iso(&Utc::now())),
            );
        }
        if let Some(group) = &options.acl {
            self.schema.validate_permission(class_name, group, "update")?;
        }
        self.validate_object(
            class_name,
            &update,
            Some(query),
            &WriteOptions {
                acl: options.acl.clone(),
            },
        )?;
        let relation_ops = self.relations.collect_relation_updates(&mut update)?;
        let owning_id = query.get("objectId").and_then(Value::as_str);
        if !relation_ops.is_empty() && owning_id.is_none() {
            return Err(PlinthError::IncorrectType(
                "relation updates require an objectId query".to_string(),
            ));
        }
        let query = match &options.acl {
            None => query.clone(),
            Some(group) => {
                match add_pointer_permissions(&self.schema, class_name, "update", query, group)? {
                    Some(augmented) => with_access_vector(&augmented, "_wperm", group),
                    None => return Err(object_not_found()),
                }
            }
        };

        let schema = self.fresh_schema(class_name)?;
        let storage_query = transform_where(&schema, &query)?;
        let storage_update = transform_update(&schema, &update)?;
        if let Some(owning_id) = owning_id {
            self.relations
                .apply_relation_updates(class_name, owning_id, &relation_ops)?;
        }
        let updated_doc = if options.many {
            let touched =
                self.adapter
                    .update_objects_by_query(class_name, &storage_query, &storage_update)?;
            debug!("updated {} {} objects", touched, class_name);
            None
        } else if options.upsert {
            self.adapter
                .upsert_one_object(class_name, &storage_query, &storage_update)?;
            None
        } else {
            match self
                .adapter
                .find_one_and_update(class_name, &storage_query, &storage_update)?
            {
                Some(doc) => Some(doc),
                None => return Err(object_not_found()),
            }
        };

        let updated_doc = match updated_doc {
            Some(doc) => doc,
            None => return Ok(Value::Object(Map::new())),
        };
        let rest = untransform_object(&schema, &updated_doc)?;
        if options.skip_sanitization {
            return Ok(rest);
        }
        let mut deltas = Map::new();
        for key in delta_keys {
            if let Some(value) = rest.get(&key) {
                deltas.insert(key, value.clone());
            }
        }
        Ok(Value::Object(deltas))
    }

    /// Deletes every record matching the query; nothing matching is reported
    /// as a missing object. Join edges pointing at deleted records are left
    /// behind until their class schema is dropped.
    pub fn destroy(
        &self,
        class_name: &str,
        query: &Value,
        options: &WriteOptions,
    ) -> PlinthResult<u64> {
        if !class_name_is_valid(class_name) || is_join_class(class_name) {
            return Err(invalid_class_name(class_name));
        }
        let query = match &options.acl {
            None => query.clone(),
            Some(group) => {
                self.schema.validate_permission(class_name, group, "delete")?;
                match add_pointer_permissions(&self.schema, class_name, "delete", query, group)? {
                    Some(augmented) => with_access_vector(&augmented, "_wperm", group),
                    None => return Err(object_not_found()),
                }
            }
        };
        let schema = self.fresh_schema(class_name)?;
        let storage_query = transform_where(&schema, &query)?;
        let deleted = self
            .adapter
            .delete_objects_by_query(class_name, &storage_query)?;
        if deleted == 0 {
            return Err(object_not_found());
        }
        debug!("deleted {} {} objects", deleted, class_name);
        Ok(deleted)
    }

    /// Drops a class schema once the class holds no records, removing the
    /// join collection of every Relation field along with it.
    pub fn delete_schema(&self, class_name: &str) -> PlinthResult<()> {
        self.schema.reload_data()?;
        let schema = self
            .schema
            .get_one_schema(class_name, false)?
            .ok_or_else(|| {
                PlinthError::InvalidClassName(format!("Class {} does not exist.", class_name))
            })?;
        let count = self.adapter.count(class_name, &json!({}))?;
        if count > 0 {
            return Err(PlinthError::ClassNotEmpty(format!(
                "Class {} is not empty, contains {} objects, cannot drop schema.",
                class_name, count
            )));
        }
        for field in schema.relation_fields() {
            self.adapter
                .delete_class(&join_class_name(field, class_name))?;
        }
        self.schema.delete_class(class_name)?;
        info!("dropped class {} and its join collections", class_name);
        Ok(())
    }

    /// Deletes every record of a class while keeping its schema.
    pub fn purge_collection(&self, class_name: &str) -> PlinthResult<u64> {
        if self.schema.get_one_schema(class_name, false)?.is_none() {
            return Err(PlinthError::InvalidClassName(format!(
                "Class {} does not exist.",
                class_name
            )));
        }
        let purged = self.adapter.delete_objects_by_query(class_name, &json!({}))?;
        info!("purged {} objects from {}", purged, class_name);
        Ok(purged)
    }

    /// Pre-flight validation for a write: the addField permission gate for
    /// unseen fields, then full schema validation of the payload.
    pub fn validate_object(
        &self,
        class_name: &str,
        object: &Value,
        query: Option<&Value>,
        options: &WriteOptions,
    ) -> PlinthResult<()> {
        if let Some(group) = &options.acl {
            self.can_add_field(class_name, object, group)?;
        }
        self.schema.validate_object(class_name, object, query)
    }

    /// Checks the addField permission when a payload introduces fields the
    /// class has never seen. Payloads touching only known fields pass
    /// without it.
    pub fn can_add_field(
        &self,
        class_name: &str,
        object: &Value,
        acl_group: &[String],
    ) -> PlinthResult<()> {
        let schema = match self.schema.get_one_schema(class_name, false)? {
            Some(schema) => schema,
            None => return Ok(()),
        };
        let map = object.as_object().ok_or_else(|| {
            PlinthError::IncorrectType("object must be a JSON object".to_string())
        })?;
        let adds_field = map.keys().any(|key| {
            let root = key.split('.').next().unwrap_or(key);
            !schema.fields.contains_key(root)
        });
        if adds_field {
            self.schema
                .validate_permission(class_name, acl_group, "addField")?;
        }
        Ok(())
    }

    /// One-time store setup: the reserved classes exist and their uniqueness
    /// constraints are registered with the adapter.
    pub fn perform_initialization(&self) -> PlinthResult<()> {
        self.schema.enforce_class_exists("_User")?;
        self.schema.enforce_class_exists("_Role")?;
        self.adapter
            .ensure_uniqueness("_User", &["username".to_string()])?;
        self.adapter
            .ensure_uniqueness("_User", &["email".to_string()])?;
        self.adapter
            .ensure_uniqueness("_Role", &["name".to_string()])?;
        info!("storage initialized");
        Ok(())
    }

    /// Shared read preparation: relation reduction, pointer-permission
    /// augmentation, the permission check, ACL narrowing, key/value
    /// transform. `None` means the caller has no path to any record.
    fn prepare_read(
        &self,
        class_name: &str,
        query: &Value,
        options: &FindOptions,
        operation: &str,
    ) -> PlinthResult<Option<(ClassSchema, Value)>> {
        let mut query = query.clone();
        self.relations
            .reduce_relation_keys(class_name, &mut query)?;
        self.relations
            .reduce_in_relation(class_name, &mut query, &self.schema)?;
        let query = match &options.acl {
            None => query,
            Some(group) => {
                let augmented =
                    add_pointer_permissions(&self.schema, class_name, operation, &query, group)?;
                let augmented = match augmented {
                    Some(augmented) => augmented,
                    None => return Ok(None),
                };
                self.schema
                    .validate_permission(class_name, group, operation)?;
                with_access_vector(&augmented, "_rperm", group)
            }
        };
        let schema = self.fresh_schema(class_name)?;
        let storage_query = transform_where(&schema, &query)?;
        Ok(Some((schema, storage_query)))
    }

    /// Current schema view for the transform layer. Classes with no stored
    /// schema transform against an empty one.
    fn fresh_schema(&self, class_name: &str) -> PlinthResult<ClassSchema> {
        Ok(self
            .schema
            .get_one_schema(class_name, true)?
            .unwrap_or_else(|| ClassSchema::new(class_name)))
    }
}

/// Single-key lookups by objectId are gets, everything else is a find. The
/// distinction picks the permission gate the read runs under.
fn read_operation(query: &Value) -> &'static str {
    let is_get = query
        .as_object()
        .map(|map| map.len() == 1 && map.get("objectId").map(Value::is_string).unwrap_or(false))
        .unwrap_or(false);
    if is_get {
        "get"
    } else {
        "find"
    }
}

fn object_not_found() -> PlinthError {
    PlinthError::ObjectNotFound("Object not found.".to_string())
}

/// Object ids use the 24-char alphanumeric shape that ACL grantees are
/// validated against.
fn new_object_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..24].to_string()
}

/// Narrows a query to records whose permission vector admits the group.
/// Records without a vector are public, and the wildcard grantee counts for
/// everyone.
fn with_access_vector(query: &Value, column: &str, acl_group: &[String]) -> Value {
    let mut restricted = query.as_object().cloned().unwrap_or_default();
    let mut grantees = vec![Value::Null, Value::String("*".to_string())];
    grantees.extend(acl_group.iter().map(|entry| Value::String(entry.clone())));
    restricted.insert(column.to_string(), json!({ "$in": grantees }));
    Value::Object(restricted)
}

/// Translates REST sort keys for the adapter. authData keys never sort, and
/// a malformed root name fails before reaching storage.
fn storage_sort(schema: &ClassSchema, sort: &[String]) -> PlinthResult<Vec<(String, SortOrder)>> {
    let mut out = Vec::with_capacity(sort.len());
    for key in sort {
        let (name, order) = match key.strip_prefix('-') {
            Some(rest) => (rest, SortOrder::Descending),
            None => (key.as_str(), SortOrder::Ascending),
        };
        if name == "authData" || name.starts_with("authData.") {
            return Err(PlinthError::InvalidKeyName(format!(
                "Cannot sort by {}",
                name
            )));
        }
        let root = name.split('.').next().unwrap_or(name);
        if !field_name_is_valid(root) {
            return Err(PlinthError::InvalidKeyName(format!(
                "Invalid field name: {}.",
                name
            )));
        }
        out.push((transform_key(schema, name), order));
    }
    Ok(out)
}

/// Strips credentials from `_User` records read without elevated access:
/// the password never leaves, the session token and authData map are only
/// visible to the record's own user, and unlinked (null) auth providers
/// disappear.
fn filter_sensitive_data(class_name: &str, object: &mut Value, acl: &Option<Vec<String>>) {
    if class_name != "_User" {
        return;
    }
    let group = match acl {
        Some(group) => group,
        None => return,
    };
    let map = match object.as_object_mut() {
        Some(map) => map,
        None => return,
    };
    map.remove("password");
    let owns_record = map
        .get("objectId")
        .and_then(Value::as_str)
        .map(|id| group.iter().any(|entry| entry == id))
        .unwrap_or(false);
    if !owns_record {
        map.remove("sessionToken");
        map.remove("authData");
        return;
    }
    let emptied = match map.get_mut("authData") {
        Some(Value::Object(providers)) => {
            providers.retain(|_, data| !data.is_null());
            providers.is_empty()
        }
        _ => false,
    };
    if emptied {
        map.remove("authData");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::schema::cache::DEFAULT_TTL_MS;

    const USER: &str = "abcdefABCDEF012345678901";
    const OTHER: &str = "zyxwvuZYXWVU987654321098";

    fn controller() -> DatabaseController {
        DatabaseController::new(
            Arc::new(MemoryAdapter::new()),
            Arc::new(SchemaCache::new(DEFAULT_TTL_MS)),
        )
    }

    fn find_as(id: &str) -> FindOptions {
        FindOptions {
            acl: Some(vec![id.to_string()]),
            ..FindOptions::default()
        }
    }

    fn anonymous_find() -> FindOptions {
        FindOptions {
            acl: Some(Vec::new()),
            ..FindOptions::default()
        }
    }

    fn write_as(id: &str) -> WriteOptions {
        WriteOptions {
            acl: Some(vec![id.to_string()]),
        }
    }

    fn update_as(id: &str) -> UpdateOptions {
        UpdateOptions {
            acl: Some(vec![id.to_string()]),
            ..UpdateOptions::default()
        }
    }

    fn user_pointer(id: &str) -> Value {
        json!({"__type": "Pointer", "className": "_User", "objectId": id})
    }

    #[test]
    fn created_objects_round_trip() {
        let db = controller();
        let created = db
            .create(
                "Diary",
                &json!({"title": "day one"}),
                &WriteOptions::default(),
            )
            .unwrap();
        let id = created["objectId"].as_str().unwrap();
        assert_eq!(id.len(), 24);
        assert!(created["createdAt"].as_str().is_some());

        let fetched = db.get("Diary", id, &FindOptions::default()).unwrap();
        assert_eq!(fetched["title"], json!("day one"));
        assert_eq!(fetched["objectId"], json!(id));
    }

    #[test]
    fn create_rejects_invalid_class_names() {
        let db = controller();
        for name in ["9lives", "_Join:posts:Diary", "has space"] {
            assert!(matches!(
                db.create(name, &json!({}), &WriteOptions::default()),
                Err(PlinthError::InvalidClassName(_))
            ));
        }
    }

    #[test]
    fn acl_narrows_reads() {
        let db = controller();
        db.create(
            "Diary",
            &json!({"title": "private", "ACL": {USER: {"read": true, "write": true}}}),
            &WriteOptions::default(),
        )
        .unwrap();
        db.create("Diary", &json!({"title": "open"}), &WriteOptions::default())
            .unwrap();

        let public = db.find("Diary", &json!({}), &anonymous_find()).unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0]["title"], json!("open"));

        assert_eq!(db.find("Diary", &json!({}), &find_as(USER)).unwrap().len(), 2);
        assert_eq!(
            db.find("Diary", &json!({}), &FindOptions::default())
                .unwrap()
                .len(),
            2
        );
        assert_eq!(db.count("Diary", &json!({}), &anonymous_find()).unwrap(), 1);
    }

    #[test]
    fn class_permissions_gate_finds() {
        let db = controller();
        db.schema()
            .add_class_if_not_exists("Diary", &json!({}), Some(&json!({"find": {"role:admin": true}})))
            .unwrap();
        db.create("Diary", &json!({"title": "x"}), &WriteOptions::default())
            .unwrap();

        assert!(matches!(
            db.find("Diary", &json!({}), &find_as(USER)),
            Err(PlinthError::OperationForbidden(_))
        ));
        let options = FindOptions {
            acl: Some(vec!["role:admin".to_string()]),
            ..FindOptions::default()
        };
        assert_eq!(db.find("Diary", &json!({}), &options).unwrap().len(), 1);
    }

    #[test]
    fn get_missing_object_fails() {
        let db = controller();
        assert!(matches!(
            db.get("Diary", "nope", &FindOptions::default()),
            Err(PlinthError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn sort_skip_and_limit_apply() {
        let db = controller();
        for score in [1, 2, 3] {
            db.create("Diary", &json!({ "score": score }), &WriteOptions::default())
                .unwrap();
        }
        let options = FindOptions {
            sort: vec!["-score".to_string()],
            limit: Some(2),
            ..FindOptions::default()
        };
        let top = db.find("Diary", &json!({}), &options).unwrap();
        assert_eq!(top[0]["score"], json!(3));
        assert_eq!(top[1]["score"], json!(2));

        let options = FindOptions {
            sort: vec!["score".to_string()],
            skip: Some(1),
            ..FindOptions::default()
        };
        let rest = db.find("Diary", &json!({}), &options).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0]["score"], json!(2));
    }

    #[test]
    fn bad_sort_keys_fail() {
        let db = controller();
        let options = FindOptions {
            sort: vec!["authData.github.id".to_string()],
            ..FindOptions::default()
        };
        match db.find("_User", &json!({}), &options) {
            Err(PlinthError::InvalidKeyName(message)) => {
                assert!(message.contains("Cannot sort by"))
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let options = FindOptions {
            sort: vec!["@rank".to_string()],
            ..FindOptions::default()
        };
        match db.find("Diary", &json!({}), &options) {
            Err(PlinthError::InvalidKeyName(message)) => {
                assert!(message.contains("Invalid field name"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn updates_return_increment_deltas() {
        let db = controller();
        let created = db
            .create(
                "Diary",
                &json!({"title": "x", "score": 1}),
                &WriteOptions::default(),
            )
            .unwrap();
        let id = created["objectId"].as_str().unwrap();

        let update = json!({
            "title": "y",
            "score": {"__op": "Increment", "amount": 2}
        });
        let response = db
            .update(
                "Diary",
                &json!({ "objectId": id }),
                &update,
                &UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(response, json!({"score": 3}));

        let full = db
            .update(
                "Diary",
                &json!({ "objectId": id }),
                &json!({"score": {"__op": "Increment", "amount": 1}}),
                &UpdateOptions {
                    skip_sanitization: true,
                    ..UpdateOptions::default()
                },
            )
            .unwrap();
        assert_eq!(full["score"], json!(4));
        assert_eq!(full["title"], json!("y"));
        assert_eq!(full["objectId"], json!(id));
    }

    #[test]
    fn update_modes() {
        let db = controller();
        for _ in 0..2 {
            db.create("Diary", &json!({"score": 1}), &WriteOptions::default())
                .unwrap();
        }
        let response = db
            .update(
                "Diary",
                &json!({}),
                &json!({"flag": true}),
                &UpdateOptions {
                    many: true,
                    ..UpdateOptions::default()
                },
            )
            .unwrap();
        assert_eq!(response, json!({}));
        let flagged = db
            .find("Diary", &json!({"flag": true}), &FindOptions::default())
            .unwrap();
        assert_eq!(flagged.len(), 2);

        assert!(matches!(
            db.update(
                "Diary",
                &json!({"objectId": "missing"}),
                &json!({"flag": false}),
                &UpdateOptions::default(),
            ),
            Err(PlinthError::ObjectNotFound(_))
        ));

        db.update(
            "Diary",
            &json!({"title": "seeded"}),
            &json!({"score": 9}),
            &UpdateOptions {
                upsert: true,
                ..UpdateOptions::default()
            },
        )
        .unwrap();
        let seeded = db
            .find("Diary", &json!({"title": "seeded"}), &FindOptions::default())
            .unwrap();
        assert_eq!(seeded.len(), 1);
        assert_eq!(seeded[0]["score"], json!(9));
    }

    #[test]
    fn write_acl_guards_updates_and_destroys() {
        let db = controller();
        let created = db
            .create(
                "Diary",
                &json!({"title": "mine", "ACL": {USER: {"read": true, "write": true}}}),
                &WriteOptions::default(),
            )
            .unwrap();
        let id = created["objectId"].as_str().unwrap();
        let by_id = json!({ "objectId": id });

        assert!(matches!(
            db.update("Diary", &by_id, &json!({"title": "theirs"}), &update_as(OTHER)),
            Err(PlinthError::ObjectNotFound(_))
        ));
        db.update("Diary", &by_id, &json!({"title": "still mine"}), &update_as(USER))
            .unwrap();

        assert!(matches!(
            db.destroy("Diary", &by_id, &write_as(OTHER)),
            Err(PlinthError::ObjectNotFound(_))
        ));
        assert_eq!(db.destroy("Diary", &by_id, &write_as(USER)).unwrap(), 1);
        assert!(matches!(
            db.destroy("Diary", &by_id, &WriteOptions::default()),
            Err(PlinthError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn pointer_permissions_narrow_reads() {
        let db = controller();
        db.schema()
            .add_class_if_not_exists(
                "Diary",
                &json!({"owner": {"type": "Pointer", "targetClass": "_User"}}),
                Some(&json!({"find": {}, "readUserFields": ["owner"]})),
            )
            .unwrap();
        db.create(
            "Diary",
            &json!({"title": "mine", "owner": user_pointer(USER)}),
            &WriteOptions::default(),
        )
        .unwrap();
        db.create(
            "Diary",
            &json!({"title": "theirs", "owner": user_pointer(OTHER)}),
            &WriteOptions::default(),
        )
        .unwrap();

        let mine = db.find("Diary", &json!({}), &find_as(USER)).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0]["title"], json!("mine"));

        // No user id to match the exempted pointer fields against.
        assert!(db.find("Diary", &json!({}), &anonymous_find()).unwrap().is_empty());
    }

    #[test]
    fn user_credentials_are_filtered() {
        let db = controller();
        let created = db
            .create(
                "_User",
                &json!({
                    "username": "kay",
                    "password": "hunter2",
                    "sessionToken": "r:abc123",
                    "authData": {"github": {"id": "g-77"}}
                }),
                &WriteOptions::default(),
            )
            .unwrap();
        let id = created["objectId"].as_str().unwrap();

        let stranger = db.get("_User", id, &find_as(OTHER)).unwrap();
        assert!(stranger.get("password").is_none());
        assert!(stranger.get("sessionToken").is_none());
        assert!(stranger.get("authData").is_none());
        assert_eq!(stranger["username"], json!("kay"));

        let owner = db.get("_User", id, &find_as(id)).unwrap();
        assert!(owner.get("password").is_none());
        assert_eq!(owner["sessionToken"], json!("r:abc123"));
        assert_eq!(owner["authData"], json!({"github": {"id": "g-77"}}));

        let elevated = db.get("_User", id, &FindOptions::default()).unwrap();
        assert_eq!(elevated["password"], json!("hunter2"));
        assert_eq!(elevated["authData"], json!({"github": {"id": "g-77"}}));
    }

    #[test]
    fn null_auth_providers_are_stripped_for_the_owner() {
        let mut object = json!({
            "objectId": USER,
            "authData": {"github": {"id": "g-77"}, "stale": null}
        });
        filter_sensitive_data("_User", &mut object, &Some(vec![USER.to_string()]));
        assert_eq!(object["authData"], json!({"github": {"id": "g-77"}}));

        let mut object = json!({"objectId": USER, "authData": {"stale": null}});
        filter_sensitive_data("_User", &mut object, &Some(vec![USER.to_string()]));
        assert!(object.get("authData").is_none());
    }

    #[test]
    fn relation_operators_ride_along_with_writes() {
        let db = controller();
        let created = db
            .create(
                "Diary",
                &json!({
                    "title": "linked",
                    "posts": {"__op": "AddRelation", "objects": [
                        {"__type": "Pointer", "className": "Comment", "objectId": "c1"}
                    ]}
                }),
                &WriteOptions::default(),
            )
            .unwrap();
        let id = created["objectId"].as_str().unwrap();
        assert!(created.get("posts").is_none());

        let edges = db
            .find("_Join:posts:Diary", &json!({}), &FindOptions::default())
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0]["owningId"], json!(id));
        assert_eq!(edges[0]["relatedId"], json!("c1"));

        let linked = db
            .find(
                "Diary",
                &json!({"posts": {"__type": "Pointer", "className": "Comment", "objectId": "c1"}}),
                &FindOptions::default(),
            )
            .unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0]["objectId"], json!(id));
    }

    #[test]
    fn relation_updates_need_an_object_id() {
        let db = controller();
        db.create("Diary", &json!({"title": "x"}), &WriteOptions::default())
            .unwrap();
        let err = db
            .update(
                "Diary",
                &json!({"title": "x"}),
                &json!({"posts": {"__op": "AddRelation", "objects": [
                    {"__type": "Pointer", "className": "Comment", "objectId": "c1"}
                ]}}),
                &UpdateOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, PlinthError::IncorrectType(_)));
    }

    #[test]
    fn delete_schema_requires_an_empty_class() {
        let db = controller();
        assert!(matches!(
            db.delete_schema("Ghost"),
            Err(PlinthError::InvalidClassName(_))
        ));

        db.schema()
            .add_class_if_not_exists(
                "Diary",
                &json!({"posts": {"type": "Relation", "targetClass": "Comment"}}),
                None,
            )
            .unwrap();
        let created = db
            .create("Diary", &json!({"title": "x"}), &WriteOptions::default())
            .unwrap();
        db.relations()
            .add_relation("posts", "Diary", created["objectId"].as_str().unwrap(), "c1")
            .unwrap();

        match db.delete_schema("Diary") {
            Err(PlinthError::ClassNotEmpty(message)) => {
                assert!(message.contains("contains 1 objects"))
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert_eq!(db.purge_collection("Diary").unwrap(), 1);
        db.delete_schema("Diary").unwrap();
        assert!(db.schema().get_one_schema("Diary", false).unwrap().is_none());
        assert!(db
            .find("_Join:posts:Diary", &json!({}), &FindOptions::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn initialization_registers_uniqueness() {
        let db = controller();
        db.perform_initialization().unwrap();
        db.create("_User", &json!({"username": "kay"}), &WriteOptions::default())
            .unwrap();
        let err = db
            .create("_User", &json!({"username": "kay"}), &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, PlinthError::Storage(_)));
    }
}
