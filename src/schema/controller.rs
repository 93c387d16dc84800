//! Schema lifecycle and enforcement.
//!
//! The controller owns the cached view of every class schema and is the only
//! component that mutates schema documents. Classes come into being two
//! ways: explicitly through [`SchemaController::add_class_if_not_exists`],
//! or lazily when an object write first mentions an unknown class or field.
//! The lazy path is optimistic: assume the field exists, write it, and on
//! conflict reload once and re-check against whichever writer won.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};
use serde_json::{json, Map, Value};

use crate::adapter::{StorageAdapter, StorageSchema, SCHEMA_COLLECTION};
use crate::error::{PlinthError, PlinthResult};
use crate::schema::cache::SchemaCache;
use crate::schema::defaults::{default_fields, required_columns};
use crate::schema::types::{
    class_name_is_valid, field_name_is_valid, infer_rest_type, is_join_class, join_class_name,
    ClassLevelPermissions, ClassSchema, FieldType,
};

/// Validates and persists class schemas over one storage adapter.
pub struct SchemaController {
    adapter: Arc<dyn StorageAdapter>,
    cache: Arc<SchemaCache>,
}

impl SchemaController {
    pub fn new(adapter: Arc<dyn StorageAdapter>, cache: Arc<SchemaCache>) -> Self {
        SchemaController { adapter, cache }
    }

    /// Drops the cache and refetches every schema from storage.
    pub fn reload_data(&self) -> PlinthResult<Vec<ClassSchema>> {
        self.cache.clear()?;
        let mut schemas = Vec::new();
        for storage in self.adapter.get_all_classes()? {
            schemas.push(decode_schema(&storage)?);
        }
        self.cache.put_all(schemas.clone())?;
        Ok(schemas)
    }

    pub fn get_all_classes(&self) -> PlinthResult<Vec<ClassSchema>> {
        if let Some(schemas) = self.cache.get_all()? {
            return Ok(schemas);
        }
        self.reload_data()
    }

    /// Fetches one class schema. Join collections have no stored schema;
    /// with `allow_volatile` they resolve to a synthetic two-column schema,
    /// without it they resolve to `None`.
    pub fn get_one_schema(
        &self,
        class_name: &str,
        allow_volatile: bool,
    ) -> PlinthResult<Option<ClassSchema>> {
        if is_join_class(class_name) {
            if allow_volatile {
                return Ok(Some(join_schema(class_name)));
            }
            return Ok(None);
        }
        if let Some(schema) = self.cache.get_one(class_name)? {
            return Ok(Some(schema));
        }
        match self.adapter.get_class(class_name)? {
            Some(storage) => {
                let schema = decode_schema(&storage)?;
                self.cache.put_one(schema.clone())?;
                Ok(Some(schema))
            }
            None => Ok(None),
        }
    }

    /// The declared type of `key` in `class_name`, if any. Default fields
    /// count as declared even before anything is stored.
    pub fn get_expected_type(
        &self,
        class_name: &str,
        key: &str,
    ) -> PlinthResult<Option<FieldType>> {
        Ok(self
            .get_one_schema(class_name, false)?
            .and_then(|schema| schema.expected_type(key).cloned()))
    }

    /// Creates a class from submitted REST field specs, merging in the
    /// default fields of the class. The returned schema is the merged view.
    pub fn add_class_if_not_exists(
        &self,
        class_name: &str,
        fields: &Value,
        class_level_permissions: Option<&Value>,
    ) -> PlinthResult<ClassSchema> {
        if !class_name_is_valid(class_name) || is_join_class(class_name) {
            return Err(invalid_class_name(class_name));
        }
        let submitted = parse_field_specs(class_name, fields)?;
        let mut merged = default_fields(class_name);
        merged.extend(submitted.clone());
        check_single_geopoint(&merged)?;

        let clp = match class_level_permissions {
            Some(raw) => {
                let clp = ClassLevelPermissions::from_rest(raw)?;
                check_pointer_permission_columns(&clp, &merged)?;
                Some(clp)
            }
            None => None,
        };

        if self.get_one_schema(class_name, false)?.is_some() {
            return Err(PlinthError::InvalidClassName(format!(
                "Class {} already exists.",
                class_name
            )));
        }

        // Default fields are injected on read, so only the submitted ones
        // are persisted.
        let storage = StorageSchema {
            class_name: class_name.to_string(),
            fields: submitted
                .iter()
                .map(|(name, ty)| (name.clone(), ty.to_token()))
                .collect(),
            class_permissions: clp
                .as_ref()
                .map(ClassLevelPermissions::to_rest)
                .unwrap_or(Value::Null),
        };
        self.adapter.create_class(&storage)?;
        info!("created class {}", class_name);
        self.reload_data()?;

        Ok(ClassSchema {
            class_name: class_name.to_string(),
            fields: merged,
            class_level_permissions: clp.unwrap_or_else(ClassLevelPermissions::open),
        })
    }

    /// Applies a schema change: new fields are added, fields submitted with
    /// `{"__op": "Delete"}` are dropped together with their stored columns,
    /// and a new permission blob replaces the old one. In-place type changes
    /// are rejected.
    pub fn update_class(
        &self,
        class_name: &str,
        submitted_fields: &Value,
        class_level_permissions: Option<&Value>,
    ) -> PlinthResult<ClassSchema> {
        let schema = self.get_one_schema(class_name, false)?.ok_or_else(|| {
            PlinthError::InvalidClassName(format!("Class {} does not exist.", class_name))
        })?;
        let submitted = submitted_fields.as_object().ok_or_else(|| {
            PlinthError::IncorrectType("submitted fields must be an object".to_string())
        })?;

        let defaults = default_fields(class_name);
        let mut deleted: Vec<String> = Vec::new();
        let mut inserted: BTreeMap<String, FieldType> = BTreeMap::new();
        for (name, spec) in submitted {
            if spec.get("__op").and_then(Value::as_str) == Some("Delete") {
                if defaults.contains_key(name) {
                    return Err(PlinthError::InvalidKeyName(format!(
                        "field {} cannot be changed",
                        name
                    )));
                }
                if !schema.fields.contains_key(name) {
                    return Err(PlinthError::InvalidKeyName(format!(
                        "Field {} does not exist, cannot delete.",
                        name
                    )));
                }
                deleted.push(name.clone());
                continue;
            }
            let ty = FieldType::from_rest(spec)?;
            if let Some(current) = schema.expected_type(name) {
                if *current != ty {
                    return Err(PlinthError::ChangedImmutableField(format!(
                        "Field {} exists, cannot update.",
                        name
                    )));
                }
                continue;
            }
            if !field_name_is_valid(name) {
                return Err(PlinthError::InvalidKeyName(format!(
                    "invalid field name: {}",
                    name
                )));
            }
            inserted.insert(name.clone(), ty);
        }

        let mut result = schema.fields.clone();
        for name in &deleted {
            result.remove(name);
        }
        result.extend(inserted.clone());
        check_single_geopoint(&result)?;

        let clp = match class_level_permissions {
            Some(raw) => {
                let clp = ClassLevelPermissions::from_rest(raw)?;
                check_pointer_permission_columns(&clp, &result)?;
                Some(clp)
            }
            None => None,
        };

        if !deleted.is_empty() {
            self.adapter.delete_fields(class_name, &deleted)?;
            for name in &deleted {
                if let Some(FieldType::Relation { .. }) = schema.expected_type(name) {
                    self.adapter
                        .delete_class(&join_class_name(name, class_name))?;
                }
            }
            info!("deleted fields {:?} from class {}", deleted, class_name);
        }
        self.cache.del_one(class_name)?;

        for (name, ty) in &inserted {
            self.validate_field(class_name, name, ty, false)?;
        }
        if let Some(clp) = &clp {
            self.set_permissions(class_name, clp)?;
        }
        self.reload_data()?;
        self.get_one_schema(class_name, false)?.ok_or_else(|| {
            PlinthError::Internal(format!("class {} vanished during update", class_name))
        })
    }

    /// Creates the class with no fields if it does not exist yet. Losing a
    /// creation race to another writer is fine; the winner's schema is
    /// returned either way.
    pub fn enforce_class_exists(&self, class_name: &str) -> PlinthResult<ClassSchema> {
        if let Some(schema) = self.get_one_schema(class_name, false)? {
            return Ok(schema);
        }
        if !class_name_is_valid(class_name) || is_join_class(class_name) {
            return Err(invalid_class_name(class_name));
        }
        match self.adapter.create_class(&StorageSchema::new(class_name)) {
            Ok(_) => debug!("lazily created class {}", class_name),
            Err(PlinthError::InvalidClassName(_)) => {}
            Err(error) => return Err(error),
        }
        self.reload_data()?;
        self.get_one_schema(class_name, false)?
            .ok_or_else(|| PlinthError::InvalidClassName(format!("Failed to add {}", class_name)))
    }

    /// Checks one field against the schema, persisting its type on first
    /// occurrence. A dotted key types its root as Object. With `freeze` the
    /// schema is read-only and an unknown field is an error; without it the
    /// field is added optimistically and conflicts trigger one
    /// reload-and-recheck against the concurrent winner.
    pub fn validate_field(
        &self,
        class_name: &str,
        key: &str,
        ty: &FieldType,
        freeze: bool,
    ) -> PlinthResult<()> {
        let (field, ty) = match key.split_once('.') {
            Some((root, _)) => (root, FieldType::Object),
            None => (key, ty.clone()),
        };
        if !field_name_is_valid(field) {
            return Err(PlinthError::InvalidKeyName(format!(
                "invalid field name: {}",
                field
            )));
        }
        if let Some(expected) = self.get_expected_type(class_name, field)? {
            if expected == ty {
                return Ok(());
            }
            return Err(PlinthError::IncorrectType(format!(
                "schema mismatch for {}.{}; expected {} but got {}",
                class_name,
                field,
                expected.to_token(),
                ty.to_token()
            )));
        }
        if freeze {
            return Err(PlinthError::InvalidKeyName(format!(
                "schema is frozen, cannot add {} field",
                field
            )));
        }
        if ty == FieldType::GeoPoint {
            let has_geo = self
                .get_one_schema(class_name, false)?
                .map(|schema| {
                    schema
                        .fields
                        .values()
                        .any(|existing| *existing == FieldType::GeoPoint)
                })
                .unwrap_or(false);
            if has_geo {
                return Err(PlinthError::IncorrectType(
                    "there can only be one GeoPoint field in a class".to_string(),
                ));
            }
        }
        match self
            .adapter
            .add_field_if_not_exists(class_name, field, &ty.to_token())
        {
            Ok(()) => {
                self.cache.del_one(class_name)?;
                Ok(())
            }
            // On conflict another writer may have typed the field first;
            // recheck once against whatever is stored now, no second write.
            Err(PlinthError::IncorrectType(_)) | Err(PlinthError::Storage(_)) => {
                self.cache.del_one(class_name)?;
                match self.get_expected_type(class_name, field)? {
                    Some(expected) if expected == ty => Ok(()),
                    Some(expected) => Err(PlinthError::IncorrectType(format!(
                        "schema mismatch for {}.{}; expected {} but got {}",
                        class_name,
                        field,
                        expected.to_token(),
                        ty.to_token()
                    ))),
                    None => Err(PlinthError::IncorrectType(format!(
                        "Could not add field {}",
                        field
                    ))),
                }
            }
            Err(error) => Err(error),
        }
    }

    /// Validates a REST object against the schema, adding unseen fields as
    /// it goes. `query` distinguishes updates from creates for the
    /// required-column rules.
    pub fn validate_object(
        &self,
        class_name: &str,
        object: &Value,
        query: Option<&Value>,
    ) -> PlinthResult<()> {
        let map = object.as_object().ok_or_else(|| {
            PlinthError::IncorrectType("object must be a JSON object".to_string())
        })?;
        let mut geo_field = self.get_one_schema(class_name, false)?.and_then(|schema| {
            schema
                .fields
                .iter()
                .find(|(_, ty)| **ty == FieldType::GeoPoint)
                .map(|(name, _)| name.clone())
        });
        for (field, value) in map {
            if matches!(field.as_str(), "objectId" | "createdAt" | "updatedAt" | "ACL") {
                continue;
            }
            let ty = match infer_rest_type(value)? {
                Some(ty) => ty,
                None => continue,
            };
            if ty == FieldType::GeoPoint {
                match &geo_field {
                    Some(existing) if existing != field => {
                        return Err(PlinthError::IncorrectType(
                            "there can only be one GeoPoint field in a class".to_string(),
                        ));
                    }
                    _ => geo_field = Some(field.clone()),
                }
            }
            self.validate_field(class_name, field, &ty, false)?;
        }
        self.validate_required_columns(class_name, map, query)
    }

    /// Checks one operation against the class-level permissions. The
    /// pointer-field exemption lists do not grant anything here; a caller
    /// holding only those gets through and is narrowed by query
    /// augmentation instead.
    pub fn validate_permission(
        &self,
        class_name: &str,
        acl_group: &[String],
        operation: &str,
    ) -> PlinthResult<()> {
        let schema = match self.get_one_schema(class_name, false)? {
            Some(schema) => schema,
            None => return Ok(()),
        };
        let clp = &schema.class_level_permissions;
        let perms = match clp.operation(operation) {
            Some(perms) => perms,
            None => return Ok(()),
        };
        let authenticated = !acl_group.is_empty()
            && perms.get("requiresAuthentication").copied().unwrap_or(false);
        if authenticated || clp.is_granted(operation, acl_group) {
            return Ok(());
        }
        // Creates have no stored object for a user pointer to match, so the
        // write exemption cannot apply to them.
        if operation != "create" && !clp.user_fields(operation).is_empty() {
            return Ok(());
        }
        Err(PlinthError::forbidden(operation, class_name))
    }

    /// Drops one class's records and schema document. Join-collection
    /// cleanup stays with the caller, which knows the relation fields.
    pub fn delete_class(&self, class_name: &str) -> PlinthResult<()> {
        self.adapter.delete_class(class_name)?;
        self.cache.del_one(class_name)
    }

    fn set_permissions(&self, class_name: &str, clp: &ClassLevelPermissions) -> PlinthResult<()> {
        let query = json!({ "_id": class_name });
        let update = json!({"$set": {"_metadata": {"class_permissions": clp.to_rest()}}});
        let updated = self
            .adapter
            .update_objects_by_query(SCHEMA_COLLECTION, &query, &update)?;
        if updated == 0 {
            return Err(PlinthError::InvalidClassName(format!(
                "Class {} does not exist.",
                class_name
            )));
        }
        debug!("updated permissions on class {}", class_name);
        Ok(())
    }

    fn validate_required_columns(
        &self,
        class_name: &str,
        object: &Map<String, Value>,
        query: Option<&Value>,
    ) -> PlinthResult<()> {
        let columns = required_columns(class_name);
        if columns.is_empty() {
            return Ok(());
        }
        let updating_existing = query
            .and_then(|query| query.get("objectId"))
            .is_some();
        for column in columns {
            let value = object.get(*column);
            let missing = if updating_existing {
                matches!(
                    value,
                    Some(spec) if spec.get("__op").and_then(Value::as_str) == Some("Delete")
                )
            } else {
                matches!(value, None | Some(Value::Null))
            };
            if missing {
                return Err(PlinthError::IncorrectType(format!(
                    "{} is required.",
                    column
                )));
            }
        }
        Ok(())
    }
}

/// Stored schemas carry only explicit fields; the defaults of the class are
/// injected on every read.
fn decode_schema(storage: &StorageSchema) -> PlinthResult<ClassSchema> {
    let mut schema = ClassSchema::from_storage(storage)?;
    for (name, ty) in default_fields(&schema.class_name) {
        schema.fields.entry(name).or_insert(ty);
    }
    Ok(schema)
}

/// Join collections always look the same: two string columns naming the two
/// sides of the relation.
fn join_schema(class_name: &str) -> ClassSchema {
    let mut schema = ClassSchema::new(class_name);
    schema
        .fields
        .insert("relatedId".to_string(), FieldType::String);
    schema
        .fields
        .insert("owningId".to_string(), FieldType::String);
    schema
}

pub(crate) fn invalid_class_name(class_name: &str) -> PlinthError {
    PlinthError::InvalidClassName(format!(
        "Invalid classname: {}, classnames can only have alphanumeric characters and _, and must start with an alpha character",
        class_name
    ))
}

fn parse_field_specs(
    class_name: &str,
    fields: &Value,
) -> PlinthResult<BTreeMap<String, FieldType>> {
    let map = fields.as_object().ok_or_else(|| {
        PlinthError::IncorrectType("fields must be an object of field specs".to_string())
    })?;
    let defaults = default_fields(class_name);
    let mut parsed = BTreeMap::new();
    for (name, spec) in map {
        if !field_name_is_valid(name) {
            return Err(PlinthError::InvalidKeyName(format!(
                "invalid field name: {}",
                name
            )));
        }
        if defaults.contains_key(name) {
            return Err(PlinthError::InvalidKeyName(format!(
                "field {} cannot be added",
                name
            )));
        }
        parsed.insert(name.clone(), FieldType::from_rest(spec)?);
    }
    Ok(parsed)
}

fn check_single_geopoint(fields: &BTreeMap<String, FieldType>) -> PlinthResult<()> {
    let geo: Vec<&String> = fields
        .iter()
        .filter(|(_, ty)| **ty == FieldType::GeoPoint)
        .map(|(name, _)| name)
        .collect();
    if geo.len() > 1 {
        return Err(PlinthError::IncorrectType(format!(
            "currently, only one GeoPoint field may exist in an object. Adding {} when {} already exists.",
            geo[1], geo[0]
        )));
    }
    Ok(())
}

fn check_pointer_permission_columns(
    clp: &ClassLevelPermissions,
    fields: &BTreeMap<String, FieldType>,
) -> PlinthResult<()> {
    for field in clp
        .read_user_fields
        .iter()
        .chain(clp.write_user_fields.iter())
    {
        let valid = matches!(
            fields.get(field),
            Some(FieldType::Pointer { target_class }) if target_class == "_User"
        );
        if !valid {
            return Err(PlinthError::IncorrectType(format!(
                "'{}' is not a valid column for class-level pointer permissions",
                field
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::schema::cache::DEFAULT_TTL_MS;

    fn controller() -> SchemaController {
        controller_over(Arc::new(MemoryAdapter::new()))
    }

    fn controller_over(adapter: Arc<MemoryAdapter>) -> SchemaController {
        SchemaController::new(adapter, Arc::new(SchemaCache::new(DEFAULT_TTL_MS)))
    }

    #[test]
    fn add_class_merges_default_fields() {
        let schema = controller()
            .add_class_if_not_exists("Diary", &json!({"title": {"type": "String"}}), None)
            .unwrap();
        assert_eq!(schema.expected_type("title"), Some(&FieldType::String));
        assert_eq!(schema.expected_type("objectId"), Some(&FieldType::String));
        assert_eq!(schema.expected_type("createdAt"), Some(&FieldType::Date));
        assert_eq!(
            schema
                .class_level_permissions
                .operation("find")
                .and_then(|grants| grants.get("*")),
            Some(&true)
        );
    }

    #[test]
    fn add_class_twice_is_rejected() {
        let controller = controller();
        controller
            .add_class_if_not_exists("Diary", &json!({}), None)
            .unwrap();
        let err = controller
            .add_class_if_not_exists("Diary", &json!({}), None)
            .unwrap_err();
        match err {
            PlinthError::InvalidClassName(message) => {
                assert!(message.contains("already exists"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn add_class_rejects_bad_names() {
        assert!(matches!(
            controller().add_class_if_not_exists("9lives", &json!({}), None),
            Err(PlinthError::InvalidClassName(_))
        ));
        assert!(matches!(
            controller().add_class_if_not_exists("_Join:posts:Diary", &json!({}), None),
            Err(PlinthError::InvalidClassName(_))
        ));
    }

    #[test]
    fn add_class_rejects_default_shadowing() {
        assert!(matches!(
            controller().add_class_if_not_exists(
                "Diary",
                &json!({"createdAt": {"type": "Date"}}),
                None
            ),
            Err(PlinthError::InvalidKeyName(_))
        ));
    }

    #[test]
    fn pointer_permission_columns_must_point_at_users() {
        let err = controller()
            .add_class_if_not_exists(
                "Diary",
                &json!({"title": {"type": "String"}}),
                Some(&json!({"readUserFields": ["title"]})),
            )
            .unwrap_err();
        assert!(matches!(err, PlinthError::IncorrectType(_)));

        controller()
            .add_class_if_not_exists(
                "Diary",
                &json!({"owner": {"type": "Pointer", "targetClass": "_User"}}),
                Some(&json!({"readUserFields": ["owner"]})),
            )
            .unwrap();
    }

    #[test]
    fn first_write_locks_field_type() {
        let controller = controller();
        controller
            .validate_field("Diary", "mood", &FieldType::String, false)
            .unwrap();
        let err = controller
            .validate_field("Diary", "mood", &FieldType::Number, false)
            .unwrap_err();
        match err {
            PlinthError::IncorrectType(message) => {
                assert!(message.contains("schema mismatch for Diary.mood"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn frozen_validation_adds_nothing() {
        let controller = controller();
        assert!(controller
            .validate_field("Diary", "mood", &FieldType::String, true)
            .is_err());
        assert_eq!(controller.get_expected_type("Diary", "mood").unwrap(), None);
    }

    #[test]
    fn dotted_keys_type_the_root_as_object() {
        let controller = controller();
        controller
            .validate_field("Diary", "stats.wins", &FieldType::Number, false)
            .unwrap();
        assert_eq!(
            controller.get_expected_type("Diary", "stats").unwrap(),
            Some(FieldType::Object)
        );
    }

    #[test]
    fn lazy_class_creation_is_idempotent() {
        let controller = controller();
        controller.enforce_class_exists("Diary").unwrap();
        controller.enforce_class_exists("Diary").unwrap();
        assert!(controller.get_one_schema("Diary", false).unwrap().is_some());
    }

    #[test]
    fn update_class_adds_and_deletes_fields() {
        let adapter = Arc::new(MemoryAdapter::new());
        let controller = controller_over(adapter.clone());
        controller
            .add_class_if_not_exists(
                "Diary",
                &json!({
                    "title": {"type": "String"},
                    "posts": {"type": "Relation", "targetClass": "Comment"}
                }),
                None,
            )
            .unwrap();
        adapter
            .upsert_one_object(
                "_Join:posts:Diary",
                &json!({"relatedId": "c1", "owningId": "d1"}),
                &json!({"$set": {"relatedId": "c1", "owningId": "d1"}}),
            )
            .unwrap();

        let schema = controller
            .update_class(
                "Diary",
                &json!({
                    "posts": {"__op": "Delete"},
                    "mood": {"type": "String"}
                }),
                None,
            )
            .unwrap();
        assert_eq!(schema.expected_type("mood"), Some(&FieldType::String));
        assert_eq!(schema.expected_type("posts"), None);
        let leftovers = adapter
            .find(
                "_Join:posts:Diary",
                &json!({}),
                &crate::adapter::AdapterFindOptions::default(),
            )
            .unwrap();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn update_class_rejects_type_changes() {
        let controller = controller();
        controller
            .add_class_if_not_exists("Diary", &json!({"title": {"type": "String"}}), None)
            .unwrap();
        assert!(matches!(
            controller.update_class("Diary", &json!({"title": {"type": "Number"}}), None),
            Err(PlinthError::ChangedImmutableField(_))
        ));
        assert!(matches!(
            controller.update_class("Diary", &json!({"ghost": {"__op": "Delete"}}), None),
            Err(PlinthError::InvalidKeyName(_))
        ));
    }

    #[test]
    fn update_class_persists_permissions() {
        let controller = controller();
        controller
            .add_class_if_not_exists("Diary", &json!({}), None)
            .unwrap();
        controller
            .update_class("Diary", &json!({}), Some(&json!({"find": {"role:admin": true}})))
            .unwrap();

        assert!(controller
            .validate_permission("Diary", &[], "find")
            .is_err());
        assert!(controller
            .validate_permission("Diary", &["role:admin".to_string()], "find")
            .is_ok());
        // Other operations stay unrestricted.
        assert!(controller
            .validate_permission("Diary", &[], "update")
            .is_ok());
    }

    #[test]
    fn authenticated_grantee_needs_a_principal() {
        let controller = controller();
        controller
            .add_class_if_not_exists(
                "Diary",
                &json!({}),
                Some(&json!({"find": {"requiresAuthentication": true}})),
            )
            .unwrap();
        assert!(matches!(
            controller.validate_permission("Diary", &[], "find"),
            Err(PlinthError::OperationForbidden(_))
        ));
        assert!(controller
            .validate_permission(
                "Diary",
                &["abcdefABCDEF012345678901".to_string()],
                "find"
            )
            .is_ok());
    }

    #[test]
    fn write_exemption_never_covers_create() {
        let controller = controller();
        controller
            .add_class_if_not_exists(
                "Diary",
                &json!({"owner": {"type": "Pointer", "targetClass": "_User"}}),
                Some(&json!({
                    "create": {},
                    "update": {},
                    "writeUserFields": ["owner"]
                })),
            )
            .unwrap();
        assert!(controller
            .validate_permission("Diary", &["abcdefABCDEF012345678901".to_string()], "update")
            .is_ok());
        assert!(matches!(
            controller.validate_permission(
                "Diary",
                &["abcdefABCDEF012345678901".to_string()],
                "create"
            ),
            Err(PlinthError::OperationForbidden(_))
        ));
    }

    #[test]
    fn required_columns_are_enforced() {
        let controller = controller();
        controller.enforce_class_exists("_Role").unwrap();
        let err = controller
            .validate_object("_Role", &json!({"name": "admins"}), None)
            .unwrap_err();
        match err {
            PlinthError::IncorrectType(message) => assert!(message.contains("is required")),
            other => panic!("unexpected error: {:?}", other),
        }

        controller
            .validate_object(
                "_Role",
                &json!({"name": "admins", "ACL": {"*": {"read": true}}}),
                None,
            )
            .unwrap();

        // Updates only fail when a required column is being deleted.
        controller
            .validate_object(
                "_Role",
                &json!({"note": "renamed"}),
                Some(&json!({"objectId": "r1"})),
            )
            .unwrap();
        assert!(controller
            .validate_object(
                "_Role",
                &json!({"name": {"__op": "Delete"}}),
                Some(&json!({"objectId": "r1"})),
            )
            .is_err());
    }

    #[test]
    fn objects_cannot_carry_two_geopoints() {
        let controller = controller();
        let object = json!({
            "arrival": {"__type": "GeoPoint", "latitude": 1.0, "longitude": 2.0},
            "departure": {"__type": "GeoPoint", "latitude": 3.0, "longitude": 4.0}
        });
        assert!(matches!(
            controller.validate_object("Trip", &object, None),
            Err(PlinthError::IncorrectType(_))
        ));
    }
}
