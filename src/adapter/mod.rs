//! The fixed storage adapter contract.
//!
//! Physical drivers plug in beneath the engine by implementing
//! [`StorageAdapter`]. Every value crossing this boundary is already
//! storage-shaped: reserved keys renamed, pointers collapsed, ACLs turned
//! into permission vectors, update operators grouped. The engine never sees
//! a backend's native representation and a backend never sees REST shapes.
//!
//! Two reference backends ship in-tree: [`MemoryAdapter`] for tests and
//! embedded throwaway stores, and [`SledAdapter`] for durable embedded use.
//! A relational driver lives out of tree and implements the same trait.

pub mod matcher;
pub mod memory;
pub mod sled_store;

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{PlinthError, PlinthResult};

pub use memory::MemoryAdapter;
pub use sled_store::SledAdapter;

/// Name of the collection holding one schema document per class.
pub const SCHEMA_COLLECTION: &str = "_SCHEMA";

/// Sort direction for one find key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Cursor options applied by the backend after matching.
#[derive(Debug, Clone, Default)]
pub struct AdapterFindOptions {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Storage-shaped key names, applied in order.
    pub sort: Vec<(String, SortOrder)>,
}

/// Storage-shaped schema record: one document per class, keyed by class
/// name, holding a field → type-token map plus a nested permissions blob.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSchema {
    pub class_name: String,
    pub fields: BTreeMap<String, String>,
    pub class_permissions: Value,
}

impl StorageSchema {
    pub fn new(class_name: &str) -> Self {
        StorageSchema {
            class_name: class_name.to_string(),
            fields: BTreeMap::new(),
            class_permissions: Value::Null,
        }
    }

    /// Document form: `{"_id": <class>, "<field>": "<token>", ...,
    /// "_metadata": {"class_permissions": {...}}}`.
    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("_id".to_string(), Value::String(self.class_name.clone()));
        for (field, token) in &self.fields {
            doc.insert(field.clone(), Value::String(token.clone()));
        }
        if !self.class_permissions.is_null() {
            let mut metadata = Map::new();
            metadata.insert(
                "class_permissions".to_string(),
                self.class_permissions.clone(),
            );
            doc.insert("_metadata".to_string(), Value::Object(metadata));
        }
        Value::Object(doc)
    }

    pub fn from_document(doc: &Value) -> PlinthResult<StorageSchema> {
        let map = doc.as_object().ok_or_else(|| {
            PlinthError::Serialization("schema document is not an object".to_string())
        })?;
        let class_name = map
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PlinthError::Serialization("schema document is missing _id".to_string())
            })?
            .to_string();
        let mut fields = BTreeMap::new();
        let mut class_permissions = Value::Null;
        for (key, value) in map {
            match key.as_str() {
                "_id" => {}
                "_metadata" => {
                    if let Some(perms) = value.get("class_permissions") {
                        class_permissions = perms.clone();
                    }
                }
                field => {
                    let token = value.as_str().ok_or_else(|| {
                        PlinthError::Serialization(format!(
                            "schema field '{}' has a non-string type token",
                            field
                        ))
                    })?;
                    fields.insert(field.to_string(), token.to_string());
                }
            }
        }
        Ok(StorageSchema {
            class_name,
            fields,
            class_permissions,
        })
    }
}

/// Raw CRUD plus schema DDL against one physical store.
///
/// Implementations must be safe to share across request workers; the engine
/// performs no storage-level retries or cancellation on top of them.
pub trait StorageAdapter: Send + Sync {
    /// Persists a new class schema. Fails with `InvalidClassName` if the
    /// class already has a schema document.
    fn create_class(&self, schema: &StorageSchema) -> PlinthResult<StorageSchema>;

    /// Adds one field to a class schema if absent, creating the schema
    /// document when the class is new. A field already present with a
    /// different type token fails with `IncorrectType`; the same token is a
    /// no-op. The check-and-add is atomic with respect to other writers.
    fn add_field_if_not_exists(
        &self,
        class_name: &str,
        field_name: &str,
        type_token: &str,
    ) -> PlinthResult<()>;

    /// Removes fields from the schema document and strips the corresponding
    /// keys from every stored record.
    fn delete_fields(&self, class_name: &str, field_names: &[String]) -> PlinthResult<()>;

    /// Drops a class: its records and its schema document. Absent classes
    /// are not an error.
    fn delete_class(&self, class_name: &str) -> PlinthResult<()>;

    fn get_class(&self, class_name: &str) -> PlinthResult<Option<StorageSchema>>;

    fn get_all_classes(&self) -> PlinthResult<Vec<StorageSchema>>;

    /// Inserts one storage-shaped document. Duplicate `_id` or a violated
    /// uniqueness constraint is a `Storage` error.
    fn create_object(&self, class_name: &str, object: &Value) -> PlinthResult<()>;

    fn find(
        &self,
        class_name: &str,
        query: &Value,
        options: &AdapterFindOptions,
    ) -> PlinthResult<Vec<Value>>;

    fn count(&self, class_name: &str, query: &Value) -> PlinthResult<u64>;

    /// Applies a grouped update to every matching document; returns the
    /// match count.
    fn update_objects_by_query(
        &self,
        class_name: &str,
        query: &Value,
        update: &Value,
    ) -> PlinthResult<u64>;

    /// Applies a grouped update to the first matching document and returns
    /// the updated document.
    fn find_one_and_update(
        &self,
        class_name: &str,
        query: &Value,
        update: &Value,
    ) -> PlinthResult<Option<Value>>;

    /// Updates the first match, or seeds a new document from the query's
    /// equality fields and applies the update to it.
    fn upsert_one_object(&self, class_name: &str, query: &Value, update: &Value)
        -> PlinthResult<()>;

    /// Deletes every matching document; returns the deleted count.
    fn delete_objects_by_query(&self, class_name: &str, query: &Value) -> PlinthResult<u64>;

    /// Registers a uniqueness constraint over the given fields, enforced on
    /// subsequent inserts.
    fn ensure_uniqueness(&self, class_name: &str, field_names: &[String]) -> PlinthResult<()>;
}
