//! In-memory storage backend.
//!
//! Keeps every class as an ordered id → document map behind one mutex.
//! Schema documents are ordinary records in the `_SCHEMA` collection, keyed
//! by class name, so the generic document operations reach them too. Used by
//! the test suite and for throwaway embedded stores; durability comes from
//! [`SledAdapter`](super::SledAdapter).

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{PlinthError, PlinthResult};

use super::matcher;
use super::{AdapterFindOptions, StorageAdapter, StorageSchema, SCHEMA_COLLECTION};

#[derive(Default)]
struct Store {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
    unique_indexes: BTreeMap<String, Vec<Vec<String>>>,
}

impl Store {
    fn schema_of(&self, class_name: &str) -> PlinthResult<Option<StorageSchema>> {
        match self
            .collections
            .get(SCHEMA_COLLECTION)
            .and_then(|schemas| schemas.get(class_name))
        {
            Some(doc) => Ok(Some(StorageSchema::from_document(doc)?)),
            None => Ok(None),
        }
    }

    fn put_schema(&mut self, schema: &StorageSchema) {
        self.collections
            .entry(SCHEMA_COLLECTION.to_string())
            .or_default()
            .insert(schema.class_name.clone(), schema.to_document());
    }
}

#[derive(Default)]
pub struct MemoryAdapter {
    store: Mutex<Store>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        MemoryAdapter::default()
    }

    fn locked<T>(&self, f: impl FnOnce(&mut Store) -> PlinthResult<T>) -> PlinthResult<T> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| PlinthError::lock("memory adapter store"))?;
        f(&mut store)
    }
}

fn internal_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn unique_key(doc: &Value, fields: &[String]) -> Option<String> {
    let mut probe = Map::new();
    for field in fields {
        probe.insert(field.clone(), matcher::get_path(doc, field)?.clone());
    }
    Some(Value::Object(probe).to_string())
}

fn check_unique(
    collection: &BTreeMap<String, Value>,
    indexes: &[Vec<String>],
    candidate: &Value,
) -> PlinthResult<()> {
    for fields in indexes {
        let key = match unique_key(candidate, fields) {
            Some(key) => key,
            None => continue,
        };
        for existing in collection.values() {
            if unique_key(existing, fields).as_deref() == Some(key.as_str()) {
                return Err(PlinthError::Storage(format!(
                    "duplicate value for unique index ({})",
                    fields.join(", ")
                )));
            }
        }
    }
    Ok(())
}

/// Storage column for a schema field: pointers live under a `_p_` prefix.
fn column_name(schema: Option<&StorageSchema>, field: &str) -> String {
    let is_pointer = schema
        .and_then(|schema| schema.fields.get(field))
        .map(|token| token.starts_with('*'))
        .unwrap_or(false);
    if is_pointer {
        format!("_p_{}", field)
    } else {
        field.to_string()
    }
}

impl StorageAdapter for MemoryAdapter {
    fn create_class(&self, schema: &StorageSchema) -> PlinthResult<StorageSchema> {
        self.locked(|store| {
            if store.schema_of(&schema.class_name)?.is_some() {
                return Err(PlinthError::InvalidClassName(format!(
                    "Class {} already exists.",
                    schema.class_name
                )));
            }
            store.put_schema(schema);
            Ok(schema.clone())
        })
    }

    fn add_field_if_not_exists(
        &self,
        class_name: &str,
        field_name: &str,
        type_token: &str,
    ) -> PlinthResult<()> {
        self.locked(|store| {
            let mut schema = store
                .schema_of(class_name)?
                .unwrap_or_else(|| StorageSchema::new(class_name));
            match schema.fields.get(field_name) {
                Some(existing) if existing == type_token => Ok(()),
                Some(existing) => Err(PlinthError::IncorrectType(format!(
                    "schema mismatch for {}.{}; expected {} but got {}",
                    class_name, field_name, existing, type_token
                ))),
                None => {
                    schema
                        .fields
                        .insert(field_name.to_string(), type_token.to_string());
                    store.put_schema(&schema);
                    Ok(())
                }
            }
        })
    }

    fn delete_fields(&self, class_name: &str, field_names: &[String]) -> PlinthResult<()> {
        self.locked(|store| {
            let schema = store.schema_of(class_name)?;
            let columns: Vec<String> = field_names
                .iter()
                .map(|field| column_name(schema.as_ref(), field))
                .collect();
            if let Some(mut schema) = schema {
                for field in field_names {
                    schema.fields.remove(field);
                }
                store.put_schema(&schema);
            }
            if let Some(collection) = store.collections.get_mut(class_name) {
                for doc in collection.values_mut() {
                    if let Some(obj) = doc.as_object_mut() {
                        for column in &columns {
                            obj.remove(column);
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn delete_class(&self, class_name: &str) -> PlinthResult<()> {
        self.locked(|store| {
            store.collections.remove(class_name);
            store.unique_indexes.remove(class_name);
            if let Some(schemas) = store.collections.get_mut(SCHEMA_COLLECTION) {
                schemas.remove(class_name);
            }
            Ok(())
        })
    }

    fn get_class(&self, class_name: &str) -> PlinthResult<Option<StorageSchema>> {
        self.locked(|store| store.schema_of(class_name))
    }

    fn get_all_classes(&self) -> PlinthResult<Vec<StorageSchema>> {
        self.locked(|store| {
            let mut schemas = Vec::new();
            if let Some(docs) = store.collections.get(SCHEMA_COLLECTION) {
                for doc in docs.values() {
                    schemas.push(StorageSchema::from_document(doc)?);
                }
            }
            Ok(schemas)
        })
    }

    fn create_object(&self, class_name: &str, object: &Value) -> PlinthResult<()> {
        self.locked(|store| {
            let id = object
                .get("_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(internal_id);
            let indexes = store
                .unique_indexes
                .get(class_name)
                .cloned()
                .unwrap_or_default();
            let collection = store.collections.entry(class_name.to_string()).or_default();
            if collection.contains_key(&id) {
                return Err(PlinthError::Storage(format!(
                    "duplicate objectId {} in {}",
                    id, class_name
                )));
            }
            check_unique(collection, &indexes, object)?;
            let mut doc = object.clone();
            if let Some(obj) = doc.as_object_mut() {
                obj.insert("_id".to_string(), Value::String(id.clone()));
            }
            collection.insert(id, doc);
            Ok(())
        })
    }

    fn find(
        &self,
        class_name: &str,
        query: &Value,
        options: &AdapterFindOptions,
    ) -> PlinthResult<Vec<Value>> {
        self.locked(|store| {
            let mut results = Vec::new();
            if let Some(collection) = store.collections.get(class_name) {
                for doc in collection.values() {
                    if matcher::matches_query(doc, query)? {
                        results.push(doc.clone());
                    }
                }
            }
            Ok(matcher::apply_find_options(results, options))
        })
    }

    fn count(&self, class_name: &str, query: &Value) -> PlinthResult<u64> {
        self.locked(|store| {
            let mut total = 0;
            if let Some(collection) = store.collections.get(class_name) {
                for doc in collection.values() {
                    if matcher::matches_query(doc, query)? {
                        total += 1;
                    }
                }
            }
            Ok(total)
        })
    }

    fn update_objects_by_query(
        &self,
        class_name: &str,
        query: &Value,
        update: &Value,
    ) -> PlinthResult<u64> {
        self.locked(|store| {
            let mut updated = 0;
            if let Some(collection) = store.collections.get_mut(class_name) {
                for doc in collection.values_mut() {
                    if matcher::matches_query(doc, query)? {
                        let obj = doc.as_object_mut().ok_or_else(|| {
                            PlinthError::Storage("stored document is not an object".to_string())
                        })?;
                        matcher::apply_update(obj, update)?;
                        updated += 1;
                    }
                }
            }
            Ok(updated)
        })
    }

    fn find_one_and_update(
        &self,
        class_name: &str,
        query: &Value,
        update: &Value,
    ) -> PlinthResult<Option<Value>> {
        self.locked(|store| {
            if let Some(collection) = store.collections.get_mut(class_name) {
                for doc in collection.values_mut() {
                    if matcher::matches_query(doc, query)? {
                        let obj = doc.as_object_mut().ok_or_else(|| {
                            PlinthError::Storage("stored document is not an object".to_string())
                        })?;
                        matcher::apply_update(obj, update)?;
                        return Ok(Some(doc.clone()));
                    }
                }
            }
            Ok(None)
        })
    }

    fn upsert_one_object(
        &self,
        class_name: &str,
        query: &Value,
        update: &Value,
    ) -> PlinthResult<()> {
        self.locked(|store| {
            let indexes = store
                .unique_indexes
                .get(class_name)
                .cloned()
                .unwrap_or_default();
            let collection = store.collections.entry(class_name.to_string()).or_default();
            for doc in collection.values_mut() {
                if matcher::matches_query(doc, query)? {
                    let obj = doc.as_object_mut().ok_or_else(|| {
                        PlinthError::Storage("stored document is not an object".to_string())
                    })?;
                    matcher::apply_update(obj, update)?;
                    return Ok(());
                }
            }
            let mut seed = matcher::seed_from_query(query)?;
            matcher::apply_update(&mut seed, update)?;
            let id = seed
                .get("_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(internal_id);
            seed.insert("_id".to_string(), Value::String(id.clone()));
            let doc = Value::Object(seed);
            check_unique(collection, &indexes, &doc)?;
            collection.insert(id, doc);
            Ok(())
        })
    }

    fn delete_objects_by_query(&self, class_name: &str, query: &Value) -> PlinthResult<u64> {
        self.locked(|store| {
            let mut deleted = 0;
            if let Some(collection) = store.collections.get_mut(class_name) {
                let mut doomed = Vec::new();
                for (id, doc) in collection.iter() {
                    if matcher::matches_query(doc, query)? {
                        doomed.push(id.clone());
                    }
                }
                for id in doomed {
                    collection.remove(&id);
                    deleted += 1;
                }
            }
            Ok(deleted)
        })
    }

    fn ensure_uniqueness(&self, class_name: &str, field_names: &[String]) -> PlinthResult<()> {
        self.locked(|store| {
            let fields: Vec<String> = field_names.to_vec();
            if let Some(collection) = store.collections.get(class_name) {
                let mut seen = std::collections::HashSet::new();
                for doc in collection.values() {
                    if let Some(key) = unique_key(doc, &fields) {
                        if !seen.insert(key) {
                            return Err(PlinthError::Storage(format!(
                                "cannot enforce uniqueness on ({}): duplicate values exist",
                                fields.join(", ")
                            )));
                        }
                    }
                }
            }
            let indexes = store.unique_indexes.entry(class_name.to_string()).or_default();
            if !indexes.contains(&fields) {
                indexes.push(fields);
            }
            Ok(())
        })
    }
}
