//! Durable storage backend on sled.
//!
//! One tree per class (`objects:<class>`), one document per record keyed by
//! its `_id`, values stored as JSON bytes. Schema documents are ordinary
//! records in the `_SCHEMA` collection's tree so the generic document
//! operations reach them; the dedicated schema methods add compare-and-swap
//! semantics on top. Every mutation is flushed so the store survives an
//! abrupt process exit.

use std::path::Path;

use serde_json::Value;
use uuid::Uuid;

use crate::error::{PlinthError, PlinthResult};

use super::matcher;
use super::{AdapterFindOptions, StorageAdapter, StorageSchema, SCHEMA_COLLECTION};

const OBJECTS_TREE_PREFIX: &str = "objects:";
const UNIQUE_TREE: &str = "unique_indexes";

/// How many times a schema compare-and-swap retries before giving up.
const CAS_ATTEMPTS: usize = 10;

pub struct SledAdapter {
    db: sled::Db,
    unique_tree: sled::Tree,
}

impl SledAdapter {
    pub fn new(db: sled::Db) -> PlinthResult<Self> {
        let unique_tree = db.open_tree(UNIQUE_TREE)?;
        Ok(SledAdapter { db, unique_tree })
    }

    pub fn open(path: impl AsRef<Path>) -> PlinthResult<Self> {
        let db = sled::open(path)?;
        SledAdapter::new(db)
    }

    fn objects_tree(&self, class_name: &str) -> PlinthResult<sled::Tree> {
        Ok(self
            .db
            .open_tree(format!("{}{}", OBJECTS_TREE_PREFIX, class_name))?)
    }

    fn schema_tree(&self) -> PlinthResult<sled::Tree> {
        self.objects_tree(SCHEMA_COLLECTION)
    }

    fn decode(bytes: &[u8]) -> PlinthResult<Value> {
        serde_json::from_slice(bytes)
            .map_err(|e| PlinthError::Serialization(format!("stored document is corrupt: {}", e)))
    }

    fn unique_indexes(&self, class_name: &str) -> PlinthResult<Vec<Vec<String>>> {
        match self.unique_tree.get(class_name.as_bytes())? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                PlinthError::Serialization(format!("unique index record is corrupt: {}", e))
            }),
            None => Ok(Vec::new()),
        }
    }

    fn check_unique(
        &self,
        tree: &sled::Tree,
        indexes: &[Vec<String>],
        candidate: &Value,
    ) -> PlinthResult<()> {
        for fields in indexes {
            let key = match unique_key(candidate, fields) {
                Some(key) => key,
                None => continue,
            };
            for entry in tree.iter() {
                let (_, bytes) = entry?;
                let existing = Self::decode(&bytes)?;
                if unique_key(&existing, fields).as_deref() == Some(key.as_str()) {
                    return Err(PlinthError::Storage(format!(
                        "duplicate value for unique index ({})",
                        fields.join(", ")
                    )));
                }
            }
        }
        Ok(())
    }
}

fn unique_key(doc: &Value, fields: &[String]) -> Option<String> {
    let mut probe = serde_json::Map::new();
    for field in fields {
        probe.insert(field.clone(), matcher::get_path(doc, field)?.clone());
    }
    Some(Value::Object(probe).to_string())
}

fn document_id(object: &Value) -> String {
    object
        .get("_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
}

impl StorageAdapter for SledAdapter {
    fn create_class(&self, schema: &StorageSchema) -> PlinthResult<StorageSchema> {
        let tree = self.schema_tree()?;
        let bytes = serde_json::to_vec(&schema.to_document())?;
        let swapped = tree.compare_and_swap(
            schema.class_name.as_bytes(),
            None as Option<&[u8]>,
            Some(bytes),
        )?;
        if swapped.is_err() {
            return Err(PlinthError::InvalidClassName(format!(
                "Class {} already exists.",
                schema.class_name
            )));
        }
        tree.flush()?;
        Ok(schema.clone())
    }

    fn add_field_if_not_exists(
        &self,
        class_name: &str,
        field_name: &str,
        type_token: &str,
    ) -> PlinthResult<()> {
        let tree = self.schema_tree()?;
        for _ in 0..CAS_ATTEMPTS {
            let old = tree.get(class_name.as_bytes())?;
            let mut schema = match &old {
                Some(bytes) => StorageSchema::from_document(&Self::decode(bytes)?)?,
                None => StorageSchema::new(class_name),
            };
            match schema.fields.get(field_name) {
                Some(existing) if existing == type_token => return Ok(()),
                Some(existing) => {
                    return Err(PlinthError::IncorrectType(format!(
                        "schema mismatch for {}.{}; expected {} but got {}",
                        class_name, field_name, existing, type_token
                    )))
                }
                None => {}
            }
            schema
                .fields
                .insert(field_name.to_string(), type_token.to_string());
            let new_bytes = serde_json::to_vec(&schema.to_document())?;
            let swapped =
                tree.compare_and_swap(class_name.as_bytes(), old.as_ref(), Some(new_bytes))?;
            if swapped.is_ok() {
                tree.flush()?;
                return Ok(());
            }
        }
        Err(PlinthError::Storage(format!(
            "too much contention updating the schema document for {}",
            class_name
        )))
    }

    fn delete_fields(&self, class_name: &str, field_names: &[String]) -> PlinthResult<()> {
        let schema_tree = self.schema_tree()?;
        let schema = match schema_tree.get(class_name.as_bytes())? {
            Some(bytes) => Some(StorageSchema::from_document(&Self::decode(&bytes)?)?),
            None => None,
        };
        let columns: Vec<String> = field_names
            .iter()
            .map(|field| {
                let is_pointer = schema
                    .as_ref()
                    .and_then(|schema| schema.fields.get(field))
                    .map(|token| token.starts_with('*'))
                    .unwrap_or(false);
                if is_pointer {
                    format!("_p_{}", field)
                } else {
                    field.clone()
                }
            })
            .collect();
        if let Some(mut schema) = schema {
            for field in field_names {
                schema.fields.remove(field);
            }
            schema_tree.insert(
                class_name.as_bytes(),
                serde_json::to_vec(&schema.to_document())?,
            )?;
            schema_tree.flush()?;
        }
        let tree = self.objects_tree(class_name)?;
        for entry in tree.iter() {
            let (id, bytes) = entry?;
            let mut doc = Self::decode(&bytes)?;
            if let Some(obj) = doc.as_object_mut() {
                for column in &columns {
                    obj.remove(column);
                }
            }
            tree.insert(id, serde_json::to_vec(&doc)?)?;
        }
        tree.flush()?;
        Ok(())
    }

    fn delete_class(&self, class_name: &str) -> PlinthResult<()> {
        self.db
            .drop_tree(format!("{}{}", OBJECTS_TREE_PREFIX, class_name))?;
        let schema_tree = self.schema_tree()?;
        schema_tree.remove(class_name.as_bytes())?;
        schema_tree.flush()?;
        self.unique_tree.remove(class_name.as_bytes())?;
        self.unique_tree.flush()?;
        Ok(())
    }

    fn get_class(&self, class_name: &str) -> PlinthResult<Option<StorageSchema>> {
        match self.schema_tree()?.get(class_name.as_bytes())? {
            Some(bytes) => Ok(Some(StorageSchema::from_document(&Self::decode(&bytes)?)?)),
            None => Ok(None),
        }
    }

    fn get_all_classes(&self) -> PlinthResult<Vec<StorageSchema>> {
        let mut schemas = Vec::new();
        for entry in self.schema_tree()?.iter() {
            let (_, bytes) = entry?;
            schemas.push(StorageSchema::from_document(&Self::decode(&bytes)?)?);
        }
        Ok(schemas)
    }

    fn create_object(&self, class_name: &str, object: &Value) -> PlinthResult<()> {
        let tree = self.objects_tree(class_name)?;
        let id = document_id(object);
        if tree.contains_key(id.as_bytes())? {
            return Err(PlinthError::Storage(format!(
                "duplicate objectId {} in {}",
                id, class_name
            )));
        }
        self.check_unique(&tree, &self.unique_indexes(class_name)?, object)?;
        let mut doc = object.clone();
        if let Some(obj) = doc.as_object_mut() {
            obj.insert("_id".to_string(), Value::String(id.clone()));
        }
        tree.insert(id.as_bytes(), serde_json::to_vec(&doc)?)?;
        tree.flush()?;
        Ok(())
    }

    fn find(
        &self,
        class_name: &str,
        query: &Value,
        options: &AdapterFindOptions,
    ) -> PlinthResult<Vec<Value>> {
        let tree = self.objects_tree(class_name)?;
        let mut results = Vec::new();
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            let doc = Self::decode(&bytes)?;
            if matcher::matches_query(&doc, query)? {
                results.push(doc);
            }
        }
        Ok(matcher::apply_find_options(results, options))
    }

    fn count(&self, class_name: &str, query: &Value) -> PlinthResult<u64> {
        let tree = self.objects_tree(class_name)?;
        let mut total = 0;
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            if matcher::matches_query(&Self::decode(&bytes)?, query)? {
                total += 1;
            }
        }
        Ok(total)
    }

    fn update_objects_by_query(
        &self,
        class_name: &str,
        query: &Value,
        update: &Value,
    ) -> PlinthResult<u64> {
        let tree = self.objects_tree(class_name)?;
        let mut updated = 0;
        for entry in tree.iter() {
            let (id, bytes) = entry?;
            let mut doc = Self::decode(&bytes)?;
            if matcher::matches_query(&doc, query)? {
                let obj = doc.as_object_mut().ok_or_else(|| {
                    PlinthError::Storage("stored document is not an object".to_string())
                })?;
                matcher::apply_update(obj, update)?;
                tree.insert(id, serde_json::to_vec(&doc)?)?;
                updated += 1;
            }
        }
        if updated > 0 {
            tree.flush()?;
        }
        Ok(updated)
    }

    fn find_one_and_update(
        &self,
        class_name: &str,
        query: &Value,
        update: &Value,
    ) -> PlinthResult<Option<Value>> {
        let tree = self.objects_tree(class_name)?;
        for entry in tree.iter() {
            let (id, bytes) = entry?;
            let mut doc = Self::decode(&bytes)?;
            if matcher::matches_query(&doc, query)? {
                let obj = doc.as_object_mut().ok_or_else(|| {
                    PlinthError::Storage("stored document is not an object".to_string())
                })?;
                matcher::apply_update(obj, update)?;
                tree.insert(id, serde_json::to_vec(&doc)?)?;
                tree.flush()?;
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    fn upsert_one_object(
        &self,
        class_name: &str,
        query: &Value,
        update: &Value,
    ) -> PlinthResult<()> {
        let tree = self.objects_tree(class_name)?;
        for entry in tree.iter() {
            let (id, bytes) = entry?;
            let mut doc = Self::decode(&bytes)?;
            if matcher::matches_query(&doc, query)? {
                let obj = doc.as_object_mut().ok_or_else(|| {
                    PlinthError::Storage("stored document is not an object".to_string())
                })?;
                matcher::apply_update(obj, update)?;
                tree.insert(id, serde_json::to_vec(&doc)?)?;
                tree.flush()?;
                return Ok(());
            }
        }
        let mut seed = matcher::seed_from_query(query)?;
        matcher::apply_update(&mut seed, update)?;
        let mut doc = Value::Object(seed);
        let id = document_id(&doc);
        if let Some(obj) = doc.as_object_mut() {
            obj.insert("_id".to_string(), Value::String(id.clone()));
        }
        self.check_unique(&tree, &self.unique_indexes(class_name)?, &doc)?;
        tree.insert(id.as_bytes(), serde_json::to_vec(&doc)?)?;
        tree.flush()?;
        Ok(())
    }

    fn delete_objects_by_query(&self, class_name: &str, query: &Value) -> PlinthResult<u64> {
        let tree = self.objects_tree(class_name)?;
        let mut doomed = Vec::new();
        for entry in tree.iter() {
            let (id, bytes) = entry?;
            if matcher::matches_query(&Self::decode(&bytes)?, query)? {
                doomed.push(id);
            }
        }
        let mut deleted = 0;
        for id in doomed {
            if tree.remove(id)?.is_some() {
                deleted += 1;
            }
        }
        if deleted > 0 {
            tree.flush()?;
        }
        Ok(deleted)
    }

    fn ensure_uniqueness(&self, class_name: &str, field_names: &[String]) -> PlinthResult<()> {
        let fields: Vec<String> = field_names.to_vec();
        let tree = self.objects_tree(class_name)?;
        let mut seen = std::collections::HashSet::new();
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            let doc = Self::decode(&bytes)?;
            if let Some(key) = unique_key(&doc, &fields) {
                if !seen.insert(key) {
                    return Err(PlinthError::Storage(format!(
                        "cannot enforce uniqueness on ({}): duplicate values exist",
                        fields.join(", ")
                    )));
                }
            }
        }
        let mut indexes = self.unique_indexes(class_name)?;
        if !indexes.contains(&fields) {
            indexes.push(fields);
            self.unique_tree
                .insert(class_name.as_bytes(), serde_json::to_vec(&indexes)?)?;
            self.unique_tree.flush()?;
        }
        Ok(())
    }
}
