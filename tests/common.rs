//! Shared fixtures for the integration suite.

use std::sync::Arc;

use plinth::{
    DatabaseController, FindOptions, PlinthError, PlinthResult, SchemaCache, SledAdapter,
    UpdateOptions, WriteOptions,
};
use serde_json::{json, Value};
use tempfile::TempDir;

/// One engine over a throwaway sled store, torn down with the test.
pub struct EngineFixture {
    pub db: DatabaseController,
    pub _temp_dir: TempDir,
}

impl EngineFixture {
    pub fn new() -> PlinthResult<Self> {
        let temp_dir = tempfile::tempdir()
            .map_err(|e| PlinthError::Storage(format!("failed to create temp directory: {}", e)))?;
        let adapter = SledAdapter::open(temp_dir.path())?;
        let db = DatabaseController::new(
            Arc::new(adapter),
            Arc::new(SchemaCache::new(5_000)),
        );
        db.perform_initialization()?;
        Ok(EngineFixture {
            db,
            _temp_dir: temp_dir,
        })
    }
}

/// REST pointer literal.
pub fn pointer(class_name: &str, object_id: &str) -> Value {
    json!({"__type": "Pointer", "className": class_name, "objectId": object_id})
}

/// Read options scoped to a grantee group; pass an empty slice for an
/// anonymous caller.
pub fn find_as(group: &[&str]) -> FindOptions {
    FindOptions {
        acl: Some(group.iter().map(|entry| entry.to_string()).collect()),
        ..FindOptions::default()
    }
}

pub fn write_as(group: &[&str]) -> WriteOptions {
    WriteOptions {
        acl: Some(group.iter().map(|entry| entry.to_string()).collect()),
    }
}

pub fn update_as(group: &[&str]) -> UpdateOptions {
    UpdateOptions {
        acl: Some(group.iter().map(|entry| entry.to_string()).collect()),
        ..UpdateOptions::default()
    }
}
