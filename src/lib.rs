//! Schema-mediated document engine.
//!
//! plinth sits between a REST-shaped JSON surface and a pluggable storage
//! backend. Every class of records carries a live schema that is learned
//! from the objects written to it, and every read and write crosses one
//! translation boundary: REST field names, typed atoms, ACLs and query
//! operators on one side; storage keys, flattened values and permission
//! vectors on the other.
//!
//! [`DatabaseController`] is the entry point. It owns a [`StorageAdapter`],
//! keeps class schemas cached through a [`SchemaController`], rewrites
//! relation clauses against `_Join` collections, enforces class-level
//! permissions and ACLs, and hands the adapter nothing but fully
//! transformed queries and documents. [`MemoryAdapter`] backs tests and
//! [`SledAdapter`] backs persistent stores; anything else can plug in by
//! implementing [`StorageAdapter`].

pub mod adapter;
pub mod database;
pub mod error;
pub mod relation;
pub mod schema;
pub mod transform;
pub mod value;

pub use adapter::{
    AdapterFindOptions, MemoryAdapter, SledAdapter, SortOrder, StorageAdapter, StorageSchema,
};
pub use database::{DatabaseController, FindOptions, UpdateOptions, WriteOptions};
pub use error::{PlinthError, PlinthResult};
pub use relation::RelationManager;
pub use schema::{ClassLevelPermissions, ClassSchema, FieldType, SchemaCache, SchemaController};
pub use value::RestValue;
