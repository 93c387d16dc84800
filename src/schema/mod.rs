//! Class schemas: the types, their defaults, the TTL cache, and the
//! controller that validates and evolves them.

pub mod cache;
pub mod controller;
pub mod defaults;
pub mod types;

pub use cache::SchemaCache;
pub use controller::SchemaController;
pub use defaults::{default_fields, is_system_class, required_columns};
pub use types::{
    class_name_is_valid, field_name_is_valid, infer_rest_type, is_join_class, join_class_name,
    ClassLevelPermissions, ClassSchema, FieldType,
};
