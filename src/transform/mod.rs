//! Stateless, bidirectional conversion between REST objects and their
//! storage representation.

pub mod atom;
pub mod query;
pub mod untransform;
pub mod update;

pub use atom::{transform_acl, transform_atom, untransform_acl, AtomPosition};
pub use query::{transform_key, transform_where};
pub use untransform::untransform_object;
pub use update::{increment_keys, storage_object_for_create, transform_update};
