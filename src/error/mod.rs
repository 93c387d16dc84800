//! Unified error handling for the engine.
//!
//! Every validation failure is detected before a write reaches the storage
//! adapter and surfaces as one of the typed variants below. Adapter-level
//! failures (connectivity, corrupt documents) pass through as `Storage`
//! without this layer retrying them.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PlinthError {
    #[error("invalid class name: {0}")]
    InvalidClassName(String),

    #[error("invalid key name: {0}")]
    InvalidKeyName(String),

    #[error("invalid nested key: {0}")]
    InvalidNestedKey(String),

    #[error("incorrect type: {0}")]
    IncorrectType(String),

    #[error("cannot change immutable field: {0}")]
    ChangedImmutableField(String),

    #[error("class not empty: {0}")]
    ClassNotEmpty(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("operation forbidden: {0}")]
    OperationForbidden(String),

    #[error("command unavailable: {0}")]
    CommandUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PlinthError {
    /// Permission failures never leak the denying rule, only the operation
    /// and class it refused.
    pub fn forbidden(operation: &str, class_name: &str) -> Self {
        PlinthError::OperationForbidden(format!(
            "permission denied for {} on {}",
            operation, class_name
        ))
    }

    /// Error for a failed mutex acquisition on shared schema state.
    pub fn lock(what: &str) -> Self {
        PlinthError::Internal(format!("failed to acquire {} lock", what))
    }
}

impl From<sled::Error> for PlinthError {
    fn from(error: sled::Error) -> Self {
        PlinthError::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for PlinthError {
    fn from(error: serde_json::Error) -> Self {
        PlinthError::Serialization(error.to_string())
    }
}

pub type PlinthResult<T> = Result<T, PlinthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_names_only_operation_and_class() {
        let err = PlinthError::forbidden("find", "Diary");
        let msg = err.to_string();
        assert!(msg.contains("find"));
        assert!(msg.contains("Diary"));
        assert!(!msg.contains("role:"));
    }

    #[test]
    fn storage_errors_pass_through() {
        let err: PlinthError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, PlinthError::Serialization(_)));
    }
}
