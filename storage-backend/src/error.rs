use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("resource version mismatch for {name}: expected {expected}, found {actual}")]
    VersionConflict {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(#[from] object_store::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = anyhow::Result<T>;

fn storage_error(err: &anyhow::Error) -> Option<&StorageError> {
    err.downcast_ref::<StorageError>()
}

pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(storage_error(err), Some(StorageError::NotFound { .. }))
}

pub fn is_already_exists(err: &anyhow::Error) -> bool {
    matches!(storage_error(err), Some(StorageError::AlreadyExists { .. }))
}

pub fn is_version_conflict(err: &anyhow::Error) -> bool {
    matches!(storage_error(err), Some(StorageError::VersionConflict { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_wrapped_errors() {
        let err: anyhow::Error = StorageError::VersionConflict {
            name: "svc-a".to_string(),
            expected: "1".to_string(),
            actual: "2".to_string(),
        }
        .into();
        let err = err.context("updating upstream");

        assert!(is_version_conflict(&err));
        assert!(!is_not_found(&err));
        assert!(!is_already_exists(&err));
    }

    #[test]
    fn test_version_conflict_message() {
        let err = StorageError::VersionConflict {
            name: "svc-a".to_string(),
            expected: "1".to_string(),
            actual: "2".to_string(),
        };
        assert!(err.to_string().contains("resource version"));
    }

    #[test]
    fn test_plain_errors_are_not_classified() {
        let err = anyhow::anyhow!("connection refused");
        assert!(!is_not_found(&err));
        assert!(!is_already_exists(&err));
        assert!(!is_version_conflict(&err));
    }
}
