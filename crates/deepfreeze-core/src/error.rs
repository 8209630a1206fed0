use serde::Serialize;
use thiserror::Error;

/// Per-repository failure detail carried by [`CoreError::PartialRefreezeFailure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryFailure {
    /// Repository that could not be processed.
    pub repository: String,
    /// Human-readable reason.
    pub reason: String,
}

/// Canonical error type for thaw/refreeze lifecycle operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity was not found in the status store or object storage.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"repository"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Entity already exists and cannot be created again.
    #[error("{entity} `{id}` already exists")]
    AlreadyExists {
        /// Entity type name.
        entity: &'static str,
        /// Identifier that conflicts.
        id: String,
    },

    /// The status store could not be reached or failed an I/O operation.
    #[error("status store unavailable: {0}")]
    StoreUnavailable(String),

    /// A conditional write lost a race against a concurrent writer.
    #[error("concurrent modification of `{id}`")]
    Conflict {
        /// Identifier of the contested record.
        id: String,
    },

    /// A restore call against a single object failed.
    #[error("restore of `{key}` failed: {message}")]
    RestoreCallFailed {
        /// Object key.
        key: String,
        /// Backend error message.
        message: String,
    },

    /// None of the selected repositories can start a new thaw.
    #[error("thaw already in progress: {message}")]
    AlreadyInProgress {
        /// Explanation listing the conflicting repositories.
        message: String,
    },

    /// Some repositories of a request were refrozen and some were not.
    #[error(
        "refreeze of request `{request_id}` partially failed: {} refrozen, {} failed",
        refrozen.len(),
        failed.len()
    )]
    PartialRefreezeFailure {
        /// Thaw request being refrozen.
        request_id: String,
        /// Repositories now FROZEN.
        refrozen: Vec<String>,
        /// Repositories left in their previous state.
        failed: Vec<RepositoryFailure>,
    },

    /// Operation violates current state machine rules.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },

    /// Object-storage transport error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Search-cluster collaborator error (mount, unmount, delete).
    #[error("cluster error: {0}")]
    ClusterError(String),

    /// Validation error for input data.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Persisted document failed to deserialize into its record type.
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `AlreadyExists` variant.
    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    /// Creates a `Conflict` variant.
    #[must_use]
    pub fn conflict(id: impl Into<String>) -> Self {
        Self::Conflict { id: id.into() }
    }

    /// Creates an `AlreadyInProgress` variant.
    #[must_use]
    pub fn already_in_progress(message: impl Into<String>) -> Self {
        Self::AlreadyInProgress {
            message: message.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() || err.is_syntax() || err.is_data() {
            Self::DeserializationError(err.to_string())
        } else {
            Self::SerializationError(err.to_string())
        }
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_refreeze_message() {
        let err = CoreError::PartialRefreezeFailure {
            request_id: "abc".into(),
            refrozen: vec!["a".into()],
            failed: vec![RepositoryFailure {
                repository: "b".into(),
                reason: "unmount failed".into(),
            }],
        };
        assert_eq!(
            err.to_string(),
            "refreeze of request `abc` partially failed: 1 refrozen, 1 failed"
        );
    }

    #[test]
    fn test_json_data_error_is_deserialization() {
        let err: CoreError = serde_json::from_str::<u32>("\"nope\"").unwrap_err().into();
        assert!(matches!(err, CoreError::DeserializationError(_)));
    }
}
