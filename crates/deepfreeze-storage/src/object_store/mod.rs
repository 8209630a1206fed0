//! Archive store abstraction for S3-compatible object storage
//!
//! Provides the listing, metadata and restore calls the thaw lifecycle needs:
//! - AWS S3 (production)
//! - MinIO and other S3-compatible endpoints
//! - In-memory mock with restore simulation (testing)

mod mock;
mod s3;

pub use mock::{CallHistoryEntry, MockArchiveConfig, MockArchiveStore, MockFailure};
pub use s3::{S3ArchiveStore, S3Config};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deepfreeze_core::{CoreResult, RetrievalTier, StorageClass};
use serde::{Deserialize, Serialize};

/// Object descriptor returned by list operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveObject {
    /// Object key (full path within the bucket)
    pub key: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Last modification timestamp
    pub last_modified: DateTime<Utc>,
    /// Storage class, when the listing reports one
    pub storage_class: Option<StorageClass>,
}

/// Per-object metadata relevant to restores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub key: String,
    pub storage_class: StorageClass,
    /// Raw restore indicator header, absent if no restore is on record
    pub restore: Option<String>,
}

/// Result of a single restore call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreOutcome {
    /// A new restore was started
    Initiated,
    /// A restore for this object is already running
    AlreadyInProgress,
    /// The object is already readable (restored copy or non-archival class)
    AlreadyRestored,
}

/// Archive store trait - the object-storage calls used by thaw and expiry
///
/// All implementations must be thread-safe (Send + Sync) and support
/// concurrent operations.
///
/// # Error Handling
///
/// - `CoreError::NotFound` - Object does not exist (`head_object`)
/// - `CoreError::StorageError` - Backend-specific error (network, permissions, etc.)
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// List every object under `prefix`, following continuation tokens.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> CoreResult<Vec<ArchiveObject>>;

    /// Fetch storage class and restore indicator without downloading.
    async fn head_object(&self, bucket: &str, key: &str) -> CoreResult<ObjectHead>;

    /// Ask the service to make an archived object readable for `days`.
    ///
    /// Idempotent: an object already restoring or restored is not an error.
    async fn restore_object(
        &self,
        bucket: &str,
        key: &str,
        days: u32,
        tier: RetrievalTier,
    ) -> CoreResult<RestoreOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_object_serialization() {
        let object = ArchiveObject {
            key: "snapshots/000001/index-0".to_string(),
            size_bytes: 1024,
            last_modified: Utc::now(),
            storage_class: Some(StorageClass::DeepArchive),
        };

        let json = serde_json::to_string(&object).unwrap();
        assert!(json.contains("\"DEEP_ARCHIVE\""));
        let deserialized: ArchiveObject = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, object);
    }
}
