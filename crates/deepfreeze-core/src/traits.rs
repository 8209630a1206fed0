use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::ids::RequestId;
use crate::record::{DocType, StatusRecord};
use crate::repository::Repository;
use crate::settings::{Settings, SETTINGS_ID};
use crate::thaw_request::ThawRequest;

/// Optimistic-concurrency token of a stored record.
///
/// Mirrors the search engine's `_seq_no`/`_primary_term` pair; single-node
/// backends use `primary_term = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordVersion {
    pub seq_no: u64,
    pub primary_term: u64,
}

impl RecordVersion {
    /// Version assigned to a newly created record by single-node backends.
    pub const INITIAL: Self = Self {
        seq_no: 0,
        primary_term: 1,
    };

    /// The version following `self` on the same primary.
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            seq_no: self.seq_no + 1,
            primary_term: self.primary_term,
        }
    }
}

/// A record together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub record: T,
    pub version: RecordVersion,
}

/// Durable storage for repository and thaw-request records.
///
/// Implementations validate documents against their `doctype` on every read,
/// never create records from `update`, and never cache across calls.
///
/// # Error Handling
///
/// - `CoreError::NotFound` - no record with that id (`get`, `update`)
/// - `CoreError::StoreUnavailable` - backend I/O failure; partial writes are not visible
/// - `CoreError::Conflict` - `save_if_version` lost a race
/// - `CoreError::DeserializationError` - stored document does not match its doctype
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Inserts or fully overwrites a record by id.
    async fn save(&self, record: &StatusRecord) -> CoreResult<RecordVersion>;

    /// Overwrites a record only if it is still at `expected`.
    async fn save_if_version(
        &self,
        record: &StatusRecord,
        expected: RecordVersion,
    ) -> CoreResult<RecordVersion>;

    /// Fetches a record and its version.
    async fn get(&self, id: &str) -> CoreResult<Versioned<StatusRecord>>;

    /// Merges `fields` into an existing record and re-validates it.
    async fn update(&self, id: &str, fields: &Map<String, Value>) -> CoreResult<StatusRecord>;

    /// Lists every record of a kind. Empty when the store does not exist yet.
    async fn list(&self, doctype: DocType) -> CoreResult<Vec<StatusRecord>>;

    /// Fetches a repository by name.
    async fn get_repository(&self, name: &str) -> CoreResult<Versioned<Repository>> {
        let versioned = self.get(name).await.map_err(|e| rename_entity(e, "repository"))?;
        Ok(Versioned {
            record: versioned.record.into_repository()?,
            version: versioned.version,
        })
    }

    /// Fetches a thaw request by id.
    async fn get_thaw_request(&self, id: RequestId) -> CoreResult<Versioned<ThawRequest>> {
        let versioned = self
            .get(&id.to_string())
            .await
            .map_err(|e| rename_entity(e, "thaw request"))?;
        Ok(Versioned {
            record: versioned.record.into_thaw_request()?,
            version: versioned.version,
        })
    }

    /// Lists all repositories ordered by name.
    async fn list_repositories(&self) -> CoreResult<Vec<Repository>> {
        let mut repos = self
            .list(DocType::Repository)
            .await?
            .into_iter()
            .map(StatusRecord::into_repository)
            .collect::<CoreResult<Vec<_>>>()?;
        repos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repos)
    }

    /// Lists all thaw requests ordered by creation time.
    async fn list_thaw_requests(&self) -> CoreResult<Vec<ThawRequest>> {
        let mut requests = self
            .list(DocType::ThawRequest)
            .await?
            .into_iter()
            .map(StatusRecord::into_thaw_request)
            .collect::<CoreResult<Vec<_>>>()?;
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    /// Reads the settings record, or defaults when none was saved.
    async fn get_settings(&self) -> CoreResult<Settings> {
        match self.get(SETTINGS_ID).await {
            Ok(versioned) => versioned.record.into_settings(),
            Err(CoreError::NotFound { .. }) => Ok(Settings::default()),
            Err(e) => Err(e),
        }
    }

    /// Persists the settings record.
    async fn save_settings(&self, settings: &Settings) -> CoreResult<()> {
        self.save(&StatusRecord::Settings(settings.clone())).await?;
        Ok(())
    }
}

fn rename_entity(err: CoreError, entity: &'static str) -> CoreError {
    match err {
        CoreError::NotFound { id, .. } => CoreError::NotFound { entity, id },
        other => other,
    }
}

/// An index held in a repository's snapshots, as listed by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotIndex {
    /// Snapshot containing the index.
    pub snapshot: String,
    /// Index name inside the snapshot.
    pub index: String,
    /// Index creation (or snapshot start) time used for date-range selection.
    pub created_at: DateTime<Utc>,
}

/// Search-cluster operations the lifecycle relies on.
///
/// Mount operations are idempotent: mounting something already mounted is a
/// no-op. Deletes of absent targets succeed.
#[async_trait]
pub trait SearchCluster: Send + Sync {
    /// Registers the repository with the cluster.
    async fn mount_repository(&self, repo: &Repository) -> CoreResult<()>;

    /// Removes the repository registration.
    async fn unmount_repository(&self, name: &str) -> CoreResult<()>;

    /// Returns true if the repository is registered.
    async fn is_repository_mounted(&self, name: &str) -> CoreResult<bool>;

    /// Lists indices held by the repository's snapshots with their timestamps.
    async fn list_snapshot_indices(&self, repo: &Repository) -> CoreResult<Vec<SnapshotIndex>>;

    /// Mounts one snapshot index under `mounted_name`.
    async fn mount_index(
        &self,
        repo: &Repository,
        index: &SnapshotIndex,
        mounted_name: &str,
    ) -> CoreResult<()>;

    /// Deletes all indices matching `pattern`; returns how many were deleted.
    async fn delete_indices_matching(&self, pattern: &str) -> CoreResult<usize>;

    /// Deletes an index lifecycle policy.
    async fn delete_lifecycle_policy(&self, name: &str) -> CoreResult<()>;
}
