//! Core domain types and traits for the deepfreeze thaw/refreeze lifecycle.

pub mod config;
pub mod date_range;
pub mod error;
pub mod ids;
pub mod record;
pub mod repository;
pub mod restore;
pub mod settings;
pub mod thaw_request;
pub mod traits;

pub use config::{
    DeepfreezeConfig, ElasticsearchConfig, PollConfig, S3Settings, StatusStoreBackend,
    StatusStoreConfig, ThawConfig,
};
pub use date_range::DateRange;
pub use error::{CoreError, CoreResult, RepositoryFailure};
pub use ids::RequestId;
pub use record::{DocType, StatusRecord};
pub use repository::{Repository, RepositoryState, MOUNTED_INDEX_PREFIX, RESTORE_POLICY_PREFIX};
pub use restore::{ObjectRestoreState, RestoreIndicator, RestoreStatus, RetrievalTier, StorageClass};
pub use settings::{Settings, SETTINGS_ID};
pub use thaw_request::{ThawRequest, ThawStatus};
pub use traits::{RecordVersion, SearchCluster, SnapshotIndex, StatusStore, Versioned};
