//! Object storage and lifecycle orchestration for deepfreeze repositories.

pub mod cluster;
pub mod lifecycle;
pub mod object_store;
pub mod restore;

pub use cluster::{ClusterCall, MockSearchCluster};
pub use lifecycle::{
    CleanupReport, ExpirationDetector, ExpirationReport, ExpiredRepo, ExpiryReason,
    RefreezeOrchestrator, RefreezeReport, RepoProgress, RepoSelector, RepositoryStateMachine,
    SkippedRepo, ThawMode, ThawOrchestrator, ThawOutcome, ThawParams, ThawProgress,
};
pub use object_store::{
    ArchiveObject, ArchiveStore, MockArchiveConfig, MockArchiveStore, ObjectHead, RestoreOutcome,
    S3ArchiveStore, S3Config,
};
pub use restore::{
    RestoreBatchReport, RestoreFailure, RestoreInitiator, RestoreStatusChecker,
    DEFAULT_MAX_STATUS_WORKERS,
};
