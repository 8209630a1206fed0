//! Thaw/refreeze lifecycle built on the status store, the archive store and
//! the search cluster.
//!
//! - [`RepositoryStateMachine`]: guarded, persisted repository transitions
//! - [`ThawOrchestrator`]: thaw request creation, status checks, listing
//! - [`RefreezeOrchestrator`]: per-request refreeze without rollback
//! - [`ExpirationDetector`]: expiry scan and cleanup

mod expiration;
mod refreeze;
mod state_machine;
mod thaw;

pub use expiration::{CleanupReport, ExpirationDetector, ExpirationReport, ExpiredRepo, ExpiryReason};
pub use refreeze::{RefreezeOrchestrator, RefreezeReport};
pub use state_machine::RepositoryStateMachine;
pub use thaw::{
    RepoProgress, RepoSelector, SkippedRepo, ThawMode, ThawOrchestrator, ThawOutcome, ThawParams,
    ThawProgress, EMPTY_REPOSITORY_WARNING,
};
