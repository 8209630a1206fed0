//! Restore initiation and restore-status checking against an [`ArchiveStore`].
//!
//! [`ArchiveStore`]: crate::object_store::ArchiveStore

mod checker;
mod initiator;

pub use checker::{RestoreStatusChecker, DEFAULT_MAX_STATUS_WORKERS};
pub use initiator::{RestoreBatchReport, RestoreFailure, RestoreInitiator};
