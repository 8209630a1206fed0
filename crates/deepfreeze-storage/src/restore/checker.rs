use std::collections::HashMap;
use std::sync::Arc;

use deepfreeze_core::{CoreResult, ObjectRestoreState, Repository, RestoreStatus};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::object_store::{ArchiveObject, ArchiveStore};

/// Default upper bound on concurrent metadata lookups.
pub const DEFAULT_MAX_STATUS_WORKERS: usize = 15;

/// Computes a repository's aggregate restore status from object metadata.
///
/// Lookups run on a worker pool bounded to `min(max_workers, objects)`; results
/// are merged as they arrive. A failed lookup counts as not restored.
#[derive(Clone)]
pub struct RestoreStatusChecker {
    store: Arc<dyn ArchiveStore>,
    max_workers: usize,
}

impl RestoreStatusChecker {
    pub fn new(store: Arc<dyn ArchiveStore>) -> Self {
        Self::with_max_workers(store, DEFAULT_MAX_STATUS_WORKERS)
    }

    pub fn with_max_workers(store: Arc<dyn ArchiveStore>, max_workers: usize) -> Self {
        Self {
            store,
            max_workers: max_workers.max(1),
        }
    }

    /// Check every object under the repository's base path.
    ///
    /// Fails only if the listing fails. An empty listing is reported as an
    /// empty, incomplete status.
    pub async fn check(&self, repo: &Repository) -> CoreResult<RestoreStatus> {
        let prefix = repo.object_prefix();
        let objects = self.store.list_objects(&repo.bucket, &prefix).await?;

        if objects.is_empty() {
            tracing::warn!(
                repo = %repo.name,
                bucket = %repo.bucket,
                prefix = %prefix,
                "No objects found under base path; restore cannot be confirmed"
            );
            return Ok(RestoreStatus::default());
        }

        let status = self.check_objects(&repo.bucket, objects).await;
        tracing::info!(
            repo = %repo.name,
            total = status.total,
            restored = status.restored,
            in_progress = status.in_progress,
            not_requested = status.not_requested,
            lookup_errors = status.lookup_errors,
            complete = status.complete,
            "Restore status checked"
        );
        Ok(status)
    }

    /// Classify `objects`, looking up archival (or unknown-class) ones.
    pub async fn check_objects(&self, bucket: &str, objects: Vec<ArchiveObject>) -> RestoreStatus {
        let mut status = RestoreStatus::default();
        let mut lookups = Vec::new();

        for object in objects {
            match &object.storage_class {
                Some(class) if !class.is_archival() => {
                    status.record(&object.key, Some(ObjectRestoreState::Restored));
                }
                _ => lookups.push(object.key),
            }
        }

        if lookups.is_empty() {
            return status;
        }

        let workers = self.max_workers.min(lookups.len());
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_set = JoinSet::new();

        for key in &lookups {
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            let bucket = bucket.to_string();
            let key = key.clone();

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (key, None);
                };

                match store.head_object(&bucket, &key).await {
                    Ok(head) => {
                        let state =
                            ObjectRestoreState::classify(&head.storage_class, head.restore.as_deref());
                        tracing::debug!(key = %key, ?state, "Object restore state");
                        (key, Some(state))
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Restore metadata lookup failed");
                        (key, None)
                    }
                }
            });
        }

        let mut results: HashMap<String, Option<ObjectRestoreState>> =
            HashMap::with_capacity(lookups.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((key, state)) => {
                    results.insert(key, state);
                }
                Err(e) => tracing::error!(error = %e, "Restore status task failed"),
            }
        }

        // Keys whose task never reported are counted as failed lookups.
        for key in lookups {
            let state = results.remove(&key).flatten();
            status.record(&key, state);
        }

        status
    }
}
