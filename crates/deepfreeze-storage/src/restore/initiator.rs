use std::sync::Arc;

use deepfreeze_core::{CoreResult, Repository, RetrievalTier, StorageClass};
use serde::Serialize;

use crate::object_store::{ArchiveObject, ArchiveStore, RestoreOutcome};

/// A restore call that failed for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreFailure {
    pub key: String,
    pub message: String,
}

/// Counts from one batch of restore calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreBatchReport {
    /// Repository the batch belongs to, when started for one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Objects offered to the batch.
    pub total: usize,
    /// New restores started.
    pub initiated: usize,
    /// Objects already restoring or restored; not an error.
    pub already_restoring: usize,
    /// Outside the prefix or in an instantly readable class.
    pub skipped: usize,
    /// Restore call or storage-class lookup failed.
    pub errored: usize,
    pub errors: Vec<RestoreFailure>,
}

impl RestoreBatchReport {
    fn fail(&mut self, key: &str, message: String) {
        self.errored += 1;
        self.errors.push(RestoreFailure {
            key: key.to_string(),
            message,
        });
    }
}

/// Issues restore calls for archived objects.
///
/// One call per archival object, sequentially. Never waits for completion and
/// never aborts the batch on a single object's failure.
#[derive(Clone)]
pub struct RestoreInitiator {
    store: Arc<dyn ArchiveStore>,
}

impl RestoreInitiator {
    pub fn new(store: Arc<dyn ArchiveStore>) -> Self {
        Self { store }
    }

    /// Restore every archival object under the repository's base path.
    ///
    /// Fails only if the listing itself fails.
    pub async fn initiate_repository(
        &self,
        repo: &Repository,
        days: u32,
        tier: RetrievalTier,
    ) -> CoreResult<RestoreBatchReport> {
        let prefix = repo.object_prefix();
        let objects = self.store.list_objects(&repo.bucket, &prefix).await?;
        if objects.is_empty() {
            tracing::warn!(repo = %repo.name, bucket = %repo.bucket, prefix = %prefix, "No objects found under base path");
        }

        let mut report = self
            .initiate(&repo.bucket, &prefix, &objects, days, tier)
            .await;
        report.repository = Some(repo.name.clone());
        Ok(report)
    }

    /// Re-submit restores for specific keys (used when resuming a thaw).
    ///
    /// The storage class of each key is looked up before the call.
    pub async fn initiate_keys(
        &self,
        repo: &Repository,
        keys: &[String],
        days: u32,
        tier: RetrievalTier,
    ) -> RestoreBatchReport {
        let objects: Vec<ArchiveObject> = keys
            .iter()
            .map(|key| ArchiveObject {
                key: key.clone(),
                size_bytes: 0,
                last_modified: chrono::Utc::now(),
                storage_class: None,
            })
            .collect();

        let mut report = self
            .initiate(&repo.bucket, &repo.object_prefix(), &objects, days, tier)
            .await;
        report.repository = Some(repo.name.clone());
        report
    }

    /// Issue one restore call per archival object in `objects`.
    pub async fn initiate(
        &self,
        bucket: &str,
        prefix: &str,
        objects: &[ArchiveObject],
        days: u32,
        tier: RetrievalTier,
    ) -> RestoreBatchReport {
        let mut report = RestoreBatchReport {
            total: objects.len(),
            ..RestoreBatchReport::default()
        };

        for object in objects {
            if !object.key.starts_with(prefix) {
                tracing::debug!(key = %object.key, prefix = %prefix, "Skipping object outside prefix");
                report.skipped += 1;
                continue;
            }

            let class = match &object.storage_class {
                Some(class) => class.clone(),
                None => match self.lookup_class(bucket, &object.key).await {
                    Ok(class) => class,
                    Err(message) => {
                        tracing::warn!(key = %object.key, error = %message, "Storage class lookup failed");
                        report.fail(&object.key, message);
                        continue;
                    }
                },
            };

            if !class.is_archival() {
                tracing::debug!(key = %object.key, class = %class, "Skipping instantly readable object");
                report.skipped += 1;
                continue;
            }

            match self
                .store
                .restore_object(bucket, &object.key, days, tier)
                .await
            {
                Ok(RestoreOutcome::Initiated) => {
                    tracing::debug!(key = %object.key, days, tier = %tier, "Restore initiated");
                    report.initiated += 1;
                }
                Ok(outcome) => {
                    tracing::debug!(key = %object.key, ?outcome, "Restore already requested");
                    report.already_restoring += 1;
                }
                Err(e) => {
                    tracing::warn!(key = %object.key, error = %e, "Restore call failed");
                    report.fail(&object.key, e.to_string());
                }
            }
        }

        tracing::info!(
            bucket = %bucket,
            prefix = %prefix,
            initiated = report.initiated,
            already_restoring = report.already_restoring,
            skipped = report.skipped,
            errored = report.errored,
            "Restore batch complete"
        );

        report
    }

    async fn lookup_class(&self, bucket: &str, key: &str) -> Result<StorageClass, String> {
        self.store
            .head_object(bucket, key)
            .await
            .map(|head| head.storage_class)
            .map_err(|e| e.to_string())
    }
}
