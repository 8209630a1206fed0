use std::sync::Arc;

use chrono::{DateTime, Utc};
use deepfreeze_core::{
    CoreResult, RepositoryFailure, RepositoryState, RequestId, StatusRecord, StatusStore,
    ThawStatus,
};
use serde::Serialize;

use super::state_machine::RepositoryStateMachine;
use crate::restore::RestoreStatusChecker;

/// Why a repository was expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    /// The recorded `expires_at` has passed.
    Elapsed,
    /// Object storage reports restored copies gone before `expires_at`.
    RestoreLapsed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiredRepo {
    pub name: String,
    pub reason: ExpiryReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpirationReport {
    /// THAWED repositories examined.
    pub scanned: usize,
    pub expired: Vec<ExpiredRepo>,
    pub errors: Vec<RepositoryFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub expiration: ExpirationReport,
    /// EXPIRED repositories returned to FROZEN.
    pub refrozen: Vec<String>,
    pub failed: Vec<RepositoryFailure>,
    /// Completed requests whose repositories are all FROZEN again.
    pub requests_refrozen: Vec<RequestId>,
}

/// Detects thawed repositories whose restored data is no longer readable.
///
/// Runs on demand. Two signals are used: the locally recorded `expires_at`,
/// and the live restore status of mounted repositories. The live status wins
/// when the two disagree. An empty object listing never expires a repository.
#[derive(Clone)]
pub struct ExpirationDetector {
    store: Arc<dyn StatusStore>,
    machine: RepositoryStateMachine,
    checker: RestoreStatusChecker,
}

impl ExpirationDetector {
    pub fn new(
        store: Arc<dyn StatusStore>,
        machine: RepositoryStateMachine,
        checker: RestoreStatusChecker,
    ) -> Self {
        Self {
            store,
            machine,
            checker,
        }
    }

    /// Move every lapsed THAWED repository to EXPIRED.
    pub async fn scan(&self, now: DateTime<Utc>) -> CoreResult<ExpirationReport> {
        let mut report = ExpirationReport::default();
        let repos = self.store.list_repositories().await?;

        for repo in repos
            .into_iter()
            .filter(|r| r.state == RepositoryState::Thawed)
        {
            report.scanned += 1;

            let reason = if repo.is_expired_at(now) {
                Some(ExpiryReason::Elapsed)
            } else if repo.is_mounted {
                match self.checker.check(&repo).await {
                    Ok(status) if !status.is_empty() && status.not_requested > 0 => {
                        tracing::warn!(
                            repo = %repo.name,
                            not_restored = status.not_requested,
                            expires_at = ?repo.expires_at,
                            "Restored copies lapsed before recorded expiry"
                        );
                        Some(ExpiryReason::RestoreLapsed)
                    }
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!(repo = %repo.name, error = %e, "Live restore check failed");
                        report.errors.push(RepositoryFailure {
                            repository: repo.name.clone(),
                            reason: e.to_string(),
                        });
                        None
                    }
                }
            } else {
                None
            };

            let Some(reason) = reason else {
                continue;
            };

            match self.machine.expire(&repo.name).await {
                Ok(_) => report.expired.push(ExpiredRepo {
                    name: repo.name,
                    reason,
                }),
                Err(e) => {
                    tracing::error!(repo = %repo.name, error = %e, "Expiring repository failed");
                    report.errors.push(RepositoryFailure {
                        repository: repo.name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            expired = report.expired.len(),
            errors = report.errors.len(),
            "Expiration scan complete"
        );
        Ok(report)
    }

    /// Scan, then refreeze every EXPIRED repository and close out completed
    /// requests whose repositories are all FROZEN.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> CoreResult<CleanupReport> {
        let mut report = CleanupReport {
            expiration: self.scan(now).await?,
            ..CleanupReport::default()
        };

        let repos = self.store.list_repositories().await?;
        for repo in repos
            .iter()
            .filter(|r| r.state == RepositoryState::Expired)
        {
            match self.machine.refreeze(&repo.name).await {
                Ok(_) => report.refrozen.push(repo.name.clone()),
                Err(e) => {
                    tracing::error!(repo = %repo.name, error = %e, "Cleanup refreeze failed");
                    report.failed.push(RepositoryFailure {
                        repository: repo.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let repos = self.store.list_repositories().await?;
        let is_frozen = |name: &String| {
            repos
                .iter()
                .any(|r| &r.name == name && r.state == RepositoryState::Frozen)
        };

        for mut request in self.store.list_thaw_requests().await? {
            if request.status != ThawStatus::Completed || !request.repos.iter().all(is_frozen) {
                continue;
            }
            request.status = ThawStatus::Refrozen;
            self.store
                .save(&StatusRecord::ThawRequest(request.clone()))
                .await?;
            tracing::info!(request_id = %request.request_id, "Request closed after cleanup");
            report.requests_refrozen.push(request.request_id);
        }

        tracing::info!(
            refrozen = report.refrozen.len(),
            failed = report.failed.len(),
            requests = report.requests_refrozen.len(),
            "Cleanup complete"
        );
        Ok(report)
    }
}
