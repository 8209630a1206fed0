use std::sync::Arc;

use deepfreeze_core::{
    CoreError, CoreResult, RepositoryFailure, RequestId, StatusRecord, StatusStore, ThawStatus,
};
use serde::Serialize;

use super::state_machine::RepositoryStateMachine;

/// Result of a fully successful refreeze.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreezeReport {
    pub request_id: RequestId,
    /// Repositories now FROZEN. Empty when the request was already refrozen.
    pub refrozen: Vec<String>,
    pub status: ThawStatus,
}

/// Returns the repositories of a thaw request to archival-only storage.
///
/// Repositories are processed one by one. A failure does not stop the loop
/// and does not roll back repositories already refrozen.
#[derive(Clone)]
pub struct RefreezeOrchestrator {
    store: Arc<dyn StatusStore>,
    machine: RepositoryStateMachine,
}

impl RefreezeOrchestrator {
    pub fn new(store: Arc<dyn StatusStore>, machine: RepositoryStateMachine) -> Self {
        Self { store, machine }
    }

    /// Refreeze every repository of `request_id`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the request does not exist
    /// - `InvalidState` if the request is still `in_progress`
    /// - `PartialRefreezeFailure` if any repository could not be refrozen;
    ///   the request keeps its status so the call can be repeated
    pub async fn refreeze(&self, request_id: RequestId) -> CoreResult<RefreezeReport> {
        let mut request = self.store.get_thaw_request(request_id).await?.record;

        match request.status {
            ThawStatus::Refrozen => {
                tracing::info!(request_id = %request_id, "Request already refrozen");
                return Ok(RefreezeReport {
                    request_id,
                    refrozen: Vec::new(),
                    status: ThawStatus::Refrozen,
                });
            }
            ThawStatus::InProgress => {
                return Err(CoreError::invalid_state(format!(
                    "thaw request `{request_id}` is still in progress"
                )));
            }
            ThawStatus::Completed | ThawStatus::Failed => {}
        }

        let mut refrozen = Vec::with_capacity(request.repos.len());
        let mut failed = Vec::new();

        for name in &request.repos {
            match self.machine.refreeze(name).await {
                Ok(_) => refrozen.push(name.clone()),
                Err(e) => {
                    tracing::error!(request_id = %request_id, repo = %name, error = %e, "Refreeze failed");
                    failed.push(RepositoryFailure {
                        repository: name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !failed.is_empty() {
            tracing::warn!(
                request_id = %request_id,
                refrozen = refrozen.len(),
                failed = failed.len(),
                "Refreeze partially failed"
            );
            return Err(CoreError::PartialRefreezeFailure {
                request_id: request_id.to_string(),
                refrozen,
                failed,
            });
        }

        request.status = ThawStatus::Refrozen;
        self.store
            .save(&StatusRecord::ThawRequest(request))
            .await?;
        tracing::info!(request_id = %request_id, repos = refrozen.len(), "Request refrozen");

        Ok(RefreezeReport {
            request_id,
            refrozen,
            status: ThawStatus::Refrozen,
        })
    }
}
