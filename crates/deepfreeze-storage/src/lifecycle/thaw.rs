use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use deepfreeze_core::{
    CoreError, CoreResult, DateRange, Repository, RepositoryState, RequestId, RestoreStatus,
    RetrievalTier, StatusRecord, StatusStore, ThawConfig, ThawRequest, ThawStatus,
};
use serde::Serialize;
use tokio::time::Instant;

use super::state_machine::RepositoryStateMachine;
use crate::restore::{RestoreBatchReport, RestoreInitiator, RestoreStatusChecker};

/// Warning attached to repositories whose base path lists no objects.
pub const EMPTY_REPOSITORY_WARNING: &str = "no objects found under base path";

/// Which repositories a thaw request covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoSelector {
    /// Explicit repository names.
    Names(Vec<String>),
    /// Every repository whose coverage overlaps the range.
    DateRange(DateRange),
}

/// How long `create_thaw_request` keeps control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThawMode {
    /// Return right after the restores are issued.
    Async,
    /// Poll until the request leaves `in_progress` or the deadline passes.
    Sync { deadline: Duration },
}

/// Parameters of a new thaw request.
#[derive(Debug, Clone)]
pub struct ThawParams {
    pub selector: RepoSelector,
    /// Indices created in this range are mounted once every repository is thawed.
    pub date_range: Option<DateRange>,
    /// Defaults to `thaw.default_duration_days`.
    pub duration_days: Option<u32>,
    /// Defaults to `thaw.default_tier`.
    pub tier: Option<RetrievalTier>,
    pub mode: ThawMode,
}

impl ThawParams {
    pub fn repositories<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selector: RepoSelector::Names(names.into_iter().map(Into::into).collect()),
            date_range: None,
            duration_days: None,
            tier: None,
            mode: ThawMode::Async,
        }
    }

    /// Select by coverage and mount the indices in `range`.
    pub fn covering(range: DateRange) -> Self {
        Self {
            selector: RepoSelector::DateRange(range),
            date_range: Some(range),
            duration_days: None,
            tier: None,
            mode: ThawMode::Async,
        }
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn with_duration_days(mut self, days: u32) -> Self {
        self.duration_days = Some(days);
        self
    }

    pub fn with_tier(mut self, tier: RetrievalTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn synchronous(mut self, deadline: Duration) -> Self {
        self.mode = ThawMode::Sync { deadline };
        self
    }
}

/// A selected repository that was not thawed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRepo {
    pub name: String,
    pub reason: String,
}

/// Result of `create_thaw_request`.
#[derive(Debug, Clone, Serialize)]
pub struct ThawOutcome {
    pub request_id: RequestId,
    pub status: ThawStatus,
    /// Repositories moved to THAWING by this request.
    pub thawing: Vec<String>,
    pub skipped: Vec<SkippedRepo>,
    pub restores: Vec<RestoreBatchReport>,
    /// Last status check, in synchronous mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ThawProgress>,
}

/// Per-repository line of a progress summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoProgress {
    pub name: String,
    /// `None` when the repository no longer exists.
    pub state: Option<RepositoryState>,
    pub mounted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore: Option<RestoreStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepoProgress {
    fn of(repo: &Repository) -> Self {
        Self {
            name: repo.name.clone(),
            state: Some(repo.state),
            mounted: repo.is_mounted,
            restore: None,
            warning: None,
            error: None,
        }
    }

    fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: None,
            mounted: false,
            restore: None,
            warning: None,
            error: Some(format!("repository `{name}` was not found")),
        }
    }

    pub fn is_thawed(&self) -> bool {
        self.state == Some(RepositoryState::Thawed) && self.mounted
    }
}

/// Result of `check_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThawProgress {
    pub request_id: RequestId,
    pub status: ThawStatus,
    pub repos: Vec<RepoProgress>,
    /// Indices mounted by this check.
    pub indices_mounted: usize,
}

impl ThawProgress {
    pub fn thawed(&self) -> usize {
        self.repos.iter().filter(|r| r.is_thawed()).count()
    }
}

/// Drives thaw requests from creation to completion.
///
/// Holds no request state between calls; everything is read from and
/// written back to the status store, so `check_status` may be called from
/// any process on any schedule.
#[derive(Clone)]
pub struct ThawOrchestrator {
    store: Arc<dyn StatusStore>,
    machine: RepositoryStateMachine,
    initiator: RestoreInitiator,
    checker: RestoreStatusChecker,
    config: ThawConfig,
}

impl ThawOrchestrator {
    pub fn new(
        store: Arc<dyn StatusStore>,
        machine: RepositoryStateMachine,
        initiator: RestoreInitiator,
        checker: RestoreStatusChecker,
        config: ThawConfig,
    ) -> Self {
        Self {
            store,
            machine,
            initiator,
            checker,
            config,
        }
    }

    /// Create a thaw request and start restoring its repositories.
    ///
    /// # Errors
    ///
    /// - `NotFound` if a named repository does not exist
    /// - `ValidationError` if the selection is empty or the duration is zero
    /// - `AlreadyInProgress` if no selected repository is FROZEN or EXPIRED,
    ///   including when every one of them is taken by a concurrent request
    pub async fn create_thaw_request(&self, params: ThawParams) -> CoreResult<ThawOutcome> {
        let days = params
            .duration_days
            .unwrap_or(self.config.default_duration_days);
        if days == 0 {
            return Err(CoreError::ValidationError(
                "thaw duration must be at least one day".to_string(),
            ));
        }
        let tier = params.tier.unwrap_or(self.config.default_tier);

        let selected = self.resolve(&params.selector).await?;
        let (eligible, ineligible): (Vec<Repository>, Vec<Repository>) = selected
            .into_iter()
            .partition(|repo| repo.state.is_thawable());

        let mut skipped: Vec<SkippedRepo> = ineligible
            .iter()
            .map(|repo| SkippedRepo {
                name: repo.name.clone(),
                reason: format!("repository is {}", repo.state),
            })
            .collect();

        if eligible.is_empty() {
            return Err(nothing_to_thaw(&skipped));
        }

        let mut request = ThawRequest::new(eligible.iter().map(|r| r.name.clone()), params.date_range)
            .with_restore_params(days, tier);

        // Written once the first repository is THAWING.
        let mut persisted = false;
        let mut thawing = Vec::with_capacity(eligible.len());
        let mut restores = Vec::with_capacity(eligible.len());
        for repo in &eligible {
            let repo = match self.machine.begin_thaw(&repo.name, Utc::now(), days).await {
                Ok(repo) => repo,
                Err(e @ (CoreError::InvalidState { .. } | CoreError::Conflict { .. })) => {
                    tracing::warn!(repo = %repo.name, error = %e, "Repository taken by another thaw");
                    skipped.push(SkippedRepo {
                        name: repo.name.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !persisted {
                self.store
                    .save(&StatusRecord::ThawRequest(request.clone()))
                    .await?;
                persisted = true;
                tracing::info!(
                    request_id = %request.request_id,
                    repos = ?request.repos,
                    days,
                    tier = %tier,
                    "Thaw request created"
                );
            }
            thawing.push(repo.name.clone());

            match self.initiator.initiate_repository(&repo, days, tier).await {
                Ok(report) => restores.push(report),
                Err(e) => {
                    // Listing failed; the next status check re-submits.
                    tracing::warn!(repo = %repo.name, error = %e, "Restore initiation failed");
                }
            }
        }

        if !persisted {
            return Err(nothing_to_thaw(&skipped));
        }
        if thawing.len() != request.repos.len() {
            request.repos = thawing.clone();
            self.store
                .save(&StatusRecord::ThawRequest(request.clone()))
                .await?;
        }

        let mut outcome = ThawOutcome {
            request_id: request.request_id,
            status: request.status,
            thawing,
            skipped,
            restores,
            progress: None,
        };

        if let ThawMode::Sync { deadline } = params.mode {
            if outcome.status == ThawStatus::InProgress {
                let progress = self.wait_for_completion(request.request_id, deadline).await?;
                outcome.status = progress.status;
                outcome.progress = Some(progress);
            }
        }

        Ok(outcome)
    }

    /// Poll `check_status` with backoff until the request leaves
    /// `in_progress` or the next wait would overrun `deadline`.
    async fn wait_for_completion(
        &self,
        request_id: RequestId,
        deadline: Duration,
    ) -> CoreResult<ThawProgress> {
        let give_up_at = Instant::now() + deadline;
        let mut attempt = 0;

        loop {
            let progress = self.check_status(request_id).await?;
            if progress.status != ThawStatus::InProgress {
                return Ok(progress);
            }

            let delay = self.poll_delay(attempt);
            if Instant::now() + delay > give_up_at {
                tracing::info!(
                    request_id = %request_id,
                    thawed = progress.thawed(),
                    total = progress.repos.len(),
                    "Deadline reached, request left in progress"
                );
                return Ok(progress);
            }

            tracing::debug!(request_id = %request_id, attempt, ?delay, "Waiting for restores");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn poll_delay(&self, attempt: u32) -> Duration {
        let poll = &self.config.poll;
        let delay_ms = poll.interval_for_attempt(attempt).as_millis() as u64;
        let jitter_range = (delay_ms as f64 * poll.jitter_percent) as u64;
        let jitter = rand::random::<u64>() % (jitter_range + 1);
        Duration::from_millis(delay_ms + jitter)
    }

    /// Advance an in-progress request as far as the restores allow.
    ///
    /// Completed repositories are mounted and marked THAWED. Once every
    /// repository is THAWED the request's date range is mounted and the
    /// request completes. Requests in any other status are only reported.
    pub async fn check_status(&self, request_id: RequestId) -> CoreResult<ThawProgress> {
        let mut request = self.store.get_thaw_request(request_id).await?.record;
        if request.status != ThawStatus::InProgress {
            return self.summarize(&request).await;
        }

        let days = request
            .duration_days
            .unwrap_or(self.config.default_duration_days);
        let tier = request.retrieval_tier.unwrap_or(self.config.default_tier);

        let mut repos = Vec::with_capacity(request.repos.len());
        let mut broken = false;
        for name in &request.repos {
            let repo = match self.machine.get(name).await {
                Ok(repo) => repo,
                Err(e) if e.is_not_found() => {
                    tracing::error!(request_id = %request_id, repo = %name, "Repository vanished during thaw");
                    broken = true;
                    repos.push(RepoProgress::missing(name));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let progress = self.advance(repo, days, tier).await?;
            if progress.state == Some(RepositoryState::Active) {
                broken = true;
            }
            repos.push(progress);
        }

        let mut indices_mounted = 0;
        if broken {
            request.status = ThawStatus::Failed;
            self.store
                .save(&StatusRecord::ThawRequest(request.clone()))
                .await?;
            tracing::error!(request_id = %request_id, "Thaw request failed");
        } else if repos.iter().all(RepoProgress::is_thawed) {
            if let Some(range) = request.date_range() {
                for name in &request.repos {
                    let repo = self.machine.get(name).await?;
                    indices_mounted += self.machine.mount_indices_in_range(&repo, &range).await?;
                }
            }
            request.status = ThawStatus::Completed;
            self.store
                .save(&StatusRecord::ThawRequest(request.clone()))
                .await?;
            tracing::info!(
                request_id = %request_id,
                repos = request.repos.len(),
                indices_mounted,
                "Thaw request completed"
            );
        } else {
            tracing::info!(
                request_id = %request_id,
                thawed = repos.iter().filter(|r| r.is_thawed()).count(),
                total = repos.len(),
                "Thaw request in progress"
            );
        }

        Ok(ThawProgress {
            request_id,
            status: request.status,
            repos,
            indices_mounted,
        })
    }

    async fn advance(
        &self,
        repo: Repository,
        days: u32,
        tier: RetrievalTier,
    ) -> CoreResult<RepoProgress> {
        match repo.state {
            RepositoryState::Thawed => Ok(RepoProgress::of(&repo)),
            RepositoryState::Frozen | RepositoryState::Expired => {
                tracing::info!(repo = %repo.name, state = %repo.state, "Resuming thaw");
                let repo = self.machine.begin_thaw(&repo.name, Utc::now(), days).await?;
                let mut progress = RepoProgress::of(&repo);
                if let Err(e) = self.initiator.initiate_repository(&repo, days, tier).await {
                    progress.error = Some(e.to_string());
                }
                Ok(progress)
            }
            RepositoryState::Thawing => self.advance_thawing(repo, days, tier).await,
            RepositoryState::Active => {
                let mut progress = RepoProgress::of(&repo);
                progress.error = Some("repository is active and was never frozen".to_string());
                Ok(progress)
            }
        }
    }

    async fn advance_thawing(
        &self,
        repo: Repository,
        days: u32,
        tier: RetrievalTier,
    ) -> CoreResult<RepoProgress> {
        let status = match self.checker.check(&repo).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(repo = %repo.name, error = %e, "Restore status check failed");
                let mut progress = RepoProgress::of(&repo);
                progress.error = Some(e.to_string());
                return Ok(progress);
            }
        };

        if status.is_empty() {
            let mut progress = RepoProgress::of(&repo);
            progress.restore = Some(status);
            progress.warning = Some(EMPTY_REPOSITORY_WARNING.to_string());
            return Ok(progress);
        }

        if status.complete {
            return match self.machine.complete_thaw(&repo.name).await {
                Ok(thawed) => {
                    let mut progress = RepoProgress::of(&thawed);
                    progress.restore = Some(status);
                    Ok(progress)
                }
                Err(e @ CoreError::ClusterError(_)) => {
                    tracing::error!(repo = %repo.name, error = %e, "Mount failed");
                    let mut progress = RepoProgress::of(&repo);
                    progress.restore = Some(status);
                    progress.error = Some(e.to_string());
                    Ok(progress)
                }
                Err(e) => Err(e),
            };
        }

        if !status.pending_keys.is_empty() {
            let report = self
                .initiator
                .initiate_keys(&repo, &status.pending_keys, days, tier)
                .await;
            tracing::info!(
                repo = %repo.name,
                resubmitted = report.initiated,
                errored = report.errored,
                "Re-submitted pending restores"
            );
        }

        let mut progress = RepoProgress::of(&repo);
        progress.restore = Some(status);
        Ok(progress)
    }

    async fn summarize(&self, request: &ThawRequest) -> CoreResult<ThawProgress> {
        let mut repos = Vec::with_capacity(request.repos.len());
        for name in &request.repos {
            match self.machine.get(name).await {
                Ok(repo) => repos.push(RepoProgress::of(&repo)),
                Err(e) if e.is_not_found() => repos.push(RepoProgress::missing(name)),
                Err(e) => return Err(e),
            }
        }

        Ok(ThawProgress {
            request_id: request.request_id,
            status: request.status,
            repos,
            indices_mounted: 0,
        })
    }

    /// Persisted requests, oldest first. Without `include_completed` only
    /// `in_progress` and `failed` requests are returned.
    pub async fn list_requests(&self, include_completed: bool) -> CoreResult<Vec<ThawRequest>> {
        let requests = self.store.list_thaw_requests().await?;
        Ok(requests
            .into_iter()
            .filter(|r| include_completed || r.status.is_active())
            .collect())
    }

    async fn resolve(&self, selector: &RepoSelector) -> CoreResult<Vec<Repository>> {
        match selector {
            RepoSelector::Names(names) => {
                if names.is_empty() {
                    return Err(CoreError::ValidationError(
                        "at least one repository must be selected".to_string(),
                    ));
                }
                let mut repos: Vec<Repository> = Vec::with_capacity(names.len());
                for name in names {
                    if repos.iter().any(|r| &r.name == name) {
                        continue;
                    }
                    repos.push(self.machine.get(name).await?);
                }
                Ok(repos)
            }
            RepoSelector::DateRange(range) => {
                let repos: Vec<Repository> = self
                    .store
                    .list_repositories()
                    .await?
                    .into_iter()
                    .filter(|repo| repo.covers(range))
                    .collect();
                if repos.is_empty() {
                    return Err(CoreError::ValidationError(format!(
                        "no repository covers {} to {}",
                        range.start, range.end
                    )));
                }
                Ok(repos)
            }
        }
    }
}

fn nothing_to_thaw(skipped: &[SkippedRepo]) -> CoreError {
    let busy: Vec<String> = skipped
        .iter()
        .map(|s| format!("{} ({})", s.name, s.reason))
        .collect();
    CoreError::already_in_progress(format!(
        "no selected repository can be thawed: {}",
        busy.join(", ")
    ))
}
