use std::sync::Arc;

use chrono::{DateTime, Utc};
use deepfreeze_core::{
    CoreError, CoreResult, DateRange, Repository, RepositoryState, SearchCluster, StatusRecord,
    StatusStore,
};

/// Attempts made for one transition before a `Conflict` is surfaced.
const MAX_TRANSITION_ATTEMPTS: usize = 3;

/// Repository state machine over the status store and the search cluster.
///
/// Every transition is read -> validate -> conditional write, retried on
/// `Conflict`. THAWING is persisted before restores start; THAWED, EXPIRED
/// and FROZEN are persisted only after the cluster side effect succeeded.
#[derive(Clone)]
pub struct RepositoryStateMachine {
    store: Arc<dyn StatusStore>,
    cluster: Arc<dyn SearchCluster>,
}

impl RepositoryStateMachine {
    pub fn new(store: Arc<dyn StatusStore>, cluster: Arc<dyn SearchCluster>) -> Self {
        Self { store, cluster }
    }

    pub async fn get(&self, name: &str) -> CoreResult<Repository> {
        Ok(self.store.get_repository(name).await?.record)
    }

    /// Persist a new repository record.
    pub async fn register(&self, repo: Repository) -> CoreResult<Repository> {
        match self.store.get_repository(&repo.name).await {
            Ok(_) => return Err(CoreError::already_exists("repository", repo.name)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.store
            .save(&StatusRecord::Repository(repo.clone()))
            .await?;
        tracing::info!(repo = %repo.name, state = %repo.state, "Registered repository");
        Ok(repo)
    }

    /// Apply `change` under optimistic concurrency.
    async fn apply<F>(&self, name: &str, change: F) -> CoreResult<Repository>
    where
        F: Fn(&mut Repository) -> CoreResult<()> + Send + Sync,
    {
        for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
            let current = self.store.get_repository(name).await?;
            let mut repo = current.record;
            change(&mut repo)?;

            match self
                .store
                .save_if_version(&StatusRecord::Repository(repo.clone()), current.version)
                .await
            {
                Ok(_) => return Ok(repo),
                Err(CoreError::Conflict { .. }) => {
                    tracing::warn!(repo = %name, attempt, "Concurrent repository update, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(CoreError::conflict(name))
    }

    /// ACTIVE -> FROZEN.
    pub async fn freeze(&self, name: &str) -> CoreResult<Repository> {
        let repo = self.get(name).await?;
        if repo.state != RepositoryState::Active {
            return Err(CoreError::invalid_state(format!(
                "repository `{name}` is {}, only active repositories can be frozen",
                repo.state
            )));
        }

        if repo.is_mounted {
            self.cluster.unmount_repository(name).await?;
        }
        let repo = self.apply(name, Repository::freeze).await?;
        tracing::info!(repo = %name, "Repository frozen");
        Ok(repo)
    }

    /// FROZEN | EXPIRED -> THAWING. Persisted before any restore call.
    pub async fn begin_thaw(
        &self,
        name: &str,
        now: DateTime<Utc>,
        duration_days: u32,
    ) -> CoreResult<Repository> {
        let repo = self
            .apply(name, |repo| repo.begin_thaw(now, duration_days))
            .await?;
        tracing::info!(
            repo = %name,
            expires_at = ?repo.expires_at,
            "Repository thawing"
        );
        Ok(repo)
    }

    /// THAWING -> THAWED: register with the cluster, then persist.
    ///
    /// A repository already THAWED and mounted is returned without cluster calls.
    pub async fn complete_thaw(&self, name: &str) -> CoreResult<Repository> {
        let repo = self.get(name).await?;
        match repo.state {
            RepositoryState::Thawed if repo.is_mounted => return Ok(repo),
            RepositoryState::Thawing => {}
            other => {
                return Err(CoreError::invalid_state(format!(
                    "repository `{name}` is {other}, expected thawing"
                )))
            }
        }

        self.cluster.mount_repository(&repo).await?;
        let repo = self.apply(name, Repository::mark_thawed).await?;
        tracing::info!(repo = %name, "Repository thawed and mounted");
        Ok(repo)
    }

    /// THAWED -> EXPIRED: drop mounted indices and the registration, then persist.
    pub async fn expire(&self, name: &str) -> CoreResult<Repository> {
        let repo = self.get(name).await?;
        if repo.state != RepositoryState::Thawed {
            return Err(CoreError::invalid_state(format!(
                "repository `{name}` is {}, expected thawed",
                repo.state
            )));
        }

        self.cluster
            .delete_indices_matching(&repo.mounted_index_pattern())
            .await?;
        self.cluster.unmount_repository(name).await?;
        let repo = self.apply(name, Repository::mark_expired).await?;
        tracing::info!(repo = %name, "Repository expired");
        Ok(repo)
    }

    /// THAWED | EXPIRED -> FROZEN.
    ///
    /// Deletes mounted indices, unregisters the repository and removes its
    /// restore policy before persisting. Already FROZEN is a no-op.
    pub async fn refreeze(&self, name: &str) -> CoreResult<Repository> {
        let repo = self.get(name).await?;
        match repo.state {
            RepositoryState::Frozen => return Ok(repo),
            RepositoryState::Thawed | RepositoryState::Expired => {}
            other => {
                return Err(CoreError::invalid_state(format!(
                    "repository `{name}` is {other}, cannot refreeze"
                )))
            }
        }

        let deleted = self
            .cluster
            .delete_indices_matching(&repo.mounted_index_pattern())
            .await?;
        self.cluster.unmount_repository(name).await?;
        self.cluster
            .delete_lifecycle_policy(&repo.restore_policy_name())
            .await?;

        let repo = self.apply(name, Repository::refreeze).await?;
        tracing::info!(repo = %name, deleted_indices = deleted, "Repository refrozen");
        Ok(repo)
    }

    /// Mount the repository's snapshot indices created within `range`.
    pub async fn mount_indices_in_range(
        &self,
        repo: &Repository,
        range: &DateRange,
    ) -> CoreResult<usize> {
        let indices = self.cluster.list_snapshot_indices(repo).await?;
        let mut mounted = 0;
        for index in indices.iter().filter(|i| range.contains(i.created_at)) {
            let mounted_name = repo.mounted_index_name(&index.index);
            self.cluster
                .mount_index(repo, index, &mounted_name)
                .await?;
            mounted += 1;
        }
        tracing::info!(
            repo = %repo.name,
            available = indices.len(),
            mounted,
            "Mounted indices in date range"
        );
        Ok(mounted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockSearchCluster;
    use deepfreeze_metadata::MemoryStatusStore;

    async fn setup(repo: Repository) -> (RepositoryStateMachine, MockSearchCluster, MemoryStatusStore) {
        let store = MemoryStatusStore::new();
        let cluster = MockSearchCluster::new();
        let machine = RepositoryStateMachine::new(Arc::new(store.clone()), Arc::new(cluster.clone()));
        machine.register(repo).await.unwrap();
        (machine, cluster, store)
    }

    fn frozen(name: &str) -> Repository {
        Repository::new(name, "archive", format!("snapshots/{name}"))
            .with_state(RepositoryState::Frozen)
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let (machine, _, _) = setup(frozen("repo-a")).await;
        let err = machine.register(frozen("repo-a")).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_freeze_unmounts_active_repository() {
        let repo = Repository::new("repo-a", "archive", "snapshots/a");
        let (machine, cluster, _) = setup(repo).await;

        let frozen = machine.freeze("repo-a").await.unwrap();
        assert_eq!(frozen.state, RepositoryState::Frozen);
        assert!(!frozen.is_mounted);
        assert_eq!(cluster.call_count("unmount_repository"), 1);
    }

    #[tokio::test]
    async fn test_thaw_cycle() {
        let (machine, cluster, _) = setup(frozen("repo-a")).await;

        let thawing = machine.begin_thaw("repo-a", Utc::now(), 7).await.unwrap();
        assert_eq!(thawing.state, RepositoryState::Thawing);
        assert!(thawing.expires_at.is_some());

        let thawed = machine.complete_thaw("repo-a").await.unwrap();
        assert_eq!(thawed.state, RepositoryState::Thawed);
        assert!(thawed.is_mounted);
        assert!(cluster.is_registered("repo-a"));

        machine.complete_thaw("repo-a").await.unwrap();
        assert_eq!(cluster.call_count("mount_repository"), 1);
    }

    #[tokio::test]
    async fn test_failed_mount_leaves_thawing() {
        let (machine, cluster, _) = setup(frozen("repo-a")).await;
        machine.begin_thaw("repo-a", Utc::now(), 7).await.unwrap();
        cluster.fail_on("mount_repository", "repo-a");

        assert!(machine.complete_thaw("repo-a").await.is_err());
        assert_eq!(
            machine.get("repo-a").await.unwrap().state,
            RepositoryState::Thawing
        );
    }

    #[tokio::test]
    async fn test_failed_persist_after_thaw_start_is_surfaced() {
        let (machine, _, store) = setup(frozen("repo-a")).await;
        store.fail_next_write("unavailable");

        let err = machine
            .begin_thaw("repo-a", Utc::now(), 7)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::StoreUnavailable(_)));
        assert_eq!(
            machine.get("repo-a").await.unwrap().state,
            RepositoryState::Frozen
        );
    }

    #[tokio::test]
    async fn test_refreeze_removes_cluster_state() {
        let (machine, cluster, _) = setup(frozen("repo-a")).await;
        machine.begin_thaw("repo-a", Utc::now(), 7).await.unwrap();
        machine.complete_thaw("repo-a").await.unwrap();
        let repo = machine.get("repo-a").await.unwrap();
        cluster.add_policy(&repo.restore_policy_name());

        let refrozen = machine.refreeze("repo-a").await.unwrap();
        assert_eq!(refrozen.state, RepositoryState::Frozen);
        assert!(refrozen.expires_at.is_none());
        assert!(!cluster.is_registered("repo-a"));
        assert!(!cluster.has_policy(&repo.restore_policy_name()));

        // Second refreeze is a no-op
        machine.refreeze("repo-a").await.unwrap();
        assert_eq!(cluster.call_count("unmount_repository"), 1);
    }

    #[tokio::test]
    async fn test_refreeze_rejects_thawing() {
        let (machine, _, _) = setup(frozen("repo-a")).await;
        machine.begin_thaw("repo-a", Utc::now(), 7).await.unwrap();
        let err = machine.refreeze("repo-a").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_transition_retries_on_conflict_with_fresh_version() {
        let (machine, _, store) = setup(frozen("repo-a")).await;
        store.interleave_writes(MAX_TRANSITION_ATTEMPTS - 1);

        let repo = machine.begin_thaw("repo-a", Utc::now(), 7).await.unwrap();
        assert_eq!(repo.state, RepositoryState::Thawing);

        // Each lost attempt re-read the version the other writer left behind.
        let stored = store.get_repository("repo-a").await.unwrap();
        assert_eq!(stored.record.state, RepositoryState::Thawing);
        assert_eq!(stored.version.seq_no, MAX_TRANSITION_ATTEMPTS as u64);
    }

    #[tokio::test]
    async fn test_transition_gives_up_after_max_conflicts() {
        let (machine, _, store) = setup(frozen("repo-a")).await;
        store.interleave_writes(MAX_TRANSITION_ATTEMPTS);

        let err = machine
            .begin_thaw("repo-a", Utc::now(), 7)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
        assert_eq!(
            machine.get("repo-a").await.unwrap().state,
            RepositoryState::Frozen
        );

        // Contention over, the same transition goes through.
        machine.begin_thaw("repo-a", Utc::now(), 7).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_thaw_has_one_winner() {
        let (machine, _, _) = setup(frozen("repo-a")).await;
        let other = machine.clone();

        let (a, b) = tokio::join!(
            machine.begin_thaw("repo-a", Utc::now(), 7),
            other.begin_thaw("repo-a", Utc::now(), 7)
        );
        assert!(a.is_ok() != b.is_ok(), "exactly one thaw should win");
    }
}
