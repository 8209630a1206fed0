//! In-process [`SearchCluster`] for tests and dry runs.
//!
//! Tracks registered repositories, mounted indices and lifecycle policies in
//! memory, records every call, and fails chosen operations on request.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use deepfreeze_core::{CoreError, CoreResult, Repository, SearchCluster, SnapshotIndex};
use parking_lot::RwLock;

/// One recorded cluster call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCall {
    /// "mount_repository", "unmount_repository", "mount_index", ...
    pub operation: &'static str,
    pub target: String,
}

#[derive(Clone, Default)]
pub struct MockSearchCluster {
    repositories: Arc<RwLock<HashSet<String>>>,
    snapshot_indices: Arc<RwLock<HashMap<String, Vec<SnapshotIndex>>>>,
    mounted_indices: Arc<RwLock<BTreeSet<String>>>,
    policies: Arc<RwLock<HashSet<String>>>,
    failures: Arc<RwLock<HashMap<(&'static str, String), String>>>,
    calls: Arc<RwLock<Vec<ClusterCall>>>,
}

impl MockSearchCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `operation` fail for `target` until cleared.
    pub fn fail_on(&self, operation: &'static str, target: impl Into<String>) {
        self.failures
            .write()
            .insert((operation, target.into()), "simulated cluster failure".to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    /// Make an index available in a repository's snapshots.
    pub fn add_snapshot_index(&self, repository: &str, index: SnapshotIndex) {
        self.snapshot_indices
            .write()
            .entry(repository.to_string())
            .or_default()
            .push(index);
    }

    /// Pretend a lifecycle policy exists.
    pub fn add_policy(&self, name: &str) {
        self.policies.write().insert(name.to_string());
    }

    pub fn has_policy(&self, name: &str) -> bool {
        self.policies.read().contains(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.repositories.read().contains(name)
    }

    pub fn mounted_indices(&self) -> Vec<String> {
        self.mounted_indices.read().iter().cloned().collect()
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.calls.read().clone()
    }

    /// Number of calls made for `operation`.
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .read()
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    fn enter(&self, operation: &'static str, target: &str) -> CoreResult<()> {
        self.calls.write().push(ClusterCall {
            operation,
            target: target.to_string(),
        });
        match self.failures.read().get(&(operation, target.to_string())) {
            Some(message) => Err(CoreError::ClusterError(format!(
                "{operation} `{target}`: {message}"
            ))),
            None => Ok(()),
        }
    }
}

fn matches_pattern(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

#[async_trait]
impl SearchCluster for MockSearchCluster {
    async fn mount_repository(&self, repo: &Repository) -> CoreResult<()> {
        self.enter("mount_repository", &repo.name)?;
        self.repositories.write().insert(repo.name.clone());
        Ok(())
    }

    async fn unmount_repository(&self, name: &str) -> CoreResult<()> {
        self.enter("unmount_repository", name)?;
        self.repositories.write().remove(name);
        Ok(())
    }

    async fn is_repository_mounted(&self, name: &str) -> CoreResult<bool> {
        self.enter("is_repository_mounted", name)?;
        Ok(self.repositories.read().contains(name))
    }

    async fn list_snapshot_indices(&self, repo: &Repository) -> CoreResult<Vec<SnapshotIndex>> {
        self.enter("list_snapshot_indices", &repo.name)?;
        Ok(self
            .snapshot_indices
            .read()
            .get(&repo.name)
            .cloned()
            .unwrap_or_default())
    }

    async fn mount_index(
        &self,
        repo: &Repository,
        _index: &SnapshotIndex,
        mounted_name: &str,
    ) -> CoreResult<()> {
        self.enter("mount_index", mounted_name)?;
        if !self.repositories.read().contains(&repo.name) {
            return Err(CoreError::ClusterError(format!(
                "repository `{}` is not registered",
                repo.name
            )));
        }
        self.mounted_indices.write().insert(mounted_name.to_string());
        Ok(())
    }

    async fn delete_indices_matching(&self, pattern: &str) -> CoreResult<usize> {
        self.enter("delete_indices_matching", pattern)?;
        let mut mounted = self.mounted_indices.write();
        let before = mounted.len();
        mounted.retain(|name| !matches_pattern(pattern, name));
        Ok(before - mounted.len())
    }

    async fn delete_lifecycle_policy(&self, name: &str) -> CoreResult<()> {
        self.enter("delete_lifecycle_policy", name)?;
        self.policies.write().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_mount_and_delete_by_pattern() {
        let cluster = MockSearchCluster::new();
        let repo = Repository::new("repo-a", "b", "p");
        cluster.mount_repository(&repo).await.unwrap();

        let index = SnapshotIndex {
            snapshot: "snap-1".into(),
            index: "logs-1".into(),
            created_at: Utc::now(),
        };
        cluster
            .mount_index(&repo, &index, &repo.mounted_index_name("logs-1"))
            .await
            .unwrap();
        cluster
            .mount_index(&repo, &index, "thawed-repo-ab--logs-1")
            .await
            .unwrap();

        let deleted = cluster
            .delete_indices_matching(&repo.mounted_index_pattern())
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(cluster.mounted_indices(), vec!["thawed-repo-ab--logs-1"]);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let cluster = MockSearchCluster::new();
        cluster.fail_on("unmount_repository", "repo-b");

        assert!(cluster.unmount_repository("repo-a").await.is_ok());
        assert!(cluster.unmount_repository("repo-b").await.is_err());
        assert_eq!(cluster.call_count("unmount_repository"), 2);

        cluster.clear_failures();
        assert!(cluster.unmount_repository("repo-b").await.is_ok());
    }
}
