use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use deepfreeze_core::{CoreError, CoreResult, Repository, SearchCluster, SnapshotIndex};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::client::{ElasticClient, EsResponse};

/// Search-cluster collaborator over the snapshot and searchable-snapshot APIs.
pub struct ElasticSearchCluster {
    client: ElasticClient,
}

impl ElasticSearchCluster {
    pub fn new(client: ElasticClient) -> Self {
        Self { client }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> CoreResult<EsResponse> {
        self.client.send(request).await.map_err(CoreError::ClusterError)
    }
}

/// Flattens a `GET _snapshot/{repo}/_all` body into one entry per index,
/// keeping the most recent snapshot that holds it.
pub(crate) fn parse_snapshot_indices(body: &Value) -> Vec<SnapshotIndex> {
    let mut latest: HashMap<String, SnapshotIndex> = HashMap::new();

    let snapshots = body
        .get("snapshots")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for snapshot in snapshots {
        let Some(name) = snapshot.get("snapshot").and_then(Value::as_str) else {
            continue;
        };
        let Some(created_at) = snapshot
            .get("start_time_in_millis")
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        else {
            warn!(snapshot = %name, "Snapshot has no start time, skipping its indices");
            continue;
        };

        let indices = snapshot
            .get("indices")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for index in indices.iter().filter_map(Value::as_str) {
            let entry = SnapshotIndex {
                snapshot: name.to_string(),
                index: index.to_string(),
                created_at,
            };
            match latest.get(index) {
                Some(existing) if existing.created_at >= created_at => {}
                _ => {
                    latest.insert(index.to_string(), entry);
                }
            }
        }
    }

    let mut indices: Vec<SnapshotIndex> = latest.into_values().collect();
    indices.sort_by(|a, b| a.index.cmp(&b.index));
    indices
}

/// Number of indices a `_resolve/index` answer names.
///
/// A missing index is zero. Any other failure is an error: the caller is
/// about to unmount and must not do so with indices still mounted.
pub(crate) fn resolved_index_count(pattern: &str, response: &EsResponse) -> CoreResult<usize> {
    if response.is_success() {
        return Ok(response
            .body
            .get("indices")
            .and_then(Value::as_array)
            .map_or(0, Vec::len));
    }
    if response.status == StatusCode::NOT_FOUND
        && response.error_type() == Some("index_not_found_exception")
    {
        return Ok(0);
    }
    Err(CoreError::ClusterError(format!(
        "failed to resolve indices `{pattern}`: {}",
        response.reason()
    )))
}

#[async_trait]
impl SearchCluster for ElasticSearchCluster {
    async fn mount_repository(&self, repo: &Repository) -> CoreResult<()> {
        if self.is_repository_mounted(&repo.name).await? {
            debug!(repo = %repo.name, "Repository already registered");
            return Ok(());
        }

        let body = json!({
            "type": "s3",
            "settings": {
                "bucket": repo.bucket,
                "base_path": repo.base_path,
            }
        });
        let response = self
            .send(
                self.client
                    .request(Method::PUT, &format!("_snapshot/{}", repo.name))
                    .json(&body),
            )
            .await?;
        if !response.is_success() {
            return Err(CoreError::ClusterError(format!(
                "failed to register repository `{}`: {}",
                repo.name,
                response.reason()
            )));
        }

        info!(repo = %repo.name, bucket = %repo.bucket, "Registered repository");
        Ok(())
    }

    async fn unmount_repository(&self, name: &str) -> CoreResult<()> {
        let response = self
            .send(
                self.client
                    .request(Method::DELETE, &format!("_snapshot/{name}")),
            )
            .await?;
        if response.is_success() || response.status == StatusCode::NOT_FOUND {
            info!(repo = %name, "Unregistered repository");
            return Ok(());
        }
        Err(CoreError::ClusterError(format!(
            "failed to unregister repository `{name}`: {}",
            response.reason()
        )))
    }

    async fn is_repository_mounted(&self, name: &str) -> CoreResult<bool> {
        let response = self
            .send(self.client.request(Method::GET, &format!("_snapshot/{name}")))
            .await?;
        match response.status {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(CoreError::ClusterError(response.reason())),
        }
    }

    async fn list_snapshot_indices(&self, repo: &Repository) -> CoreResult<Vec<SnapshotIndex>> {
        let response = self
            .send(
                self.client
                    .request(Method::GET, &format!("_snapshot/{}/_all", repo.name)),
            )
            .await?;
        if !response.is_success() {
            return Err(CoreError::ClusterError(format!(
                "failed to list snapshots of `{}`: {}",
                repo.name,
                response.reason()
            )));
        }
        Ok(parse_snapshot_indices(&response.body))
    }

    async fn mount_index(
        &self,
        repo: &Repository,
        index: &SnapshotIndex,
        mounted_name: &str,
    ) -> CoreResult<()> {
        let body = json!({
            "index": index.index,
            "renamed_index": mounted_name,
        });
        let response = self
            .send(
                self.client
                    .request(
                        Method::POST,
                        &format!("_snapshot/{}/{}/_mount", repo.name, index.snapshot),
                    )
                    .query(&[("wait_for_completion", "true")])
                    .json(&body),
            )
            .await?;

        if response.is_success() {
            info!(repo = %repo.name, index = %index.index, mounted = %mounted_name, "Mounted index");
            return Ok(());
        }
        if response.error_type() == Some("resource_already_exists_exception") {
            debug!(mounted = %mounted_name, "Index already mounted");
            return Ok(());
        }
        Err(CoreError::ClusterError(format!(
            "failed to mount `{}` from `{}`: {}",
            index.index,
            repo.name,
            response.reason()
        )))
    }

    async fn delete_indices_matching(&self, pattern: &str) -> CoreResult<usize> {
        // Resolve first so the caller learns how many were removed.
        let response = self
            .send(
                self.client
                    .request(Method::GET, &format!("_resolve/index/{pattern}"))
                    .query(&[("expand_wildcards", "all")]),
            )
            .await?;
        let count = resolved_index_count(pattern, &response)?;
        if count == 0 {
            return Ok(0);
        }

        let response = self
            .send(
                self.client
                    .request(Method::DELETE, pattern)
                    .query(&[("expand_wildcards", "all"), ("allow_no_indices", "true")]),
            )
            .await?;
        if !response.is_success() && response.status != StatusCode::NOT_FOUND {
            return Err(CoreError::ClusterError(format!(
                "failed to delete indices `{pattern}`: {}",
                response.reason()
            )));
        }

        info!(pattern = %pattern, count, "Deleted mounted indices");
        Ok(count)
    }

    async fn delete_lifecycle_policy(&self, name: &str) -> CoreResult<()> {
        let response = self
            .send(
                self.client
                    .request(Method::DELETE, &format!("_ilm/policy/{name}")),
            )
            .await?;
        if response.is_success() || response.status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(CoreError::ClusterError(format!(
            "failed to delete lifecycle policy `{name}`: {}",
            response.reason()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot_indices_keeps_latest() {
        let body = json!({
            "snapshots": [
                {
                    "snapshot": "snap-1",
                    "indices": ["logs-2024.01.01", "logs-2024.01.02"],
                    "start_time_in_millis": 1_704_067_200_000_i64
                },
                {
                    "snapshot": "snap-2",
                    "indices": ["logs-2024.01.02", "logs-2024.01.03"],
                    "start_time_in_millis": 1_704_240_000_000_i64
                }
            ]
        });

        let indices = parse_snapshot_indices(&body);
        assert_eq!(indices.len(), 3);
        assert_eq!(indices[0].index, "logs-2024.01.01");
        assert_eq!(indices[0].snapshot, "snap-1");
        assert_eq!(indices[1].index, "logs-2024.01.02");
        assert_eq!(indices[1].snapshot, "snap-2");
        assert_eq!(
            indices[2].created_at,
            Utc.timestamp_millis_opt(1_704_240_000_000).unwrap()
        );
    }

    #[test]
    fn test_snapshot_without_start_time_is_skipped() {
        let body = json!({
            "snapshots": [
                {"snapshot": "in-progress", "indices": ["logs-2024.02.01"]},
                {
                    "snapshot": "snap-1",
                    "indices": ["logs-2024.01.01"],
                    "start_time_in_millis": 1_704_067_200_000_i64
                }
            ]
        });

        let indices = parse_snapshot_indices(&body);
        assert_eq!(indices.len(), 1);
        assert_eq!(indices[0].index, "logs-2024.01.01");
    }

    fn response(status: StatusCode, body: Value) -> EsResponse {
        EsResponse { status, body }
    }

    #[test]
    fn test_resolved_index_count() {
        let found = response(
            StatusCode::OK,
            json!({"indices": [{"name": "thawed-a-1"}, {"name": "thawed-a-2"}], "aliases": []}),
        );
        assert_eq!(resolved_index_count("thawed-a-*", &found).unwrap(), 2);

        let missing = response(
            StatusCode::NOT_FOUND,
            json!({"error": {"type": "index_not_found_exception", "reason": "no such index"}}),
        );
        assert_eq!(resolved_index_count("thawed-a", &missing).unwrap(), 0);
    }

    #[test]
    fn test_resolve_failure_is_cluster_error() {
        let unavailable = response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"error": {"type": "cluster_block_exception", "reason": "blocked"}}),
        );
        assert!(matches!(
            resolved_index_count("thawed-a-*", &unavailable),
            Err(CoreError::ClusterError(_))
        ));

        let forbidden = response(StatusCode::FORBIDDEN, json!({"error": "forbidden"}));
        assert!(resolved_index_count("thawed-a-*", &forbidden).is_err());

        let bare_not_found = response(StatusCode::NOT_FOUND, Value::Null);
        assert!(resolved_index_count("thawed-a-*", &bare_not_found).is_err());
    }

    #[test]
    fn test_parse_snapshot_indices_empty() {
        assert!(parse_snapshot_indices(&json!({"snapshots": []})).is_empty());
        assert!(parse_snapshot_indices(&json!({})).is_empty());
    }
}
