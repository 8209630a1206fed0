//! Integration tests for the thaw/refreeze lifecycle
//!
//! Tests cover:
//! 1. Async thaw: request creation, progress reporting, completion
//! 2. check_status idempotency (no repeated mounts)
//! 3. list_requests filtering
//! 4. Expiry of a lapsed THAWED repository
//! 5. Partial refreeze failure without rollback
//! 6. Zero-object repositories
//! 7. Eligibility and AlreadyInProgress, including lost races
//! 8. Sync mode completion and deadline
//! 9. Date range selection and index mounting
//! 10. Resuming a thaw from a durable store in a new process

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use deepfreeze_core::{
    CoreError, DateRange, Repository, RepositoryState, SnapshotIndex, StatusStore, ThawConfig,
    ThawStatus,
};
use deepfreeze_metadata::{create_sqlite_pool, run_migrations, MemoryStatusStore, SqliteStatusStore};
use deepfreeze_storage::lifecycle::{
    ExpirationDetector, ExpiryReason, RefreezeOrchestrator, RepositoryStateMachine,
    ThawOrchestrator, ThawParams, EMPTY_REPOSITORY_WARNING,
};
use deepfreeze_storage::object_store::{MockArchiveConfig, MockArchiveStore};
use deepfreeze_storage::restore::{RestoreInitiator, RestoreStatusChecker};
use deepfreeze_storage::MockSearchCluster;
use uuid::Uuid;

struct Lifecycle {
    store: Arc<dyn StatusStore>,
    archive: MockArchiveStore,
    cluster: MockSearchCluster,
    machine: RepositoryStateMachine,
    thaw: ThawOrchestrator,
    refreeze: RefreezeOrchestrator,
    expiration: ExpirationDetector,
}

/// Helper: wire every component over the given fakes
fn create_lifecycle(
    store: Arc<dyn StatusStore>,
    archive: MockArchiveStore,
    cluster: MockSearchCluster,
) -> Lifecycle {
    let archive_store = Arc::new(archive.clone());
    let machine = RepositoryStateMachine::new(store.clone(), Arc::new(cluster.clone()));
    let checker = RestoreStatusChecker::new(archive_store.clone());
    let thaw = ThawOrchestrator::new(
        store.clone(),
        machine.clone(),
        RestoreInitiator::new(archive_store),
        checker.clone(),
        ThawConfig::default(),
    );
    let refreeze = RefreezeOrchestrator::new(store.clone(), machine.clone());
    let expiration = ExpirationDetector::new(store.clone(), machine.clone(), checker);

    Lifecycle {
        store,
        archive,
        cluster,
        machine,
        thaw,
        refreeze,
        expiration,
    }
}

/// Helper: in-memory lifecycle with default fakes
fn create_test_lifecycle() -> Lifecycle {
    create_lifecycle(
        Arc::new(MemoryStatusStore::new()),
        MockArchiveStore::new(),
        MockSearchCluster::new(),
    )
}

/// Helper: register a FROZEN repository holding `objects` archived objects
async fn add_frozen_repo(lc: &Lifecycle, name: &str, objects: usize) -> Vec<String> {
    lc.machine
        .register(
            Repository::new(name, "archive", format!("snapshots/{name}"))
                .with_state(RepositoryState::Frozen),
        )
        .await
        .expect("Failed to register repository");
    lc.archive
        .put_archived_objects("archive", &format!("snapshots/{name}/"), objects)
}

fn temp_db_url() -> String {
    let path: PathBuf =
        std::env::temp_dir().join(format!("deepfreeze-lifecycle-test-{}.db", Uuid::now_v7()));
    format!("sqlite://{}", path.display())
}

#[tokio::test]
async fn test_async_thaw_progress_and_completion() {
    // Setup: R1 with 3 un-restored archival objects
    let lc = create_test_lifecycle();
    let keys = add_frozen_repo(&lc, "R1", 3).await;
    let before = Utc::now();

    // Action: async thaw for 7 days
    let outcome = lc
        .thaw
        .create_thaw_request(ThawParams::repositories(["R1"]).with_duration_days(7))
        .await
        .expect("Failed to create thaw request");

    // Verify: request in progress, R1 thawing, expiry ~7 days out
    assert_eq!(outcome.status, ThawStatus::InProgress);
    assert_eq!(outcome.thawing, vec!["R1"]);
    assert_eq!(outcome.restores[0].initiated, 3);

    let stored = lc
        .store
        .get_thaw_request(outcome.request_id)
        .await
        .expect("Request should be persisted");
    assert_eq!(stored.record.status, ThawStatus::InProgress);
    assert_eq!(stored.record.repos, vec!["R1"]);

    let repo = lc.machine.get("R1").await.unwrap();
    assert_eq!(repo.state, RepositoryState::Thawing);
    let expires_at = repo.expires_at.expect("THAWING must carry expires_at");
    assert!(expires_at > Utc::now());
    assert!(expires_at >= before + ChronoDuration::days(7));
    assert!(expires_at <= Utc::now() + ChronoDuration::days(7));

    // Action: 1 of 3 restored
    lc.archive.complete_restore("archive", &keys[0]);
    let progress = lc.thaw.check_status(outcome.request_id).await.unwrap();

    // Verify: still thawing, 1/3 reported
    assert_eq!(progress.status, ThawStatus::InProgress);
    assert_eq!(progress.repos[0].state, Some(RepositoryState::Thawing));
    let restore = progress.repos[0].restore.as_ref().expect("restore status");
    assert_eq!((restore.restored, restore.total), (1, 3));

    // Action: all restored
    lc.archive.complete_all_restores();
    let progress = lc.thaw.check_status(outcome.request_id).await.unwrap();

    // Verify: THAWED, mounted, request completed
    assert_eq!(progress.status, ThawStatus::Completed);
    let repo = lc.machine.get("R1").await.unwrap();
    assert_eq!(repo.state, RepositoryState::Thawed);
    assert!(repo.is_mounted);
    assert!(lc.cluster.is_registered("R1"));
}

#[tokio::test]
async fn test_check_status_is_idempotent() {
    let lc = create_test_lifecycle();
    add_frozen_repo(&lc, "R1", 2).await;
    let outcome = lc
        .thaw
        .create_thaw_request(ThawParams::repositories(["R1"]))
        .await
        .unwrap();
    lc.archive.complete_all_restores();

    let first = lc.thaw.check_status(outcome.request_id).await.unwrap();
    let second = lc.thaw.check_status(outcome.request_id).await.unwrap();

    assert_eq!(first.status, ThawStatus::Completed);
    assert_eq!(second.status, first.status);
    assert_eq!(
        lc.cluster.call_count("mount_repository"),
        1,
        "Mount must not be re-issued"
    );
}

#[tokio::test]
async fn test_list_requests_filters_completed() {
    let lc = create_test_lifecycle();
    add_frozen_repo(&lc, "R1", 3).await;
    let outcome = lc
        .thaw
        .create_thaw_request(ThawParams::repositories(["R1"]))
        .await
        .unwrap();

    assert_eq!(lc.thaw.list_requests(false).await.unwrap().len(), 1);

    lc.archive.complete_all_restores();
    lc.thaw.check_status(outcome.request_id).await.unwrap();

    assert!(lc.thaw.list_requests(false).await.unwrap().is_empty());
    let all = lc.thaw.list_requests(true).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].request_id, outcome.request_id);
    assert_eq!(all[0].status, ThawStatus::Completed);
}

#[tokio::test]
async fn test_expiry_one_second_past() {
    // Setup: THAWED repository whose expires_at is 1 second in the past
    let lc = create_test_lifecycle();
    add_frozen_repo(&lc, "R1", 1).await;
    let started = Utc::now() - ChronoDuration::days(7) - ChronoDuration::seconds(1);
    lc.machine.begin_thaw("R1", started, 7).await.unwrap();
    lc.machine.complete_thaw("R1").await.unwrap();

    // Action
    let report = lc.expiration.scan(Utc::now()).await.unwrap();

    // Verify: EXPIRED and no longer mounted
    assert_eq!(report.expired.len(), 1);
    assert_eq!(report.expired[0].reason, ExpiryReason::Elapsed);
    let repo = lc.machine.get("R1").await.unwrap();
    assert_eq!(repo.state, RepositoryState::Expired);
    assert!(!repo.is_mounted);
}

#[tokio::test]
async fn test_partial_refreeze_keeps_progress() {
    // Setup: completed request over A and B
    let lc = create_test_lifecycle();
    add_frozen_repo(&lc, "A", 1).await;
    add_frozen_repo(&lc, "B", 1).await;
    let outcome = lc
        .thaw
        .create_thaw_request(ThawParams::repositories(["A", "B"]))
        .await
        .unwrap();
    lc.archive.complete_all_restores();
    let progress = lc.thaw.check_status(outcome.request_id).await.unwrap();
    assert_eq!(progress.status, ThawStatus::Completed);

    // Action: B's unmount fails
    lc.cluster.fail_on("unmount_repository", "B");
    let err = lc
        .refreeze
        .refreeze(outcome.request_id)
        .await
        .expect_err("Refreeze should report B");

    // Verify: A frozen, B reported, request not refrozen
    match err {
        CoreError::PartialRefreezeFailure {
            refrozen, failed, ..
        } => {
            assert_eq!(refrozen, vec!["A"]);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].repository, "B");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        lc.machine.get("A").await.unwrap().state,
        RepositoryState::Frozen
    );
    assert_eq!(
        lc.machine.get("B").await.unwrap().state,
        RepositoryState::Thawed
    );
    let request = lc.store.get_thaw_request(outcome.request_id).await.unwrap();
    assert_eq!(request.record.status, ThawStatus::Completed);
}

#[tokio::test]
async fn test_zero_object_repository_never_completes() {
    let lc = create_test_lifecycle();
    add_frozen_repo(&lc, "empty", 0).await;

    let outcome = lc
        .thaw
        .create_thaw_request(ThawParams::repositories(["empty"]))
        .await
        .unwrap();
    assert_eq!(outcome.status, ThawStatus::InProgress);

    let progress = lc.thaw.check_status(outcome.request_id).await.unwrap();
    assert_eq!(progress.status, ThawStatus::InProgress);
    assert_eq!(
        progress.repos[0].warning.as_deref(),
        Some(EMPTY_REPOSITORY_WARNING)
    );
    assert_eq!(
        lc.machine.get("empty").await.unwrap().state,
        RepositoryState::Thawing
    );
}

#[tokio::test]
async fn test_second_request_is_already_in_progress() {
    let lc = create_test_lifecycle();
    add_frozen_repo(&lc, "R1", 1).await;
    add_frozen_repo(&lc, "R2", 1).await;

    lc.thaw
        .create_thaw_request(ThawParams::repositories(["R1"]))
        .await
        .unwrap();

    // Only R1, already thawing
    let err = lc
        .thaw
        .create_thaw_request(ThawParams::repositories(["R1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::AlreadyInProgress { .. }));

    // Mixed selection thaws R2 and reports R1 as skipped
    let outcome = lc
        .thaw
        .create_thaw_request(ThawParams::repositories(["R1", "R2"]))
        .await
        .unwrap();
    assert_eq!(outcome.thawing, vec!["R2"]);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].name, "R1");
}

#[tokio::test]
async fn test_thaw_losing_every_race_is_already_in_progress() {
    // Setup: every conditional write on R1 is beaten by another writer
    let store = MemoryStatusStore::new();
    let lc = create_lifecycle(
        Arc::new(store.clone()),
        MockArchiveStore::new(),
        MockSearchCluster::new(),
    );
    add_frozen_repo(&lc, "R1", 2).await;
    store.interleave_writes(usize::MAX);

    // Action
    let err = lc
        .thaw
        .create_thaw_request(ThawParams::repositories(["R1"]))
        .await
        .unwrap_err();

    // Verify: rejected, nothing left behind, no restores issued
    assert!(matches!(err, CoreError::AlreadyInProgress { .. }));
    assert!(lc.thaw.list_requests(true).await.unwrap().is_empty());
    assert_eq!(
        lc.machine.get("R1").await.unwrap().state,
        RepositoryState::Frozen
    );
    assert!(lc
        .archive
        .get_call_history()
        .iter()
        .all(|entry| entry.operation != "restore"));
}

#[tokio::test]
async fn test_sync_thaw_completes_when_restores_are_immediate() {
    let lc = create_lifecycle(
        Arc::new(MemoryStatusStore::new()),
        MockArchiveStore::new_with_config(MockArchiveConfig {
            complete_restores_immediately: true,
            ..MockArchiveConfig::default()
        }),
        MockSearchCluster::new(),
    );
    add_frozen_repo(&lc, "R1", 4).await;

    let outcome = lc
        .thaw
        .create_thaw_request(
            ThawParams::repositories(["R1"]).synchronous(Duration::from_secs(3600)),
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, ThawStatus::Completed);
    let progress = outcome.progress.expect("sync mode reports progress");
    assert_eq!(progress.thawed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sync_thaw_returns_at_deadline() {
    let lc = create_test_lifecycle();
    add_frozen_repo(&lc, "R1", 2).await;

    let outcome = lc
        .thaw
        .create_thaw_request(ThawParams::repositories(["R1"]).synchronous(Duration::from_secs(120)))
        .await
        .unwrap();

    // Deadline passes without marking the request failed
    assert_eq!(outcome.status, ThawStatus::InProgress);
    let request = lc.store.get_thaw_request(outcome.request_id).await.unwrap();
    assert_eq!(request.record.status, ThawStatus::InProgress);
    assert!(lc.archive.head_calls() >= 4, "should have polled more than once");

    // A later check picks the request up again
    lc.archive.complete_all_restores();
    let progress = lc.thaw.check_status(outcome.request_id).await.unwrap();
    assert_eq!(progress.status, ThawStatus::Completed);
}

#[tokio::test]
async fn test_date_range_selects_repos_and_mounts_indices() {
    let lc = create_test_lifecycle();
    let day = |d: u32| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap();

    for (name, start, end) in [("jan-a", 1, 10), ("jan-b", 11, 20), ("jan-c", 21, 31)] {
        lc.machine
            .register(
                Repository::new(name, "archive", format!("snapshots/{name}"))
                    .with_state(RepositoryState::Frozen)
                    .with_coverage(day(start), day(end)),
            )
            .await
            .unwrap();
        lc.archive
            .put_archived_objects("archive", &format!("snapshots/{name}/"), 1);
    }
    for (index, d) in [("logs-05", 5), ("logs-12", 12), ("logs-18", 18)] {
        let repo = if d <= 10 { "jan-a" } else { "jan-b" };
        lc.cluster.add_snapshot_index(
            repo,
            SnapshotIndex {
                snapshot: format!("snap-{d}"),
                index: index.to_string(),
                created_at: day(d),
            },
        );
    }

    let range = DateRange::new(day(8), day(15)).unwrap();
    let outcome = lc
        .thaw
        .create_thaw_request(ThawParams::covering(range))
        .await
        .unwrap();
    assert_eq!(outcome.thawing, vec!["jan-a", "jan-b"]);

    lc.archive.complete_all_restores();
    let progress = lc.thaw.check_status(outcome.request_id).await.unwrap();

    assert_eq!(progress.status, ThawStatus::Completed);
    assert_eq!(progress.indices_mounted, 1);
    assert_eq!(lc.cluster.mounted_indices(), vec!["thawed-jan-b--logs-12"]);
}

#[tokio::test]
async fn test_thaw_resumes_from_durable_store() {
    // Setup: SQLite-backed store shared by two "processes"
    let pool = create_sqlite_pool(&temp_db_url())
        .await
        .expect("Failed to create pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    let archive = MockArchiveStore::new();
    let cluster = MockSearchCluster::new();

    let first = create_lifecycle(
        Arc::new(SqliteStatusStore::new(pool.clone())),
        archive.clone(),
        cluster.clone(),
    );
    add_frozen_repo(&first, "R1", 3).await;
    let outcome = first
        .thaw
        .create_thaw_request(ThawParams::repositories(["R1"]))
        .await
        .unwrap();
    drop(first);

    // Action: a fresh set of components checks the request later
    archive.complete_all_restores();
    let second = create_lifecycle(Arc::new(SqliteStatusStore::new(pool)), archive, cluster);
    let progress = second.thaw.check_status(outcome.request_id).await.unwrap();

    // Verify
    assert_eq!(progress.status, ThawStatus::Completed);
    assert_eq!(
        second.machine.get("R1").await.unwrap().state,
        RepositoryState::Thawed
    );
}

#[tokio::test]
async fn test_cleanup_after_expiry_refreezes_everything() {
    let lc = create_test_lifecycle();
    add_frozen_repo(&lc, "R1", 2).await;
    let outcome = lc
        .thaw
        .create_thaw_request(ThawParams::repositories(["R1"]).with_duration_days(1))
        .await
        .unwrap();
    lc.archive.complete_all_restores();
    lc.thaw.check_status(outcome.request_id).await.unwrap();

    let report = lc
        .expiration
        .cleanup(Utc::now() + ChronoDuration::days(2))
        .await
        .unwrap();

    assert_eq!(report.refrozen, vec!["R1"]);
    assert_eq!(report.requests_refrozen, vec![outcome.request_id]);
    assert_eq!(
        lc.machine.get("R1").await.unwrap().state,
        RepositoryState::Frozen
    );

    // Frozen again, so a new thaw is accepted
    lc.thaw
        .create_thaw_request(ThawParams::repositories(["R1"]))
        .await
        .expect("Refrozen repository should be thawable");
}
