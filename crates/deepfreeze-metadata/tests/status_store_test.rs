use std::path::PathBuf;

use deepfreeze_core::{
    CoreError, DocType, RecordVersion, Repository, RepositoryState, Settings, StatusRecord,
    StatusStore, ThawRequest, ThawStatus,
};
use deepfreeze_metadata::{create_sqlite_pool, run_migrations, SqliteStatusStore};
use serde_json::{json, Map};
use sqlx::SqlitePool;
use uuid::Uuid;

struct TestContext {
    pool: SqlitePool,
    store: SqliteStatusStore,
}

async fn setup_context() -> TestContext {
    let db_path = temp_db_path();
    let database_url = format!("sqlite://{}", db_path.display());
    let pool = create_sqlite_pool(&database_url)
        .await
        .expect("failed to create pool");
    run_migrations(&pool).await.expect("failed migrations");

    TestContext {
        store: SqliteStatusStore::new(pool.clone()),
        pool,
    }
}

fn temp_db_path() -> PathBuf {
    let filename = format!("deepfreeze-status-test-{}.db", Uuid::now_v7());
    std::env::temp_dir().join(filename)
}

fn frozen_repo(name: &str) -> Repository {
    Repository::new(name, "archive", format!("snapshots/{name}")).with_state(RepositoryState::Frozen)
}

#[tokio::test]
async fn save_then_get_returns_equal_record() {
    let ctx = setup_context().await;
    let repo = frozen_repo("deepfreeze-000001");

    let version = ctx
        .store
        .save(&StatusRecord::Repository(repo.clone()))
        .await
        .expect("save");
    assert_eq!(version, RecordVersion::INITIAL);

    let fetched = ctx.store.get_repository("deepfreeze-000001").await.expect("get");
    assert_eq!(fetched.record, repo);
    assert_eq!(fetched.version, version);
}

#[tokio::test]
async fn save_overwrites_and_advances_version() {
    let ctx = setup_context().await;
    let mut repo = frozen_repo("repo-a");
    ctx.store
        .save(&StatusRecord::Repository(repo.clone()))
        .await
        .expect("first save");

    repo.begin_thaw(chrono::Utc::now(), 7).expect("thaw");
    let version = ctx
        .store
        .save(&StatusRecord::Repository(repo.clone()))
        .await
        .expect("second save");
    assert_eq!(version.seq_no, 1);

    let fetched = ctx.store.get_repository("repo-a").await.expect("get");
    assert_eq!(fetched.record.state, RepositoryState::Thawing);
    assert!(fetched.record.expires_at.is_some());
}

#[tokio::test]
async fn get_missing_record_is_not_found() {
    let ctx = setup_context().await;
    let err = ctx.store.get_repository("ghost").await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::NotFound {
            entity: "repository",
            ..
        }
    ));
}

#[tokio::test]
async fn update_missing_record_fails_without_creating() {
    let ctx = setup_context().await;
    let mut fields = Map::new();
    fields.insert("state".into(), json!("frozen"));

    let err = ctx.store.update("ghost", &fields).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(ctx
        .store
        .list(DocType::Repository)
        .await
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn update_merges_and_revalidates() {
    let ctx = setup_context().await;
    let request = ThawRequest::new(["repo-a", "repo-b"], None);
    let id = request.request_id.to_string();
    ctx.store
        .save(&StatusRecord::ThawRequest(request))
        .await
        .expect("save");

    let mut fields = Map::new();
    fields.insert("status".into(), json!("refrozen"));
    let updated = ctx
        .store
        .update(&id, &fields)
        .await
        .expect("update")
        .into_thaw_request()
        .expect("thaw request");
    assert_eq!(updated.status, ThawStatus::Refrozen);
    assert_eq!(updated.repos, vec!["repo-a", "repo-b"]);

    let mut invalid = Map::new();
    invalid.insert("status".into(), json!("melted"));
    let err = ctx.store.update(&id, &invalid).await.unwrap_err();
    assert!(matches!(err, CoreError::DeserializationError(_)));
}

#[tokio::test]
async fn conditional_write_rejects_stale_version() {
    let ctx = setup_context().await;
    let record = StatusRecord::Repository(frozen_repo("repo-a"));
    let v0 = ctx.store.save(&record).await.expect("save");

    let v1 = ctx
        .store
        .save_if_version(&record, v0)
        .await
        .expect("conditional save");
    assert_eq!(v1, v0.next());

    let err = ctx.store.save_if_version(&record, v0).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }));

    let missing = StatusRecord::Repository(frozen_repo("repo-z"));
    let err = ctx.store.save_if_version(&missing, v0).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn list_pages_through_every_record() {
    let ctx = setup_context().await;
    for i in 0..1005 {
        ctx.store
            .save(&StatusRecord::Repository(frozen_repo(&format!(
                "deepfreeze-{i:06}"
            ))))
            .await
            .expect("save");
    }
    ctx.store
        .save(&StatusRecord::ThawRequest(ThawRequest::new(["x"], None)))
        .await
        .expect("save request");

    let repos = ctx.store.list_repositories().await.expect("list");
    assert_eq!(repos.len(), 1005);
    assert_eq!(repos[0].name, "deepfreeze-000000");
    assert_eq!(repos[1004].name, "deepfreeze-001004");

    assert_eq!(ctx.store.list_thaw_requests().await.expect("list").len(), 1);
}

#[tokio::test]
async fn malformed_document_fails_at_read() {
    let ctx = setup_context().await;
    sqlx::query(
        "INSERT INTO status_records (id, doctype, body, seq_no, primary_term, created_at, updated_at) \
         VALUES ('bad', 'repository', '{\"doctype\":\"repository\",\"name\":3}', 0, 1, 'now', 'now')",
    )
    .execute(&ctx.pool)
    .await
    .expect("raw insert");

    let err = ctx.store.get("bad").await.unwrap_err();
    assert!(matches!(err, CoreError::DeserializationError(_)));
    assert!(ctx.store.list(DocType::Repository).await.is_err());
}

#[tokio::test]
async fn settings_default_until_saved() {
    let ctx = setup_context().await;
    let defaults = ctx.store.get_settings().await.expect("defaults");
    assert_eq!(defaults, Settings::default());

    let settings = Settings {
        last_suffix: Some("000004".to_string()),
        ..Settings::default()
    };
    ctx.store.save_settings(&settings).await.expect("save");
    assert_eq!(ctx.store.get_settings().await.expect("get"), settings);
}
