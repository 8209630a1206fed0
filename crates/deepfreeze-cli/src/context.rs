use std::sync::Arc;

use anyhow::{Context, Result};
use deepfreeze_core::{DeepfreezeConfig, StatusStore, StatusStoreBackend};
use deepfreeze_elastic::{ElasticClient, ElasticSearchCluster, ElasticStatusStore};
use deepfreeze_metadata::{create_sqlite_pool, run_migrations, MemoryStatusStore, SqliteStatusStore};
use deepfreeze_storage::lifecycle::{
    ExpirationDetector, RefreezeOrchestrator, RepositoryStateMachine, ThawOrchestrator,
};
use deepfreeze_storage::object_store::{ArchiveStore, S3ArchiveStore, S3Config};
use deepfreeze_storage::restore::{RestoreInitiator, RestoreStatusChecker};

/// Every lifecycle component, wired against the configured backends.
pub struct Lifecycle {
    pub config: DeepfreezeConfig,
    pub store: Arc<dyn StatusStore>,
    pub machine: RepositoryStateMachine,
    pub thaw: ThawOrchestrator,
    pub refreeze: RefreezeOrchestrator,
    pub expiration: ExpirationDetector,
}

impl Lifecycle {
    pub async fn connect(config: DeepfreezeConfig) -> Result<Self> {
        let client = ElasticClient::new(&config.elasticsearch)?;
        let store = open_status_store(&config, &client).await?;

        let archive: Arc<dyn ArchiveStore> = Arc::new(
            S3ArchiveStore::new(S3Config::from(&config.s3))
                .await
                .context("failed to create S3 client")?,
        );
        let cluster = Arc::new(ElasticSearchCluster::new(client));

        let machine = RepositoryStateMachine::new(store.clone(), cluster);
        let checker =
            RestoreStatusChecker::with_max_workers(archive.clone(), config.thaw.max_status_workers);
        let thaw = ThawOrchestrator::new(
            store.clone(),
            machine.clone(),
            RestoreInitiator::new(archive),
            checker.clone(),
            config.thaw.clone(),
        );
        let refreeze = RefreezeOrchestrator::new(store.clone(), machine.clone());
        let expiration = ExpirationDetector::new(store.clone(), machine.clone(), checker);

        Ok(Self {
            config,
            store,
            machine,
            thaw,
            refreeze,
            expiration,
        })
    }
}

async fn open_status_store(
    config: &DeepfreezeConfig,
    client: &ElasticClient,
) -> Result<Arc<dyn StatusStore>> {
    match config.status_store.backend {
        StatusStoreBackend::Elastic => {
            let store = ElasticStatusStore::new(client.clone(), &config.elasticsearch.status_index);
            store
                .ensure_index()
                .await
                .context("failed to prepare status index")?;
            tracing::debug!(index = %store.index(), "Using Elasticsearch status store");
            Ok(Arc::new(store))
        }
        StatusStoreBackend::Sqlite => {
            let pool = create_sqlite_pool(&config.status_store.sqlite_url)
                .await
                .context("failed to create SQLite pool")?;
            run_migrations(&pool)
                .await
                .context("failed to apply status store migrations")?;
            tracing::debug!(url = %config.status_store.sqlite_url, "Using SQLite status store");
            Ok(Arc::new(SqliteStatusStore::new(pool)))
        }
        StatusStoreBackend::Memory => {
            tracing::warn!("In-memory status store: nothing persists after this command");
            Ok(Arc::new(MemoryStatusStore::new()))
        }
    }
}
