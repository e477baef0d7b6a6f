use crate::auth::repo::UserRepo;
use crate::config::AppConfig;
use crate::db::PgStore;
use crate::memory::MemoryStore;
use crate::recipes::repo::CatalogRepo;
use crate::storage::{self, StorageClient};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepo>,
    pub catalog: Arc<dyn CatalogRepo>,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let (users, catalog): (Arc<dyn UserRepo>, Arc<dyn CatalogRepo>) =
            match &config.database_url {
                Some(url) => {
                    let pg = PgStore::connect(url).await?;
                    pg.migrate().await?;
                    info!("using postgres store");
                    let pg = Arc::new(pg);
                    (pg.clone() as Arc<dyn UserRepo>, pg as Arc<dyn CatalogRepo>)
                }
                None => {
                    warn!("DATABASE_URL not set; data lives in memory and is lost on restart");
                    let mem = Arc::new(MemoryStore::new());
                    (mem.clone() as Arc<dyn UserRepo>, mem as Arc<dyn CatalogRepo>)
                }
            };

        let storage = storage::from_config(&config.storage).await?;

        Ok(Self {
            users,
            catalog,
            config,
            storage,
        })
    }
}

#[cfg(test)]
impl AppState {
    pub fn fake() -> Self {
        Self::fake_with_storage().0
    }

    /// Memory store plus an inspectable in-memory object store.
    pub fn fake_with_storage() -> (Self, Arc<storage::memory::MemoryStorage>) {
        use crate::config::StorageConfig;

        let mem = Arc::new(MemoryStore::new());
        let objects = Arc::new(storage::memory::MemoryStorage::default());
        let config = Arc::new(AppConfig {
            database_url: None,
            storage: StorageConfig {
                media_root: "./media".into(),
                media_url: "/media/".into(),
                s3: None,
            },
            superuser: None,
        });
        let state = Self {
            users: mem.clone(),
            catalog: mem,
            config,
            storage: objects.clone(),
        };
        (state, objects)
    }
}
