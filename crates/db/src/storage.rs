use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use schemata_core::config::{DatabaseConfig, StorageBackend};

use crate::migrations;
use crate::repositories::{
    ApplicationRepository, InMemoryApplicationStore, InteractionLogRepository,
    SqlApplicationRepository, SqlInteractionLogRepository,
};
use crate::{connect_with_settings, DbPool};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database connection failed: {0}")]
    Connect(#[from] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// The registry and interaction log selected at startup. Both handles point at
/// the same backing store.
#[derive(Clone)]
pub struct Storage {
    pub applications: Arc<dyn ApplicationRepository>,
    pub interactions: Arc<dyn InteractionLogRepository>,
    pub pool: Option<DbPool>,
}

impl Storage {
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryApplicationStore::default());
        Self { applications: store.clone(), interactions: store, pool: None }
    }

    pub fn sqlite(pool: DbPool) -> Self {
        Self {
            applications: Arc::new(SqlApplicationRepository::new(pool.clone())),
            interactions: Arc::new(SqlInteractionLogRepository::new(pool.clone())),
            pool: Some(pool),
        }
    }

    /// Opens the configured backend; SQLite is connected and migrated first.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, StorageError> {
        match config.backend {
            StorageBackend::Memory => {
                info!(
                    event_name = "storage.selected",
                    backend = "memory",
                    "using in-memory storage"
                );
                Ok(Self::in_memory())
            }
            StorageBackend::Sqlite => {
                let pool = connect_with_settings(
                    &config.url,
                    config.max_connections,
                    config.timeout_secs,
                )
                .await?;
                migrations::run_pending(&pool).await?;
                info!(
                    event_name = "storage.selected",
                    backend = "sqlite",
                    database_url = %config.url,
                    "sqlite storage connected and migrated"
                );
                Ok(Self::sqlite(pool))
            }
        }
    }

    pub fn backend(&self) -> StorageBackend {
        if self.pool.is_some() {
            StorageBackend::Sqlite
        } else {
            StorageBackend::Memory
        }
    }
}
