pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod storage;

pub use connection::{connect_with_settings, DbPool};
pub use repositories::{
    ApplicationRepository, InMemoryApplicationStore, InteractionLogRepository, RepositoryError,
    SqlApplicationRepository, SqlInteractionLogRepository,
};
pub use storage::{Storage, StorageError};
