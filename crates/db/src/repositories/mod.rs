use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use schemata_core::domain::application::{Application, ApplicationDefinition, ApplicationId};
use schemata_core::domain::interaction::{InteractionEntry, Sender};
use schemata_core::errors::{ApplicationError, DomainError};

pub mod application;
pub mod interaction;
pub mod memory;

pub use application::SqlApplicationRepository;
pub use interaction::SqlInteractionLogRepository;
pub use memory::InMemoryApplicationStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("application `{0}` not found")]
    ApplicationNotFound(ApplicationId),
    #[error("application `{0}` already exists")]
    DuplicateApplication(ApplicationId),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::ApplicationNotFound(id) => {
                ApplicationError::Domain(DomainError::ApplicationNotFound(id))
            }
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

/// Durable store of registered applications. Definitions are immutable once
/// created; the only mutation is deletion.
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn create(&self, definition: ApplicationDefinition)
        -> Result<Application, RepositoryError>;

    async fn find_by_id(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError>;

    async fn get(&self, id: &ApplicationId) -> Result<Application, RepositoryError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::ApplicationNotFound(id.clone()))
    }

    /// Removes the application together with its interaction log.
    async fn delete(&self, id: &ApplicationId) -> Result<(), RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Append-only, per-application interaction history.
#[async_trait]
pub trait InteractionLogRepository: Send + Sync {
    async fn append(
        &self,
        application_id: &ApplicationId,
        sender: Sender,
        message: Value,
    ) -> Result<InteractionEntry, RepositoryError>;

    async fn list(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<InteractionEntry>, RepositoryError>;
}
