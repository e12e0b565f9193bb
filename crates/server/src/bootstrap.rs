use std::sync::Arc;

use schemata_agent::{build_client, CompletionOrchestrator, GatewayError, OrchestratorSettings};
use schemata_core::config::AppConfig;
use schemata_core::errors::ApplicationError;
use schemata_db::{Storage, StorageError};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;

pub struct Service {
    pub config: AppConfig,
    pub storage: Storage,
    pub orchestrator: Arc<CompletionOrchestrator>,
}

impl Service {
    pub fn api_state(&self) -> ApiState {
        ApiState {
            applications: self.storage.applications.clone(),
            interactions: self.storage.interactions.clone(),
            orchestrator: self.orchestrator.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("language model gateway could not be built: {0}")]
    Gateway(#[from] GatewayError),
    #[error("completion orchestrator could not be built: {0}")]
    Orchestrator(#[source] ApplicationError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Service, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        backend = config.database.backend.as_str(),
        llm_provider = config.llm.provider.as_str(),
        "starting application bootstrap"
    );

    let storage = Storage::open(&config.database).await?;
    info!(
        event_name = "system.bootstrap.storage_ready",
        correlation_id = "bootstrap",
        backend = storage.backend().as_str(),
        "application registry and interaction log ready"
    );

    let llm = build_client(&config.llm)?;
    let settings = OrchestratorSettings::from_config(&config);
    info!(
        event_name = "system.bootstrap.gateway_ready",
        correlation_id = "bootstrap",
        model = %config.llm.model,
        max_attempts = settings.max_attempts,
        transport_retries = settings.transport_retries,
        "language model gateway configured"
    );

    let orchestrator = CompletionOrchestrator::new(
        storage.applications.clone(),
        storage.interactions.clone(),
        llm,
        settings,
    )
    .map_err(BootstrapError::Orchestrator)?;

    Ok(Service { config, storage, orchestrator: Arc::new(orchestrator) })
}
