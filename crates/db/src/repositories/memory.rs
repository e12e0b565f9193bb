use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use schemata_core::domain::application::{Application, ApplicationDefinition, ApplicationId};
use schemata_core::domain::interaction::{next_timestamp, InteractionEntry, Sender};

use super::{ApplicationRepository, InteractionLogRepository, RepositoryError};

struct StoredApplication {
    application: Application,
    log: Vec<InteractionEntry>,
}

/// Process-local registry and interaction log behind one lock, so deleting an
/// application and dropping its log is a single map operation.
#[derive(Default)]
pub struct InMemoryApplicationStore {
    applications: RwLock<HashMap<String, StoredApplication>>,
}

impl InMemoryApplicationStore {
    /// Registers `application` under its id; an occupied id is never overwritten.
    async fn insert(&self, application: Application) -> Result<Application, RepositoryError> {
        let mut applications = self.applications.write().await;
        match applications.entry(application.id.0.clone()) {
            Entry::Occupied(_) => Err(RepositoryError::DuplicateApplication(application.id)),
            Entry::Vacant(slot) => {
                let stored =
                    StoredApplication { application: application.clone(), log: Vec::new() };
                slot.insert(stored);
                Ok(application)
            }
        }
    }
}

#[async_trait::async_trait]
impl ApplicationRepository for InMemoryApplicationStore {
    async fn create(
        &self,
        definition: ApplicationDefinition,
    ) -> Result<Application, RepositoryError> {
        self.insert(Application::new(definition)).await
    }

    async fn find_by_id(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        let applications = self.applications.read().await;
        Ok(applications.get(&id.0).map(|stored| stored.application.clone()))
    }

    async fn delete(&self, id: &ApplicationId) -> Result<(), RepositoryError> {
        let mut applications = self.applications.write().await;
        match applications.remove(&id.0) {
            Some(_) => Ok(()),
            None => Err(RepositoryError::ApplicationNotFound(id.clone())),
        }
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl InteractionLogRepository for InMemoryApplicationStore {
    async fn append(
        &self,
        application_id: &ApplicationId,
        sender: Sender,
        message: Value,
    ) -> Result<InteractionEntry, RepositoryError> {
        let mut applications = self.applications.write().await;
        let stored = applications
            .get_mut(&application_id.0)
            .ok_or_else(|| RepositoryError::ApplicationNotFound(application_id.clone()))?;

        let previous = stored.log.last().map(|entry| entry.timestamp);
        let entry = InteractionEntry {
            application_id: application_id.clone(),
            sender,
            message,
            timestamp: next_timestamp(previous, Utc::now()),
        };
        stored.log.push(entry.clone());
        Ok(entry)
    }

    async fn list(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<InteractionEntry>, RepositoryError> {
        let applications = self.applications.read().await;
        applications
            .get(&application_id.0)
            .map(|stored| stored.log.clone())
            .ok_or_else(|| RepositoryError::ApplicationNotFound(application_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use schemata_core::domain::application::{Application, ApplicationDefinition, ApplicationId};
    use schemata_core::domain::interaction::Sender;

    use crate::repositories::{
        ApplicationRepository, InMemoryApplicationStore, InteractionLogRepository, RepositoryError,
    };

    fn definition() -> ApplicationDefinition {
        ApplicationDefinition {
            prompt_template: "Summarise {{input}}".to_string(),
            input_schema: json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}),
            output_schema: json!({"type": "object", "properties": {"summary": {"type": "string"}}}),
        }
    }

    #[tokio::test]
    async fn in_memory_store_round_trip() {
        let store = InMemoryApplicationStore::default();
        let created = store.create(definition()).await.expect("create application");

        let found = store.get(&created.id).await.expect("get application");
        assert_eq!(found, created);

        store.append(&created.id, Sender::User, json!({"text": "hi"})).await.expect("append");
        let log = store.list(&created.id).await.expect("list");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].sender, Sender::User);
    }

    #[tokio::test]
    async fn colliding_id_does_not_replace_the_existing_application() {
        let store = InMemoryApplicationStore::default();
        let original = store.insert(Application::new(definition())).await.expect("insert");
        store.append(&original.id, Sender::User, json!({"text": "kept"})).await.expect("append");

        let mut impostor = Application::new(definition());
        impostor.id = original.id.clone();
        impostor.definition.prompt_template = "Replaced".to_string();

        let error = store.insert(impostor).await.expect_err("duplicate id");
        assert!(matches!(
            error,
            RepositoryError::DuplicateApplication(ref id) if id == &original.id
        ));
        assert_eq!(store.get(&original.id).await.expect("get"), original);
        assert_eq!(store.list(&original.id).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn append_to_unknown_application_is_rejected() {
        let store = InMemoryApplicationStore::default();
        let unknown = ApplicationId("nope".to_string());

        let error = store.append(&unknown, Sender::Ai, json!({})).await.expect_err("unknown app");
        assert!(matches!(error, RepositoryError::ApplicationNotFound(id) if id == unknown));
    }
}
