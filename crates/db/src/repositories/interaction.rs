use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use schemata_core::domain::application::ApplicationId;
use schemata_core::domain::interaction::{InteractionEntry, Sender};

use super::application::{format_timestamp, parse_timestamp};
use super::{InteractionLogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlInteractionLogRepository {
    pool: DbPool,
}

impl SqlInteractionLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn application_exists(&self, id: &ApplicationId) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM application WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

fn row_to_entry(
    application_id: &ApplicationId,
    row: &sqlx::sqlite::SqliteRow,
) -> Result<InteractionEntry, RepositoryError> {
    let sender_str: String =
        row.try_get("sender").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let message_json: String =
        row.try_get("message_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let recorded_at_str: String =
        row.try_get("recorded_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let sender = Sender::parse(&sender_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown sender `{sender_str}`")))?;
    let message = serde_json::from_str(&message_json)
        .map_err(|e| RepositoryError::Decode(format!("message_json is not valid JSON: {e}")))?;

    Ok(InteractionEntry {
        application_id: application_id.clone(),
        sender,
        message,
        timestamp: parse_timestamp("recorded_at", &recorded_at_str)?,
    })
}

#[async_trait::async_trait]
impl InteractionLogRepository for SqlInteractionLogRepository {
    async fn append(
        &self,
        application_id: &ApplicationId,
        sender: Sender,
        message: Value,
    ) -> Result<InteractionEntry, RepositoryError> {
        // One statement: the existence check, the monotone clamp against the
        // latest entry and the insert cannot interleave with a delete.
        let row = sqlx::query(
            "INSERT INTO interaction_log (application_id, sender, message_json, recorded_at)
             SELECT ?1, ?2, ?3, MAX(?4, COALESCE(
                 (SELECT recorded_at FROM interaction_log WHERE application_id = ?1
                  ORDER BY seq DESC LIMIT 1), ''))
             WHERE EXISTS (SELECT 1 FROM application WHERE id = ?1)
             RETURNING sender, message_json, recorded_at",
        )
        .bind(&application_id.0)
        .bind(sender.as_str())
        .bind(message.to_string())
        .bind(format_timestamp(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => row_to_entry(application_id, r),
            None => Err(RepositoryError::ApplicationNotFound(application_id.clone())),
        }
    }

    async fn list(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<InteractionEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT sender, message_json, recorded_at FROM interaction_log
             WHERE application_id = ? ORDER BY seq ASC",
        )
        .bind(&application_id.0)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() && !self.application_exists(application_id).await? {
            return Err(RepositoryError::ApplicationNotFound(application_id.clone()));
        }

        rows.iter().map(|row| row_to_entry(application_id, row)).collect()
    }
}
