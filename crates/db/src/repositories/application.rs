use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::Row;

use schemata_core::domain::application::{Application, ApplicationDefinition, ApplicationId};

use super::{ApplicationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApplicationRepository {
    pool: DbPool,
}

impl SqlApplicationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_json(column: &str, raw: &str) -> Result<Value, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|e| RepositoryError::Decode(format!("column `{column}` holds invalid JSON: {e}")))
}

pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("column `{column}` holds `{raw}`: {e}")))
}

pub(crate) fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_application(row: &sqlx::sqlite::SqliteRow) -> Result<Application, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let prompt_template: String =
        row.try_get("prompt_template").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let input_schema_json: String =
        row.try_get("input_schema_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let output_schema_json: String =
        row.try_get("output_schema_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Application {
        id: ApplicationId(id),
        definition: ApplicationDefinition {
            prompt_template,
            input_schema: decode_json("input_schema_json", &input_schema_json)?,
            output_schema: decode_json("output_schema_json", &output_schema_json)?,
        },
        created_at: parse_timestamp("created_at", &created_at_str)?,
    })
}

#[async_trait::async_trait]
impl ApplicationRepository for SqlApplicationRepository {
    async fn create(
        &self,
        definition: ApplicationDefinition,
    ) -> Result<Application, RepositoryError> {
        let application = Application::new(definition);

        sqlx::query(
            "INSERT INTO application (id, prompt_template, input_schema_json, output_schema_json, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&application.id.0)
        .bind(&application.definition.prompt_template)
        .bind(application.definition.input_schema.to_string())
        .bind(application.definition.output_schema.to_string())
        .bind(format_timestamp(application.created_at))
        .execute(&self.pool)
        .await?;

        Ok(application)
    }

    async fn find_by_id(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, prompt_template, input_schema_json, output_schema_json, created_at
             FROM application WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_application(r)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &ApplicationId) -> Result<(), RepositoryError> {
        // interaction_log rows go with it through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM application WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::ApplicationNotFound(id.clone()));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
