use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] =
        &["application", "interaction_log", "idx_interaction_log_application_id"];

    async fn schema_object_count(pool: &crate::DbPool, name: &str) -> i64 {
        sqlx::query("SELECT COUNT(*) AS count FROM sqlite_master WHERE name = ?")
            .bind(name)
            .fetch_one(pool)
            .await
            .expect("query sqlite_master")
            .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_registry_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for name in MANAGED_SCHEMA_OBJECTS {
            assert_eq!(schema_object_count(&pool, name).await, 1, "missing schema object {name}");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run is a no-op");

        assert_eq!(MIGRATOR.iter().count(), 1);
        assert_eq!(schema_object_count(&pool, "interaction_log").await, 1);
    }

    #[tokio::test]
    async fn interaction_log_rejects_unknown_sender() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query(
            "INSERT INTO application (id, prompt_template, input_schema_json, output_schema_json, created_at)
             VALUES ('app-1', 'p', '{}', '{}', '2026-01-01T00:00:00.000000Z')",
        )
        .execute(&pool)
        .await
        .expect("insert application");

        let rejected = sqlx::query(
            "INSERT INTO interaction_log (application_id, sender, message_json, recorded_at)
             VALUES ('app-1', 'system', '{}', '2026-01-01T00:00:00.000000Z')",
        )
        .execute(&pool)
        .await;
        assert!(rejected.is_err());
    }
}
