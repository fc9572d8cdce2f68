// Migration Runner

use crate::error::map_sqlx_error;
use conveyor_core::error::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Run database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    let current_version: i64 = if table_exists > 0 {
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(map_sqlx_error)?
            .unwrap_or(0)
    } else {
        0
    };

    info!("Current schema version: {}", current_version);

    if current_version < 1 {
        info!("Applying migration 001: Initial schema");
        apply_migration(pool, include_str!("../migrations/001_initial_schema.sql")).await?;
    }

    Ok(())
}

/// Apply a single migration SQL file in one transaction
///
/// The file runs as one multi-statement script, so SQLite itself handles
/// comments, string literals and trigger bodies.
async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;

    sqlx::raw_sql(sql)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        tokio_test::assert_ok!(run_migrations(&pool).await);

        for table in ["jobs", "events"] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(count, 0);
        }
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[tokio::test]
    async fn test_schema_file_applies_on_fresh_database() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        apply_migration(&pool, include_str!("../migrations/001_initial_schema.sql"))
            .await
            .unwrap();

        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_semicolons_in_comments_literals_and_triggers() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let sql = r#"
            -- notes; with a semicolon
            CREATE TABLE notes (body TEXT NOT NULL, edits INTEGER NOT NULL DEFAULT 0);

            CREATE TRIGGER notes_edit AFTER UPDATE OF body ON notes
            BEGIN
                UPDATE notes SET edits = edits + 1 WHERE rowid = NEW.rowid;
            END;

            INSERT INTO notes (body) VALUES ('first; second');
            UPDATE notes SET body = 'third';
        "#;

        tokio_test::assert_ok!(apply_migration(&pool, sql).await);

        let (body, edits): (String, i64) = sqlx::query_as("SELECT body, edits FROM notes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(body, "third");
        assert_eq!(edits, 1);
    }

    #[tokio::test]
    async fn test_failed_migration_rolls_back() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let sql = "CREATE TABLE partial (id INTEGER); NOT VALID SQL;";

        assert!(apply_migration(&pool, sql).await.is_err());

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='partial'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 0);
    }
}
