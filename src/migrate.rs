use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Open the database and make sure the schema exists.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create tables and indexes. Idempotent.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    // One row per digest. The PRIMARY KEY is what makes insert-if-absent
    // race-free across processes.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            digest TEXT PRIMARY KEY,
            size INTEGER NOT NULL,
            mime_type TEXT,
            extension TEXT,
            original_filename TEXT,
            created_at INTEGER,
            modified_at INTEGER,
            imported_at INTEGER NOT NULL,
            storage_path TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'pending',
            locations_json TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            CHECK (json_array_length(locations_json) > 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_imported_at ON files(imported_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_size ON files(size DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_state ON files(state)")
        .execute(pool)
        .await?;

    Ok(())
}
