//! SQLite-backed [`MetadataStore`] implementation.
//!
//! Each record is one row of the `files` table keyed by digest, with the
//! provenance log, tag set and metadata map held as JSON text columns.
//! Mutations are single statements (or, for metadata, one short transaction
//! that takes the write lock before it reads), so concurrent writers in this
//! process or any other serialize on SQLite's lock and never lose updates.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use filer_core::digest::{is_hex_prefix, Digest};
use filer_core::models::{ContentRecord, ContentState, Provenance};
use filer_core::query::{rank_tags, ListOrder, RecordFilter, StoreStats};
use filer_core::store::{AppendOutcome, InsertOutcome, MetadataStore};

use crate::config::Config;
use crate::db;
use crate::migrate;

const RECORD_COLUMNS: &str = "digest, size, mime_type, extension, original_filename, \
     created_at, modified_at, imported_at, storage_path, state, \
     locations_json, tags_json, metadata_json";

/// SQLite implementation of the [`MetadataStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect using `config` and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::ensure_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn ts_to_datetime(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0).with_context(|| format!("timestamp out of range: {}", ts))
}

fn row_to_record(row: &SqliteRow) -> Result<ContentRecord> {
    let digest: String = row.get("digest");
    let size: i64 = row.get("size");
    let created_at: Option<i64> = row.get("created_at");
    let modified_at: Option<i64> = row.get("modified_at");
    let imported_at: i64 = row.get("imported_at");
    let storage_path: String = row.get("storage_path");
    let state: String = row.get("state");
    let locations_json: String = row.get("locations_json");
    let tags_json: String = row.get("tags_json");
    let metadata_json: String = row.get("metadata_json");

    let locations: Vec<Provenance> = serde_json::from_str(&locations_json)
        .with_context(|| format!("corrupt locations_json for {}", digest))?;
    let tags: BTreeSet<String> = serde_json::from_str(&tags_json)
        .with_context(|| format!("corrupt tags_json for {}", digest))?;
    let metadata: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&metadata_json)
            .with_context(|| format!("corrupt metadata_json for {}", digest))?;

    Ok(ContentRecord {
        digest: Digest::parse(&digest)?,
        size: u64::try_from(size).with_context(|| format!("negative size for {}", digest))?,
        mime_type: row.get("mime_type"),
        extension: row.get("extension"),
        original_filename: row.get("original_filename"),
        created_at: created_at.map(ts_to_datetime).transpose()?,
        modified_at: modified_at.map(ts_to_datetime).transpose()?,
        imported_at: ts_to_datetime(imported_at)?,
        storage_path: PathBuf::from(storage_path),
        state: state.parse()?,
        locations,
        tags,
        metadata,
    })
}

/// Escape `%`, `_` and `\` for a `LIKE … ESCAPE '\'` pattern.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn get(&self, digest: &Digest) -> Result<Option<ContentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM files WHERE digest = ?",
            RECORD_COLUMNS
        ))
        .bind(digest.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert_new(&self, record: &ContentRecord) -> Result<InsertOutcome> {
        if record.locations.is_empty() {
            bail!("record {} has no locations", record.digest);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO files (digest, size, mime_type, extension, original_filename,
                               created_at, modified_at, imported_at, storage_path, state,
                               locations_json, tags_json, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(digest) DO NOTHING
            "#,
        )
        .bind(record.digest.as_str())
        .bind(i64::try_from(record.size)?)
        .bind(&record.mime_type)
        .bind(&record.extension)
        .bind(&record.original_filename)
        .bind(record.created_at.map(|t| t.timestamp()))
        .bind(record.modified_at.map(|t| t.timestamp()))
        .bind(record.imported_at.timestamp())
        .bind(record.storage_path.to_string_lossy().to_string())
        .bind(record.state.as_str())
        .bind(serde_json::to_string(&record.locations)?)
        .bind(serde_json::to_string(&record.tags)?)
        .bind(serde_json::to_string(&record.metadata)?)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            InsertOutcome::Created
        } else {
            InsertOutcome::Conflict
        })
    }

    async fn append_location(
        &self,
        digest: &Digest,
        provenance: &Provenance,
    ) -> Result<AppendOutcome> {
        // Duplicate check and append happen in one statement under the write lock.
        let result = sqlx::query(
            r#"
            UPDATE files
            SET locations_json = json_insert(locations_json, '$[#]', json(?))
            WHERE digest = ?
              AND NOT EXISTS (
                  SELECT 1 FROM json_each(files.locations_json) AS loc
                  WHERE json_extract(loc.value, '$.path') = ?
                    AND json_extract(loc.value, '$.source') = ?
              )
            "#,
        )
        .bind(serde_json::to_string(provenance)?)
        .bind(digest.as_str())
        .bind(&provenance.path)
        .bind(&provenance.source)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(AppendOutcome::Appended);
        }

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM files WHERE digest = ?")
            .bind(digest.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(if exists {
            AppendOutcome::AlreadyPresent
        } else {
            AppendOutcome::NotFound
        })
    }

    async fn merge_tags(&self, digest: &Digest, tags: &[String]) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE files
            SET tags_json = (
                SELECT json_group_array(value) FROM (
                    SELECT value FROM json_each(files.tags_json)
                    UNION
                    SELECT value FROM json_each(?)
                    ORDER BY value
                )
            )
            WHERE digest = ?
            "#,
        )
        .bind(serde_json::to_string(tags)?)
        .bind(digest.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn merge_metadata(
        &self,
        digest: &Digest,
        entries: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the lock before it reads.
        let touched = sqlx::query("UPDATE files SET metadata_json = metadata_json WHERE digest = ?")
            .bind(digest.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if touched == 0 {
            tx.rollback().await?;
            return Ok(());
        }

        let current: String = sqlx::query_scalar("SELECT metadata_json FROM files WHERE digest = ?")
            .bind(digest.as_str())
            .fetch_one(&mut *tx)
            .await?;
        let mut merged: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&current)
                .with_context(|| format!("corrupt metadata_json for {}", digest))?;
        for (k, v) in entries {
            merged.insert(k.clone(), v.clone());
        }

        sqlx::query("UPDATE files SET metadata_json = ? WHERE digest = ?")
            .bind(serde_json::to_string(&merged)?)
            .bind(digest.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_state(&self, digest: &Digest, state: ContentState) -> Result<bool> {
        let result = sqlx::query("UPDATE files SET state = ? WHERE digest = ?")
            .bind(state.as_str())
            .bind(digest.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn transition_state(
        &self,
        digest: &Digest,
        from: ContentState,
        to: ContentState,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE files SET state = ? WHERE digest = ? AND state = ?")
            .bind(to.as_str())
            .bind(digest.as_str())
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<ContentRecord>> {
        if !prefix.is_empty() && !is_hex_prefix(prefix) {
            bail!("not a hex digest prefix: '{}'", prefix);
        }

        let rows = sqlx::query(&format!(
            "SELECT {} FROM files WHERE substr(digest, 1, ?) = ? ORDER BY digest LIMIT ?",
            RECORD_COLUMNS
        ))
        .bind(prefix.len() as i64)
        .bind(prefix)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn scan(
        &self,
        filter: &RecordFilter,
        order: ListOrder,
        limit: Option<usize>,
    ) -> Result<Vec<ContentRecord>> {
        let mut sql = format!("SELECT {} FROM files WHERE 1=1", RECORD_COLUMNS);

        if filter.tag.is_some() {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM json_each(files.tags_json) AS t \
                 WHERE t.value LIKE '%' || ? || '%' ESCAPE '\\')",
            );
        }
        if filter.source.is_some() {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM json_each(files.locations_json) AS l \
                 WHERE json_extract(l.value, '$.source') = ?)",
            );
        }
        sql.push_str(match order {
            ListOrder::Imported => " ORDER BY imported_at ASC, digest ASC",
            ListOrder::Size => " ORDER BY size DESC, digest ASC",
        });
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(ref tag) = filter.tag {
            query = query.bind(escape_like(tag));
        }
        if let Some(ref source) = filter.source {
            query = query.bind(source.clone());
        }
        if let Some(limit) = limit {
            query = query.bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn stats(&self) -> Result<StoreStats> {
        let totals = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS unique_count,
                COALESCE(SUM(size), 0) AS total_size,
                COALESCE(SUM(json_array_length(locations_json)), 0) AS total_locations
            FROM files
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let source_rows = sqlx::query(
            r#"
            SELECT json_extract(l.value, '$.source') AS source, COUNT(*) AS n
            FROM files, json_each(files.locations_json) AS l
            GROUP BY source
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let tag_rows = sqlx::query(
            r#"
            SELECT t.value AS tag, COUNT(*) AS n
            FROM files, json_each(files.tags_json) AS t
            GROUP BY tag
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = StoreStats {
            unique_count: totals.get::<i64, _>("unique_count") as u64,
            total_size: totals.get::<i64, _>("total_size") as u64,
            total_locations: totals.get::<i64, _>("total_locations") as u64,
            ..Default::default()
        };
        for row in &source_rows {
            let source: Option<String> = row.get("source");
            let n: i64 = row.get("n");
            stats
                .by_source
                .insert(source.unwrap_or_else(|| "unknown".to_string()), n as u64);
        }
        stats.top_tags = rank_tags(
            tag_rows
                .iter()
                .map(|row| (row.get::<String, _>("tag"), row.get::<i64, _>("n") as u64))
                .collect(),
        );

        Ok(stats)
    }

    async fn all_digests(&self) -> Result<Vec<Digest>> {
        let digests: Vec<String> = sqlx::query_scalar("SELECT digest FROM files ORDER BY digest")
            .fetch_all(&self.pool)
            .await?;
        digests
            .iter()
            .map(|d| Digest::parse(d).map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
