//! File metadata bookkeeping
//!
//! One row per (data type, cycle): when the file was last imported and how
//! many rows it carried. `run_import` consults this to skip re-importing a
//! file that has not changed since the last import, unless forced.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use cfdp_common::types::{Cycle, DataType};
use cfdp_common::Result;

use crate::db;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileMetadata {
    pub data_type: String,
    pub cycle: i64,
    pub last_download_at: Option<DateTime<Utc>>,
    pub last_import_at: Option<DateTime<Utc>>,
    pub record_count: Option<i64>,
}

#[derive(Clone)]
pub struct FileMetadataStore {
    pool: SqlitePool,
}

impl FileMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, data_type: DataType, cycle: Cycle) -> Result<Option<FileMetadata>> {
        sqlx::query_as::<_, FileMetadata>(
            "SELECT * FROM file_metadata WHERE data_type = ? AND cycle = ?",
        )
        .bind(data_type.as_str())
        .bind(cycle)
        .fetch_optional(&self.pool)
        .await
        .map_err(db::map_storage_err)
    }

    /// Whether the stored import is at least as new as the source file.
    /// Unknown files and files without an import timestamp are never fresh.
    pub async fn is_fresh(
        &self,
        data_type: DataType,
        cycle: Cycle,
        file_modified: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let Some(meta) = self.get(data_type, cycle).await? else {
            return Ok(false);
        };
        let Some(last_import) = meta.last_import_at else {
            return Ok(false);
        };
        match file_modified {
            Some(modified) => Ok(last_import >= modified),
            // No mtime to compare against; having any import counts as fresh.
            None => Ok(true),
        }
    }

    /// Record a completed import.
    pub async fn record_import(
        &self,
        data_type: DataType,
        cycle: Cycle,
        record_count: i64,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO file_metadata (data_type, cycle, last_import_at, record_count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (data_type, cycle) DO UPDATE SET
                last_import_at = excluded.last_import_at,
                record_count = excluded.record_count
            "#,
        )
        .bind(data_type.as_str())
        .bind(cycle)
        .bind(now)
        .bind(record_count)
        .execute(&self.pool)
        .await
        .map_err(db::map_storage_err)?;
        Ok(())
    }
}
