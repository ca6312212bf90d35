//! Row store
//!
//! Chunk upserts for the three record tables. Each chunk is one short-lived
//! transaction: read existing rows, merge, write back. Busy/locked errors
//! retry the whole chunk; the merge is idempotent so a replayed chunk is
//! harmless.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};

use cfdp_common::types::{Cycle, DataType, SourceKind};
use cfdp_common::{CfdpError, Result};

use crate::db;

use super::merge::{merge, MergedRecord, RawPayload};
use super::normalize::{CanonicalFields, NormalizedRecord};

#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Merge-upsert one chunk of normalized records inside one transaction.
    /// Returns the number of rows written.
    pub async fn upsert_chunk(
        &self,
        data_type: DataType,
        cycle: Cycle,
        source: SourceKind,
        records: &[NormalizedRecord],
    ) -> Result<u64> {
        let mut delay = db::INITIAL_BUSY_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.upsert_chunk_once(data_type, cycle, source, records).await {
                Ok(written) => return Ok(written),
                Err(CfdpError::StorageBusy(_)) if attempt < db::MAX_BUSY_ATTEMPTS => {
                    tracing::warn!(
                        data_type = %data_type,
                        cycle = cycle,
                        attempt = attempt,
                        "Chunk upsert hit busy store, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn upsert_chunk_once(
        &self,
        data_type: DataType,
        cycle: Cycle,
        source: SourceKind,
        records: &[NormalizedRecord],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(db::map_storage_err)?;
        let now = Utc::now();
        let mut written = 0u64;

        for record in records {
            let existing = load_existing(&mut *tx, data_type, cycle, &record.key).await?;
            let merged = merge(existing, record, source);
            write_row(&mut *tx, data_type, cycle, source, &merged, now).await?;
            written += 1;
        }

        tx.commit().await.map_err(db::map_storage_err)?;
        Ok(written)
    }

    /// Fetch one stored record in merged form.
    pub async fn get(
        &self,
        data_type: DataType,
        cycle: Cycle,
        key: &str,
    ) -> Result<Option<MergedRecord>> {
        let mut conn = self.pool.acquire().await.map_err(db::map_storage_err)?;
        load_existing(&mut *conn, data_type, cycle, key).await
    }

    /// Stored row count for a (type, cycle).
    pub async fn count(&self, data_type: DataType, cycle: Cycle) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE cycle = ?",
            data_type.table_name()
        );
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(cycle)
            .fetch_one(&self.pool)
            .await
            .map_err(db::map_storage_err)?;
        Ok(count)
    }

    /// Drop every row for a (type, cycle). Used by cleanup-reimport jobs.
    pub async fn delete_cycle(&self, data_type: DataType, cycle: Cycle) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE cycle = ?", data_type.table_name());
        let result = sqlx::query(&sql)
            .bind(cycle)
            .execute(&self.pool)
            .await
            .map_err(db::map_storage_err)?;
        Ok(result.rows_affected())
    }
}

async fn load_existing(
    conn: &mut SqliteConnection,
    data_type: DataType,
    cycle: Cycle,
    key: &str,
) -> Result<Option<MergedRecord>> {
    let sql = match data_type {
        DataType::Candidates => {
            "SELECT name, party, office, state, district, data_source, raw_payload
             FROM candidates WHERE cand_id = ? AND cycle = ?"
        }
        DataType::Committees => {
            "SELECT name, treasurer, state, designation, committee_type, cand_id,
                    data_source, raw_payload
             FROM committees WHERE cmte_id = ? AND cycle = ?"
        }
        DataType::Contributions => {
            "SELECT cmte_id, cand_id, contributor_name, city, state, zip_code,
                    employer, occupation, amount, contribution_date, transaction_type,
                    data_source, raw_payload
             FROM contributions WHERE sub_id = ? AND cycle = ?"
        }
    };

    let row = sqlx::query(sql)
        .bind(key)
        .bind(cycle)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db::map_storage_err)?;

    let Some(row) = row else { return Ok(None) };

    let data_source = row
        .try_get::<String, _>("data_source")
        .map_err(db::map_storage_err)?
        .parse()
        .map_err(|e: anyhow::Error| CfdpError::Storage(e.to_string()))?;
    let payload = RawPayload::from_json(
        &row.try_get::<String, _>("raw_payload").map_err(db::map_storage_err)?,
    )?;

    let get = |name: &str| -> Result<Option<String>> {
        row.try_get::<Option<String>, _>(name).map_err(db::map_storage_err)
    };

    let fields = match data_type {
        DataType::Candidates => CanonicalFields {
            name: get("name")?,
            party: get("party")?,
            office: get("office")?,
            state: get("state")?,
            district: get("district")?,
            ..Default::default()
        },
        DataType::Committees => CanonicalFields {
            name: get("name")?,
            treasurer: get("treasurer")?,
            state: get("state")?,
            designation: get("designation")?,
            committee_type: get("committee_type")?,
            cand_id: get("cand_id")?,
            ..Default::default()
        },
        DataType::Contributions => CanonicalFields {
            cmte_id: get("cmte_id")?,
            cand_id: get("cand_id")?,
            name: get("contributor_name")?,
            city: get("city")?,
            state: get("state")?,
            zip_code: get("zip_code")?,
            employer: get("employer")?,
            occupation: get("occupation")?,
            amount: row
                .try_get::<Option<f64>, _>("amount")
                .map_err(db::map_storage_err)?,
            date: get("contribution_date")?
                .as_deref()
                .and_then(super::normalize::parse_date),
            transaction_type: get("transaction_type")?,
            ..Default::default()
        },
    };

    Ok(Some(MergedRecord {
        key: key.to_string(),
        fields,
        data_source: Some(data_source),
        payload,
    }))
}

async fn write_row(
    conn: &mut SqliteConnection,
    data_type: DataType,
    cycle: Cycle,
    source: SourceKind,
    merged: &MergedRecord,
    now: DateTime<Utc>,
) -> Result<()> {
    let data_source = merged
        .data_source
        .unwrap_or_else(|| source.into())
        .as_str();
    let payload = merged.payload.to_json()?;
    let f = &merged.fields;

    let query = match data_type {
        DataType::Candidates => sqlx::query(
            r#"
            INSERT INTO candidates
                (cand_id, cycle, name, party, office, state, district,
                 data_source, last_updated_from, raw_payload, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (cand_id, cycle) DO UPDATE SET
                name = excluded.name,
                party = excluded.party,
                office = excluded.office,
                state = excluded.state,
                district = excluded.district,
                data_source = excluded.data_source,
                last_updated_from = excluded.last_updated_from,
                raw_payload = excluded.raw_payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&merged.key)
        .bind(cycle)
        .bind(&f.name)
        .bind(&f.party)
        .bind(&f.office)
        .bind(&f.state)
        .bind(&f.district)
        .bind(data_source)
        .bind(source.as_str())
        .bind(payload)
        .bind(now)
        .bind(now),
        DataType::Committees => sqlx::query(
            r#"
            INSERT INTO committees
                (cmte_id, cycle, name, treasurer, state, designation, committee_type,
                 cand_id, data_source, last_updated_from, raw_payload, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (cmte_id, cycle) DO UPDATE SET
                name = excluded.name,
                treasurer = excluded.treasurer,
                state = excluded.state,
                designation = excluded.designation,
                committee_type = excluded.committee_type,
                cand_id = excluded.cand_id,
                data_source = excluded.data_source,
                last_updated_from = excluded.last_updated_from,
                raw_payload = excluded.raw_payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&merged.key)
        .bind(cycle)
        .bind(&f.name)
        .bind(&f.treasurer)
        .bind(&f.state)
        .bind(&f.designation)
        .bind(&f.committee_type)
        .bind(&f.cand_id)
        .bind(data_source)
        .bind(source.as_str())
        .bind(payload)
        .bind(now)
        .bind(now),
        DataType::Contributions => sqlx::query(
            r#"
            INSERT INTO contributions
                (sub_id, cycle, cmte_id, cand_id, contributor_name, city, state,
                 zip_code, employer, occupation, amount, contribution_date,
                 transaction_type, data_source, last_updated_from, raw_payload,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (sub_id) DO UPDATE SET
                cycle = excluded.cycle,
                cmte_id = excluded.cmte_id,
                cand_id = excluded.cand_id,
                contributor_name = excluded.contributor_name,
                city = excluded.city,
                state = excluded.state,
                zip_code = excluded.zip_code,
                employer = excluded.employer,
                occupation = excluded.occupation,
                amount = excluded.amount,
                contribution_date = excluded.contribution_date,
                transaction_type = excluded.transaction_type,
                data_source = excluded.data_source,
                last_updated_from = excluded.last_updated_from,
                raw_payload = excluded.raw_payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&merged.key)
        .bind(cycle)
        .bind(&f.cmte_id)
        .bind(&f.cand_id)
        .bind(&f.name)
        .bind(&f.city)
        .bind(&f.state)
        .bind(&f.zip_code)
        .bind(&f.employer)
        .bind(&f.occupation)
        .bind(f.amount)
        .bind(f.date.map(|d| d.to_string()))
        .bind(&f.transaction_type)
        .bind(data_source)
        .bind(source.as_str())
        .bind(payload)
        .bind(now)
        .bind(now),
    };

    query.execute(&mut *conn).await.map_err(db::map_storage_err)?;
    Ok(())
}
