//! Candidate-id backfill
//!
//! Contribution rows arrive keyed to a committee but usually without a
//! candidate. Backfill resolves the linkage per committee id, in order of
//! cost: the local committees table, then the remote API (when configured),
//! then any sibling contribution that already carries the candidate.
//! Committees that resolve nowhere stay null and are retried on the next
//! run, so repeated runs only ever shrink the unresolved set.

use std::collections::HashMap;

use sqlx::SqlitePool;

use cfdp_common::Result;

use crate::db;

use super::remote::RemoteClient;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BackfillOutcome {
    /// Rows updated with a candidate id
    pub updated: u64,
    /// Distinct committee ids examined
    pub committees_seen: usize,
    pub resolved_local: usize,
    pub resolved_remote: usize,
    pub resolved_sibling: usize,
    pub unresolved: usize,
}

/// Fill null `cand_id` columns on contributions, bounded by `limit` distinct
/// committees per run, committing per batch of `batch_size` committees.
pub async fn backfill_candidate_ids(
    pool: &SqlitePool,
    remote: &RemoteClient,
    batch_size: usize,
    limit: usize,
) -> Result<BackfillOutcome> {
    let batch_size = batch_size.max(1);
    let mut outcome = BackfillOutcome::default();
    // Resolution cache for the run; an unresolvable committee is cached too
    // so it is only looked up once.
    let mut cache: HashMap<String, Option<String>> = HashMap::new();

    let committees: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT cmte_id FROM contributions
        WHERE cand_id IS NULL AND cmte_id IS NOT NULL
        ORDER BY cmte_id
        LIMIT ?
        "#,
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(db::map_storage_err)?;

    outcome.committees_seen = committees.len();

    for batch in committees.chunks(batch_size) {
        for (cmte_id,) in batch {
            let resolution = match cache.get(cmte_id) {
                Some(cached) => cached.clone(),
                None => {
                    let resolved = resolve(pool, remote, cmte_id, &mut outcome).await?;
                    cache.insert(cmte_id.clone(), resolved.clone());
                    resolved
                }
            };

            let Some(cand_id) = resolution else {
                outcome.unresolved += 1;
                continue;
            };

            let updated = db::with_busy_retry("backfill.update", || {
                let pool = pool.clone();
                let cand_id = cand_id.clone();
                let cmte_id = cmte_id.clone();
                async move {
                    sqlx::query(
                        "UPDATE contributions SET cand_id = ?, updated_at = ?
                         WHERE cmte_id = ? AND cand_id IS NULL",
                    )
                    .bind(cand_id)
                    .bind(chrono::Utc::now())
                    .bind(cmte_id)
                    .execute(&pool)
                    .await
                }
            })
            .await?;
            outcome.updated += updated.rows_affected();
        }
        tracing::debug!(
            updated = outcome.updated,
            unresolved = outcome.unresolved,
            "Backfill batch committed"
        );
    }

    tracing::info!(
        committees_seen = outcome.committees_seen,
        updated = outcome.updated,
        resolved_local = outcome.resolved_local,
        resolved_remote = outcome.resolved_remote,
        resolved_sibling = outcome.resolved_sibling,
        unresolved = outcome.unresolved,
        "Candidate-id backfill finished"
    );
    Ok(outcome)
}

async fn resolve(
    pool: &SqlitePool,
    remote: &RemoteClient,
    cmte_id: &str,
    outcome: &mut BackfillOutcome,
) -> Result<Option<String>> {
    // Tier 1: the committee master already names its candidate.
    let local: Option<(String,)> = sqlx::query_as(
        "SELECT cand_id FROM committees
         WHERE cmte_id = ? AND cand_id IS NOT NULL
         ORDER BY cycle DESC LIMIT 1",
    )
    .bind(cmte_id)
    .fetch_optional(pool)
    .await
    .map_err(db::map_storage_err)?;
    if let Some((cand_id,)) = local {
        outcome.resolved_local += 1;
        return Ok(Some(cand_id));
    }

    // Tier 2: remote lookup, only when a key is configured. Network faults
    // degrade to the next tier rather than failing the run.
    if remote.is_configured() {
        match remote.committee(cmte_id).await {
            Ok(Some(details)) => {
                if let Some(cand_id) = details.candidate_ids.into_iter().next() {
                    outcome.resolved_remote += 1;
                    return Ok(Some(cand_id));
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(cmte_id = cmte_id, error = %err, "Remote committee lookup failed");
            }
        }
    }

    // Tier 3: a sibling contribution already carries the linkage.
    let sibling: Option<(String,)> = sqlx::query_as(
        "SELECT cand_id FROM contributions
         WHERE cmte_id = ? AND cand_id IS NOT NULL LIMIT 1",
    )
    .bind(cmte_id)
    .fetch_optional(pool)
    .await
    .map_err(db::map_storage_err)?;
    if let Some((cand_id,)) = sibling {
        outcome.resolved_sibling += 1;
        return Ok(Some(cand_id));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteApiConfig;
    use crate::db::create_memory_pool;
    use chrono::Utc;

    fn offline_remote() -> RemoteClient {
        RemoteClient::new(&RemoteApiConfig {
            base_url: "https://example.invalid/v1".to_string(),
            api_key: None,
        })
        .unwrap()
    }

    async fn insert_contribution(pool: &SqlitePool, sub_id: &str, cmte_id: &str, cand_id: Option<&str>) {
        sqlx::query(
            r#"
            INSERT INTO contributions
                (sub_id, cycle, cmte_id, cand_id, data_source, last_updated_from,
                 created_at, updated_at)
            VALUES (?, 2024, ?, ?, 'bulk', 'bulk', ?, ?)
            "#,
        )
        .bind(sub_id)
        .bind(cmte_id)
        .bind(cand_id)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_committee(pool: &SqlitePool, cmte_id: &str, cand_id: Option<&str>) {
        sqlx::query(
            r#"
            INSERT INTO committees
                (cmte_id, cycle, cand_id, data_source, last_updated_from, created_at, updated_at)
            VALUES (?, 2024, ?, 'bulk', 'bulk', ?, ?)
            "#,
        )
        .bind(cmte_id)
        .bind(cand_id)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn null_cand_count(pool: &SqlitePool) -> i64 {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM contributions WHERE cand_id IS NULL")
                .fetch_one(pool)
                .await
                .unwrap();
        count
    }

    #[tokio::test]
    async fn test_resolves_from_local_committee() {
        let pool = create_memory_pool().await.unwrap();
        insert_committee(&pool, "C1", Some("H1")).await;
        insert_contribution(&pool, "S1", "C1", None).await;
        insert_contribution(&pool, "S2", "C1", None).await;

        let outcome = backfill_candidate_ids(&pool, &offline_remote(), 10, 100)
            .await
            .unwrap();
        assert_eq!(outcome.updated, 2);
        assert_eq!(outcome.resolved_local, 1);
        assert_eq!(null_cand_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_resolves_from_sibling_contribution() {
        let pool = create_memory_pool().await.unwrap();
        insert_contribution(&pool, "S1", "C1", Some("H9")).await;
        insert_contribution(&pool, "S2", "C1", None).await;

        let outcome = backfill_candidate_ids(&pool, &offline_remote(), 10, 100)
            .await
            .unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.resolved_sibling, 1);
        assert_eq!(null_cand_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_unresolvable_rows_stay_null() {
        let pool = create_memory_pool().await.unwrap();
        insert_contribution(&pool, "S1", "C404", None).await;

        let outcome = backfill_candidate_ids(&pool, &offline_remote(), 10, 100)
            .await
            .unwrap();
        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.unresolved, 1);
        assert_eq!(null_cand_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_repeated_runs_converge() {
        let pool = create_memory_pool().await.unwrap();
        insert_committee(&pool, "C1", Some("H1")).await;
        insert_contribution(&pool, "S1", "C1", None).await;
        insert_contribution(&pool, "S2", "C404", None).await;

        let first = backfill_candidate_ids(&pool, &offline_remote(), 10, 100)
            .await
            .unwrap();
        assert_eq!(first.updated, 1);

        // Second run finds nothing new and updates nothing.
        let second = backfill_candidate_ids(&pool, &offline_remote(), 10, 100)
            .await
            .unwrap();
        assert_eq!(second.updated, 0);
        assert_eq!(second.unresolved, 1);
    }

    #[tokio::test]
    async fn test_limit_bounds_committees_per_run() {
        let pool = create_memory_pool().await.unwrap();
        for i in 0..5 {
            insert_committee(&pool, &format!("C{i}"), Some(&format!("H{i}"))).await;
            insert_contribution(&pool, &format!("S{i}"), &format!("C{i}"), None).await;
        }

        let outcome = backfill_candidate_ids(&pool, &offline_remote(), 2, 3)
            .await
            .unwrap();
        assert_eq!(outcome.committees_seen, 3);
        assert_eq!(outcome.updated, 3);
        assert_eq!(null_cand_count(&pool).await, 2);
    }
}
