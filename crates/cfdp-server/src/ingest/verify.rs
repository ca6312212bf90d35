//! Post-import verification
//!
//! Two checks per cycle: row counts against the source files within a
//! configurable tolerance, and a bounded random sample of source rows that
//! must be findable in the store by natural key.

use std::sync::Arc;

use rand::seq::index::sample;
use serde::Serialize;

use cfdp_common::types::{Cycle, DataType};
use cfdp_common::{CfdpError, Result};

use crate::config::ToleranceConfig;

use super::normalize::normalize_bulk;
use super::parser::ChunkedReader;
use super::source::{self, SourceLocator};
use super::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    /// Counts agree within the tolerance window
    Pass,
    /// Source file not on disk; nothing to compare against
    Skipped,
    /// Store carries substantially more rows than the file
    Warning,
    /// File carries substantially more rows than the store
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeVerification {
    pub data_type: DataType,
    pub file_count: Option<i64>,
    pub stored_count: i64,
    /// `file_count - stored_count`
    pub difference: Option<i64>,
    pub allowance: Option<i64>,
    pub status: VerifyStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub cycle: Cycle,
    pub checks: Vec<TypeVerification>,
    pub overall: VerifyStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleReport {
    pub cycle: Cycle,
    pub data_type: DataType,
    pub checked: usize,
    pub matched: usize,
    pub missing: Vec<String>,
}

/// Compare stored counts against source-file counts for every data type.
pub async fn verify(
    store: &RecordStore,
    locator: Arc<dyn SourceLocator>,
    tolerance: &ToleranceConfig,
    cycle: Cycle,
) -> Result<VerificationReport> {
    let mut checks = Vec::with_capacity(DataType::ALL.len());

    for data_type in DataType::ALL {
        let stored_count = store.count(data_type, cycle).await?;

        let source = match locator.locate(data_type, cycle) {
            Ok(source) => source,
            Err(CfdpError::SourceUnavailable(_)) => {
                tracing::info!(data_type = %data_type, cycle = cycle, "No source file, skipping count check");
                checks.push(TypeVerification {
                    data_type,
                    file_count: None,
                    stored_count,
                    difference: None,
                    allowance: None,
                    status: VerifyStatus::Skipped,
                });
                continue;
            }
            Err(err) => return Err(err),
        };

        let layout = source.layout.clone();
        let path = source.path.clone();
        let file_count = tokio::task::spawn_blocking(move || ChunkedReader::count_rows(&path, layout))
            .await
            .map_err(|e| CfdpError::Unknown(e.to_string()))?
            .map_err(|e| CfdpError::Parse(e.to_string()))? as i64;

        // Signed: positive when the file carries rows the store is missing.
        let difference = file_count - stored_count;
        let allowance = tolerance.allowance(data_type, file_count);
        let status = if difference.abs() <= allowance {
            VerifyStatus::Pass
        } else if difference > 0 {
            VerifyStatus::Fail
        } else {
            VerifyStatus::Warning
        };

        tracing::info!(
            data_type = %data_type,
            cycle = cycle,
            file_count = file_count,
            stored_count = stored_count,
            difference = difference,
            allowance = allowance,
            status = ?status,
            "Count verification"
        );

        checks.push(TypeVerification {
            data_type,
            file_count: Some(file_count),
            stored_count,
            difference: Some(difference),
            allowance: Some(allowance),
            status,
        });
    }

    let overall = checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(VerifyStatus::Pass);

    Ok(VerificationReport { cycle, checks, overall })
}

/// Re-normalize a random sample of source rows and confirm each is stored
/// under its natural key.
pub async fn sample_check(
    store: &RecordStore,
    locator: Arc<dyn SourceLocator>,
    data_type: DataType,
    cycle: Cycle,
    sample_size: usize,
) -> Result<SampleReport> {
    let source = locator.locate(data_type, cycle)?;
    let layout = source.layout.clone();

    // One extraction serves both the count and the sampling pass.
    let mat_path = source.path.clone();
    let mat_layout = layout.clone();
    let local = tokio::task::spawn_blocking(move || source::materialize(&mat_path, &mat_layout))
        .await
        .map_err(|e| CfdpError::Unknown(e.to_string()))?
        .map_err(|e| CfdpError::SourceUnavailable(e.to_string()))?;
    let path = local.path().to_path_buf();

    let count_layout = layout.clone();
    let count_path = path.clone();
    let total = tokio::task::spawn_blocking(move || {
        ChunkedReader::count_rows(&count_path, count_layout)
    })
    .await
    .map_err(|e| CfdpError::Unknown(e.to_string()))?
    .map_err(|e| CfdpError::Parse(e.to_string()))?;

    if total == 0 {
        return Ok(SampleReport { cycle, data_type, checked: 0, matched: 0, missing: vec![] });
    }

    let take = sample_size.min(total as usize);
    let mut offsets: Vec<usize> = {
        let mut rng = rand::thread_rng();
        sample(&mut rng, total as usize, take).into_vec()
    };
    offsets.sort_unstable();

    // One sequential pass. Each next_batch(1) consumes rows up to one
    // well-formed row; a sampled offset the position jumps over was
    // malformed in the source and is dropped from the sample, exactly as the
    // import dropped it.
    let rows = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Vec<String>>> {
        let mut reader = ChunkedReader::open(&path, layout)?;
        let mut collected = Vec::with_capacity(offsets.len());
        let mut wanted = offsets.into_iter().peekable();
        while let Some(batch) = reader.next_batch(1)? {
            let next_position = batch.next_position as usize;
            if let Some(row) = batch.rows.into_iter().next() {
                // The well-formed row sits at next_position - 1.
                if wanted.peek() == Some(&(next_position - 1)) {
                    collected.push(row);
                    wanted.next();
                }
            }
            while matches!(wanted.peek(), Some(&w) if w < next_position) {
                wanted.next();
            }
            if wanted.peek().is_none() {
                break;
            }
        }
        Ok(collected)
    })
    .await
    .map_err(|e| CfdpError::Unknown(e.to_string()))?
    .map_err(|e| CfdpError::Parse(e.to_string()))?;

    let mut matched = 0usize;
    let mut missing = Vec::new();
    let checked = rows.len();

    for row in rows {
        let record = normalize_bulk(data_type, &row)?;
        match store.get(data_type, cycle, &record.key).await? {
            Some(_) => matched += 1,
            None => missing.push(record.key),
        }
    }

    Ok(SampleReport { cycle, data_type, checked, matched, missing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;
    use crate::ingest::source::LocalSourceLocator;
    use cfdp_common::types::SourceKind;
    use std::collections::HashMap;

    fn tolerance() -> ToleranceConfig {
        ToleranceConfig {
            min_records: 2,
            fraction: 0.0,
            per_type_min: HashMap::new(),
        }
    }

    fn candidate_line(id: u32) -> String {
        format!("H{id:08}|SMITH {id}|DEM||MI|H|13||||||||")
    }

    async fn import_candidates(store: &RecordStore, ids: std::ops::Range<u32>) {
        let records: Vec<_> = ids
            .map(|id| {
                let line = candidate_line(id);
                let row: Vec<String> = line.split('|').map(String::from).collect();
                normalize_bulk(DataType::Candidates, &row).unwrap()
            })
            .collect();
        store
            .upsert_chunk(DataType::Candidates, 2024, SourceKind::Bulk, &records)
            .await
            .unwrap();
    }

    fn write_candidate_file(dir: &tempfile::TempDir, ids: std::ops::Range<u32>) {
        let cycle_dir = dir.path().join("2024");
        std::fs::create_dir_all(&cycle_dir).unwrap();
        let body: String = ids.map(|id| candidate_line(id) + "\n").collect();
        std::fs::write(cycle_dir.join("cn24.txt"), body).unwrap();
    }

    #[tokio::test]
    async fn test_verify_passes_on_exact_counts() {
        let dir = tempfile::tempdir().unwrap();
        write_candidate_file(&dir, 0..10);
        let store = RecordStore::new(create_memory_pool().await.unwrap());
        import_candidates(&store, 0..10).await;

        let locator = Arc::new(LocalSourceLocator::new(dir.path()));
        let report = verify(&store, locator, &tolerance(), 2024).await.unwrap();

        let check = report
            .checks
            .iter()
            .find(|c| c.data_type == DataType::Candidates)
            .unwrap();
        assert_eq!(check.status, VerifyStatus::Pass);
        assert_eq!(check.file_count, Some(10));
        assert_eq!(check.stored_count, 10);
        // Committee/contribution files are absent.
        assert!(report
            .checks
            .iter()
            .filter(|c| c.data_type != DataType::Candidates)
            .all(|c| c.status == VerifyStatus::Skipped));
    }

    #[tokio::test]
    async fn test_verify_passes_within_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        // Ten good rows plus two malformed ones the import skipped; the file
        // count of 12 against 10 stored sits inside the allowance of 2.
        let cycle_dir = dir.path().join("2024");
        std::fs::create_dir_all(&cycle_dir).unwrap();
        let mut body: String = (0..10).map(|id| candidate_line(id) + "\n").collect();
        body.push_str("truncated|row\n");
        body.push_str("another bad row\n");
        std::fs::write(cycle_dir.join("cn24.txt"), body).unwrap();

        let store = RecordStore::new(create_memory_pool().await.unwrap());
        import_candidates(&store, 0..10).await;

        let locator = Arc::new(LocalSourceLocator::new(dir.path()));
        let report = verify(&store, locator, &tolerance(), 2024).await.unwrap();
        let check = report
            .checks
            .iter()
            .find(|c| c.data_type == DataType::Candidates)
            .unwrap();
        assert_eq!(check.status, VerifyStatus::Pass);
        assert_eq!(check.difference, Some(2));
    }

    #[tokio::test]
    async fn test_verify_fails_when_file_exceeds_store_beyond_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        write_candidate_file(&dir, 0..10);
        let store = RecordStore::new(create_memory_pool().await.unwrap());
        // Seven rows missing from the store: well beyond the allowance of 2.
        import_candidates(&store, 0..3).await;

        let locator = Arc::new(LocalSourceLocator::new(dir.path()));
        let report = verify(&store, locator, &tolerance(), 2024).await.unwrap();
        let check = report
            .checks
            .iter()
            .find(|c| c.data_type == DataType::Candidates)
            .unwrap();
        assert_eq!(check.status, VerifyStatus::Fail);
        assert_eq!(report.overall, VerifyStatus::Fail);
    }

    #[tokio::test]
    async fn test_verify_warns_when_store_exceeds_file_beyond_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        // The file shrank to 3 rows while 10 remain stored: surplus rows are
        // a warning, not a failure.
        write_candidate_file(&dir, 0..3);
        let store = RecordStore::new(create_memory_pool().await.unwrap());
        import_candidates(&store, 0..10).await;

        let locator = Arc::new(LocalSourceLocator::new(dir.path()));
        let report = verify(&store, locator, &tolerance(), 2024).await.unwrap();
        let check = report
            .checks
            .iter()
            .find(|c| c.data_type == DataType::Candidates)
            .unwrap();
        assert_eq!(check.status, VerifyStatus::Warning);
        assert_eq!(check.difference, Some(-7));
        assert_eq!(report.overall, VerifyStatus::Warning);
    }

    #[tokio::test]
    async fn test_sample_check_finds_imported_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_candidate_file(&dir, 0..50);
        let store = RecordStore::new(create_memory_pool().await.unwrap());
        import_candidates(&store, 0..50).await;

        let locator = Arc::new(LocalSourceLocator::new(dir.path()));
        let report = sample_check(&store, locator, DataType::Candidates, 2024, 10)
            .await
            .unwrap();
        assert_eq!(report.checked, 10);
        assert_eq!(report.matched, 10);
        assert!(report.missing.is_empty());
    }

    #[tokio::test]
    async fn test_sample_check_reports_missing_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_candidate_file(&dir, 0..20);
        let store = RecordStore::new(create_memory_pool().await.unwrap());
        // Nothing imported at all.
        let locator = Arc::new(LocalSourceLocator::new(dir.path()));
        let report = sample_check(&store, locator, DataType::Candidates, 2024, 5)
            .await
            .unwrap();
        assert_eq!(report.checked, 5);
        assert_eq!(report.matched, 0);
        assert_eq!(report.missing.len(), 5);
    }
}
