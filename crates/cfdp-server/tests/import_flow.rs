//! End-to-end import flow tests against a file-backed store and generated
//! bulk files.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cfdp_common::types::{DataType, SourceKind};
use cfdp_server::config::DatabaseConfig;
use cfdp_server::db::create_pool;
use cfdp_server::ingest::ledger::{CreateJobParams, JobStatus, JobType};
use cfdp_server::ingest::normalize::normalize_api;
use cfdp_server::ingest::pipeline::{self, ImportPipeline};
use cfdp_server::ingest::verify::{self, VerifyStatus};
use cfdp_server::ingest::{IngestControl, LocalSourceLocator};

struct Harness {
    _dir: tempfile::TempDir,
    data_dir: std::path::PathBuf,
    pipeline: Arc<ImportPipeline>,
}

async fn harness(chunk_size: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("bulk");
    std::fs::create_dir_all(data_dir.join("2024")).unwrap();

    let pool = create_pool(&DatabaseConfig {
        path: dir.path().join("cfdp.db"),
        max_connections: 4,
        checkpoint_interval_secs: 1800,
    })
    .await
    .unwrap();

    let locator = Arc::new(LocalSourceLocator::new(&data_dir));
    let pipeline = Arc::new(ImportPipeline::new(pool, locator, chunk_size));

    Harness { _dir: dir, data_dir, pipeline }
}

fn contribution_line(i: u32) -> String {
    let mut fields = vec![String::new(); 21];
    fields[0] = format!("C{:08}", i % 100);
    fields[5] = "15".to_string();
    fields[7] = format!("DONOR, NUMBER {i}");
    fields[8] = "SPRINGFIELD".to_string();
    fields[9] = "IL".to_string();
    fields[13] = "06152023".to_string();
    fields[14] = format!("{}.00", 10 + i % 490);
    fields[20] = format!("SUB{i:012}");
    fields.join("|")
}

fn write_contribution_file(data_dir: &std::path::Path, rows: u32, malformed_every: Option<u32>) {
    let mut body = String::new();
    for i in 0..rows {
        body.push_str(&contribution_line(i));
        body.push('\n');
        if let Some(every) = malformed_every {
            if i % every == every - 1 {
                body.push_str("truncated|garbage|row\n");
            }
        }
    }
    std::fs::write(data_dir.join("2024/indiv24.txt"), body).unwrap();
}

fn write_candidate_file(data_dir: &std::path::Path, rows: u32) {
    let body: String = (0..rows)
        .map(|i| format!("H{i:08}|CANDIDATE {i}|DEM||IL|H|05||||||||\n"))
        .collect();
    std::fs::write(data_dir.join("2024/cn24.txt"), body).unwrap();
}

fn write_committee_file(data_dir: &std::path::Path, rows: u32) {
    let body: String = (0..rows)
        .map(|i| format!("C{i:08}|COMMITTEE {i}|DOE, JOHN||||IL||P|H|||||H{i:08}\n"))
        .collect();
    std::fs::write(data_dir.join("2024/cm24.txt"), body).unwrap();
}

#[tokio::test]
async fn ten_thousand_rows_with_fifty_malformed() {
    let h = harness(1_000).await;
    // 10 000 well-formed rows with a malformed row after every 200th: 50 in
    // total, interleaved through the file.
    write_contribution_file(&h.data_dir, 10_000, Some(200));

    let job_id = h
        .pipeline
        .ledger()
        .create(
            JobType::SingleCycle,
            CreateJobParams {
                cycle: Some(2024),
                cycles: None,
                data_type: Some(DataType::Contributions),
            },
        )
        .await
        .unwrap();
    h.pipeline.run_job(job_id, CancellationToken::new(), false).await;

    let job = h.pipeline.ledger().get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.imported_records, 10_000);
    assert_eq!(job.skipped_records, 50);
    assert_eq!(job.total_records, Some(10_050));
    assert_eq!(job.file_position, Some(10_050));
    assert!(job.error_message.is_none());

    assert_eq!(
        h.pipeline.store().count(DataType::Contributions, 2024).await.unwrap(),
        10_000
    );
}

#[tokio::test]
async fn cancel_lands_within_one_chunk_and_resume_finishes() {
    let chunk_size = 200u32;
    let h = harness(chunk_size as usize).await;
    write_contribution_file(&h.data_dir, 8_000, None);

    let job_id = h
        .pipeline
        .ledger()
        .create(
            JobType::SingleCycle,
            CreateJobParams {
                cycle: Some(2024),
                cycles: None,
                data_type: Some(DataType::Contributions),
            },
        )
        .await
        .unwrap();

    let token = CancellationToken::new();
    let run = {
        let pipeline = h.pipeline.clone();
        let token = token.clone();
        tokio::spawn(async move { pipeline.run_job(job_id, token, false).await })
    };

    // Wait for real progress, then cancel.
    let imported_at_cancel = loop {
        let job = h.pipeline.ledger().get(job_id).await.unwrap();
        if job.imported_records > 0 {
            token.cancel();
            break job.imported_records;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    run.await.unwrap();

    let job = h.pipeline.ledger().get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.is_resumable());
    // At most one further chunk landed after the cancel request.
    assert!(job.imported_records <= imported_at_cancel + chunk_size as i64 * 2);
    assert!(job.imported_records < 8_000);

    // Resume from the recorded position and finish.
    let control = Arc::new(IngestControl::new(2, 4));
    pipeline::resume_job(h.pipeline.clone(), control, job_id).await.unwrap();

    // Wait for the resumed task to finish. The row stays `cancelled` until
    // the spawned task flips it to running, so poll for completion.
    let mut job = h.pipeline.ledger().get(job_id).await.unwrap();
    for _ in 0..1_000 {
        job = h.pipeline.ledger().get(job_id).await.unwrap();
        if job.status == JobStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.imported_records, 8_000);
    // Exactly-once: every row stored once despite the interrupted run.
    assert_eq!(
        h.pipeline.store().count(DataType::Contributions, 2024).await.unwrap(),
        8_000
    );
}

#[tokio::test]
async fn bulk_then_api_enrichment_keeps_both_sources() {
    let h = harness(500).await;
    write_committee_file(&h.data_dir, 100);

    let job_id = h
        .pipeline
        .ledger()
        .create(
            JobType::SingleCycle,
            CreateJobParams {
                cycle: Some(2024),
                cycles: None,
                data_type: Some(DataType::Committees),
            },
        )
        .await
        .unwrap();
    h.pipeline.run_job(job_id, CancellationToken::new(), false).await;
    assert_eq!(
        h.pipeline.ledger().get(job_id).await.unwrap().status,
        JobStatus::Completed
    );

    // API delivers richer detail for one committee.
    let api_record = normalize_api(
        DataType::Committees,
        &serde_json::json!({
            "committee_id": "C00000007",
            "name": "COMMITTEE SEVEN (FEDERAL)",
            "treasurer_name": "ROE, RICHARD",
            "designation": "A",
        }),
    )
    .unwrap();
    h.pipeline
        .store()
        .upsert_chunk(DataType::Committees, 2024, SourceKind::Api, &[api_record])
        .await
        .unwrap();

    let stored = h
        .pipeline
        .store()
        .get(DataType::Committees, 2024, "C00000007")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.data_source.unwrap().as_str(), "both");
    // API name wins as the later writer; bulk-only linkage survives.
    assert_eq!(stored.fields.name.as_deref(), Some("COMMITTEE SEVEN (FEDERAL)"));
    assert_eq!(stored.fields.cand_id.as_deref(), Some("H00000007"));
    // Payload keeps each source's native fields.
    assert!(stored.payload.0.contains_key("CMTE_NM"));
    assert!(stored.payload.0.contains_key("treasurer_name"));
}

#[tokio::test]
async fn multi_type_import_then_verify_passes() {
    let h = harness(500).await;
    write_candidate_file(&h.data_dir, 300);
    write_committee_file(&h.data_dir, 200);
    write_contribution_file(&h.data_dir, 1_000, None);

    let job_id = h
        .pipeline
        .ledger()
        .create(
            JobType::MultiType,
            CreateJobParams { cycle: Some(2024), cycles: None, data_type: None },
        )
        .await
        .unwrap();
    h.pipeline.run_job(job_id, CancellationToken::new(), false).await;

    let job = h.pipeline.ledger().get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.imported_records, 300 + 200 + 1_000);

    let locator = Arc::new(LocalSourceLocator::new(&h.data_dir));
    let tolerance = cfdp_server::config::ToleranceConfig {
        min_records: 100,
        fraction: 0.001,
        per_type_min: Default::default(),
    };
    let report = verify::verify(h.pipeline.store(), locator.clone(), &tolerance, 2024)
        .await
        .unwrap();
    assert_eq!(report.overall, VerifyStatus::Pass);
    assert!(report.checks.iter().all(|c| c.status == VerifyStatus::Pass));

    let sample = verify::sample_check(
        h.pipeline.store(),
        locator,
        DataType::Contributions,
        2024,
        50,
    )
    .await
    .unwrap();
    assert_eq!(sample.checked, 50);
    assert_eq!(sample.matched, 50);
}

#[tokio::test]
async fn admission_ceiling_rejects_excess_jobs() {
    let h = harness(500).await;
    write_committee_file(&h.data_dir, 10);

    let control = Arc::new(IngestControl::new(2, 2));
    // Fill both admission slots with placeholders.
    control.register(uuid::Uuid::new_v4()).unwrap();
    control.register(uuid::Uuid::new_v4()).unwrap();

    let err = pipeline::spawn_job(
        h.pipeline.clone(),
        control.clone(),
        JobType::SingleCycle,
        CreateJobParams {
            cycle: Some(2024),
            cycles: None,
            data_type: Some(DataType::Committees),
        },
        false,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        cfdp_common::CfdpError::TooManyOperations { limit: 2 }
    ));

    // Nothing was recorded in the ledger for the rejected request.
    assert!(h.pipeline.ledger().list_recent(10).await.unwrap().is_empty());
}
