//! Bulk ingestion infrastructure
//!
//! Everything between a downloaded bulk file and a verified set of rows in
//! the store lives here.
//!
//! # Architecture
//!
//! - **ledger**: persisted job state machine (`import_jobs` table)
//! - **source**: source file resolution (`SourceLocator`) and zip handling
//! - **parser**: chunked streaming reader for pipe-delimited bulk files
//! - **normalize**: per-source field normalization into canonical fields
//! - **merge**: dual-source smart merge with provenance-tagged payloads
//! - **store**: chunk upserts (one short-lived transaction per chunk)
//! - **control**: concurrency controller (admission, cancellation, shutdown)
//! - **health**: WAL checkpoint guard
//! - **metadata**: per-(type, cycle) file freshness bookkeeping
//! - **verify** / **backfill**: post-import verification and candidate-id
//!   backfill
//! - **remote**: paginated JSON API client used by backfill fallback
//! - **pipeline**: ties the above together per job

pub mod backfill;
pub mod control;
pub mod health;
pub mod ledger;
pub mod merge;
pub mod metadata;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod remote;
pub mod source;
pub mod store;
pub mod verify;

pub use control::IngestControl;
pub use ledger::{CreateJobParams, ImportJob, JobLedger, JobStatus, JobType};
pub use parser::{ChunkedReader, FileLayout, RawBatch};
pub use pipeline::ImportPipeline;
pub use source::{LocalSourceLocator, SourceFile, SourceLocator};
