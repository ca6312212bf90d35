//! CFDP Server
//!
//! Campaign finance data platform: ingests the published bulk files
//! (candidate master, committee master, individual contributions) into a
//! local SQLite store, reconciles them with records from the remote JSON
//! API, and exposes the job lifecycle over HTTP.
//!
//! # Layers
//!
//! - [`config`]: environment-based configuration
//! - [`db`]: pool construction, schema, busy-retry helpers
//! - [`ingest`]: the import pipeline and everything around it
//! - [`features`]: HTTP route slices (jobs, imports)
//! - [`api`]: application state, router, serve loop
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;

pub use config::Config;
pub use error::{AppError, AppResult};
