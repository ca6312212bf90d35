//! Import feature
//!
//! Launching imports, post-import verification, and the candidate-id
//! backfill.

pub mod routes;

pub use routes::imports_routes;
