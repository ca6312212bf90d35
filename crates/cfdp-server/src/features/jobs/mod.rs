//! Job lifecycle feature
//!
//! Read endpoints over the job ledger plus the cancel/resume verbs.

pub mod routes;

pub use routes::jobs_routes;
