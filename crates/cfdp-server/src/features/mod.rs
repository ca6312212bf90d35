//! Feature modules
//!
//! Vertical slices over the ingest layer: each feature owns its routes and
//! request/response shapes.

pub mod imports;
pub mod jobs;
