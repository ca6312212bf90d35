//! CFDP Common Library
//!
//! Shared types, utilities, and error handling for the CFDP workspace.
//!
//! # Overview
//!
//! This crate provides common functionality used by the server and CLI:
//!
//! - **Error Handling**: the `CfdpError` type with typed storage-busy
//!   discrimination used by the retry layer
//! - **Logging**: centralized tracing initialization
//! - **Types**: shared domain types (data types, cycles, sources)
//!
//! # Example
//!
//! ```no_run
//! use cfdp_common::{CfdpError, Result};
//! use cfdp_common::types::DataType;
//!
//! fn table_for(data_type: DataType) -> Result<&'static str> {
//!     Ok(data_type.table_name())
//! }
//! ```
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CfdpError, Result};
