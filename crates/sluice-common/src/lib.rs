//! Sluice Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Sluice workspace.
//!
//! # Overview
//!
//! - **Error Handling**: `SluiceError` and the crate-wide `Result` alias
//! - **Checksums**: file integrity verification used when publishing output
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Types**: file metadata recorded for published artifacts
//!
//! # Example
//!
//! ```no_run
//! use sluice_common::{Result, SluiceError};
//! use sluice_common::checksum::compute_file_checksum;
//! use sluice_common::types::ChecksumAlgorithm;
//!
//! fn fingerprint(path: &str) -> Result<String> {
//!     compute_file_checksum(path, ChecksumAlgorithm::Sha256)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SluiceError};
