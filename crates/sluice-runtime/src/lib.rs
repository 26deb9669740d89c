//! Sluice Runtime
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Batch job launcher for pluggable data-ingestion pipelines.
//!
//! # Overview
//!
//! A job is described by a properties file. The launcher:
//!
//! - **Plans** one work unit per source partition, resumed from its watermark
//! - **Groups** work units into execution slots when multi-work-units are enabled
//! - **Dispatches** slots onto an [`ExecutionSubstrate`], capping the number in flight
//! - **Runs** each work unit through extract, convert, fork and per-branch
//!   policy checking and writing
//! - **Commits** staged output into each branch's final dir, or removes every
//!   staging and output file of the job on failure
//! - **Records** watermarks and job history
//!
//! # Example
//!
//! ```no_run
//! use sluice_runtime::{JobLauncher, JobProperties};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let props = JobProperties::from_file("jobs/wiki.properties")?;
//!     let launcher = JobLauncher::builder().build();
//!     launcher.start().await?;
//!     let outcome = launcher.launch(&props).await?;
//!     println!("{} records extracted", outcome.records_extracted());
//!     launcher.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod commit;
pub mod config;
pub mod converter;
pub mod dispatcher;
pub mod error;
pub mod grouper;
pub mod history;
pub mod job;
pub mod launcher;
pub mod pipeline;
pub mod planner;
pub mod policy;
pub mod registry;
pub mod source;
pub mod state_store;
pub mod writer;

// Re-export commonly used types
pub use commit::{CommitCoordinator, CommitPhase, OutputCollector, TaskOutputCollector};
pub use config::LauncherConfig;
pub use dispatcher::{Dispatcher, ExecutionSubstrate, LocalSubstrate, Slot};
pub use error::{
    CleanupError, CommitError, LaunchError, PlanningError, StateStoreError, TaskError,
};
pub use history::{JobHistoryStore, MemoryHistoryStore, SqliteHistoryStore};
pub use job::{JobOutcome, JobProperties, JobSettings, JobStatus, TaskState, TaskStatus};
pub use launcher::{JobLauncher, JobPlan};
pub use policy::Severity;
pub use registry::Registry;
pub use state_store::{FsStateStore, MemoryStateStore, StateStore};
