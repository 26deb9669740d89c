//! Error types for the job launcher
//!
//! Each layer has its own error enum. `LaunchError` is what callers of
//! [`crate::JobLauncher::launch`] observe.

use std::path::PathBuf;
use thiserror::Error;

use crate::policy::Severity;

/// Kind of pluggable component looked up in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Source,
    Converter,
    RowLevelPolicy,
    TaskLevelPolicy,
    Writer,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentKind::Source => write!(f, "source"),
            ComponentKind::Converter => write!(f, "converter"),
            ComponentKind::RowLevelPolicy => write!(f, "row-level policy"),
            ComponentKind::TaskLevelPolicy => write!(f, "task-level policy"),
            ComponentKind::Writer => write!(f, "writer"),
        }
    }
}

/// Fatal errors raised before any work is dispatched
#[derive(Error, Debug)]
pub enum PlanningError {
    #[error("Failed to read job properties from {path}: {source}")]
    Properties {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Missing required property: {0}")]
    MissingProperty(String),

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidProperty {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Unknown {kind} '{name}'")]
    UnknownComponent { kind: ComponentKind, name: String },

    #[error("Invalid argument for {kind} '{name}': {reason}")]
    InvalidComponentArgument {
        kind: ComponentKind,
        name: String,
        reason: String,
    },

    #[error("Branch {branch}: {list_key} has {policies} entries but {severities} severities")]
    PolicySeverityMismatch {
        branch: usize,
        list_key: String,
        policies: usize,
        severities: usize,
    },

    #[error("Cannot enumerate source {partition}: {reason}")]
    SourceUnavailable { partition: String, reason: String },

    #[error("Source partition {0} is listed more than once")]
    DuplicatePartition(String),

    #[error("Failed to load watermark for {work_unit_id}: {source}")]
    Watermark {
        work_unit_id: String,
        source: StateStoreError,
    },
}

/// Failure reading records from a source partition
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed record at offset {offset} in {path}: {reason}")]
    Malformed {
        path: PathBuf,
        offset: u64,
        reason: String,
    },
}

/// Failure converting a record
#[derive(Error, Debug)]
#[error("{reason}")]
pub struct ConversionError {
    pub reason: String,
}

impl ConversionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure writing or committing a branch's output
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("Record at offset {offset} cannot be written as {format}: {reason}")]
    Unsupported {
        format: String,
        offset: u64,
        reason: String,
    },
}

/// Reasons a task (one work unit) fails
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Converter '{converter}' failed at offset {offset}: {source}")]
    Conversion {
        converter: String,
        offset: u64,
        source: ConversionError,
    },

    #[error("{severity} policy '{policy}' failed on branch {branch}: {detail}")]
    PolicyViolation {
        policy: String,
        severity: Severity,
        branch: usize,
        detail: String,
    },

    #[error("Write failed on branch {branch}: {source}")]
    Write { branch: usize, source: WriteError },

    #[error("Branch {branch} stopped before the record stream completed")]
    BranchAborted { branch: usize },

    #[error("Task cancelled")]
    Cancelled,
}

/// Errors raised while collecting or publishing task output
#[derive(Error, Debug)]
pub enum CommitError {
    #[error("Failed to collect task output under {path}: {source}")]
    Collect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Task {task_id} reported output {path} that does not exist")]
    MissingOutput { task_id: String, path: PathBuf },

    #[error("Unexpected file {0} in task output directory")]
    UnexpectedOutput(PathBuf),

    #[error("Refusing to overwrite existing published file {0}")]
    DestinationExists(PathBuf),

    #[error("Failed to publish {from} to {to}: {source}")]
    Publish {
        from: PathBuf,
        to: PathBuf,
        source: sluice_common::SluiceError,
    },
}

/// A directory that could not be removed during cleanup
#[derive(Error, Debug)]
#[error("Failed to clean up {path}: {source}")]
pub struct CleanupError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

/// State store failures
#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt state document {path}: {source}")]
    Serialization {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Job history store failures
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job history store is not open")]
    NotOpen,
}

/// Error returned by a job launch
///
/// Failures after dispatch carry the cleanup errors collected while the
/// job-scoped staging and output directories were being removed.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Job planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("Job {job_id}: {failed} of {total} tasks failed; first failure in {task_id}: {cause}")]
    TasksFailed {
        job_id: String,
        total: usize,
        failed: usize,
        task_id: String,
        cause: String,
        cleanup_errors: Vec<CleanupError>,
    },

    #[error("Job {job_id} was cancelled")]
    Cancelled {
        job_id: String,
        cleanup_errors: Vec<CleanupError>,
    },

    #[error("Job {job_id} commit failed: {source}")]
    Commit {
        job_id: String,
        source: CommitError,
        cleanup_errors: Vec<CleanupError>,
    },

    #[error("Failed to persist watermarks: {0}")]
    State(#[from] StateStoreError),

    #[error("Job history store error: {0}")]
    History(#[from] HistoryError),
}

impl LaunchError {
    /// Cleanup failures recorded alongside this error
    pub fn cleanup_errors(&self) -> &[CleanupError] {
        match self {
            LaunchError::TasksFailed { cleanup_errors, .. }
            | LaunchError::Cancelled { cleanup_errors, .. }
            | LaunchError::Commit { cleanup_errors, .. } => cleanup_errors,
            _ => &[],
        }
    }

    /// Whether the job was stopped by a cancellation request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LaunchError::Cancelled { .. })
    }
}
