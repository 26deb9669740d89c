//! Staging commit and cleanup
//!
//! The coordinator moves through
//! `Running → {AllTasksSucceeded, AnyTaskFailed} → {Published, CleanedUp}`.
//! Publishing collects committed task output, moves it into each branch's
//! final dir and then clears the job-scoped staging and output dirs. Any
//! task failure, or any error while collecting or publishing, ends in
//! cleanup: every branch's job-scoped staging and output dir is removed.

pub mod collector;
pub mod publisher;

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{CleanupError, CommitError};
use crate::job::{BranchSettings, PublishedFile, TaskState};
pub use collector::{OutputCollector, PublishEntry, PublishPlan, TaskOutputCollector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    Running,
    AllTasksSucceeded,
    AnyTaskFailed,
    Published,
    CleanedUp,
}

impl CommitPhase {
    pub fn as_str(&self) -> &str {
        match self {
            CommitPhase::Running => "RUNNING",
            CommitPhase::AllTasksSucceeded => "ALL_TASKS_SUCCEEDED",
            CommitPhase::AnyTaskFailed => "ANY_TASK_FAILED",
            CommitPhase::Published => "PUBLISHED",
            CommitPhase::CleanedUp => "CLEANED_UP",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommitPhase::Published | CommitPhase::CleanedUp)
    }
}

/// Files published by a successful commit
#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    pub published: Vec<PublishedFile>,
    /// Failures clearing staging and output after publish; the job still succeeded
    pub cleanup_errors: Vec<String>,
}

pub struct CommitCoordinator {
    job_id: String,
    branches: Vec<BranchSettings>,
    collector: Arc<dyn OutputCollector>,
    phase: CommitPhase,
}

impl CommitCoordinator {
    pub fn new(
        job_id: impl Into<String>,
        branches: Vec<BranchSettings>,
        collector: Arc<dyn OutputCollector>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            branches,
            collector,
            phase: CommitPhase::Running,
        }
    }

    pub fn phase(&self) -> CommitPhase {
        self.phase
    }

    /// Every job-scoped staging and output dir
    pub fn job_dirs(&self) -> Vec<PathBuf> {
        self.branches
            .iter()
            .flat_map(|b| [b.job_staging_dir(&self.job_id), b.job_output_dir(&self.job_id)])
            .collect()
    }

    /// Publish the output of a job whose tasks all succeeded
    ///
    /// On error the job dirs have been cleaned up; cleanup failures are
    /// returned next to the commit error.
    pub fn publish(
        &mut self,
        tasks: &[TaskState],
    ) -> Result<CommitReport, (CommitError, Vec<CleanupError>)> {
        self.phase = CommitPhase::AllTasksSucceeded;

        let plan = match self.collector.collect(&self.job_id, &self.branches, tasks) {
            Ok(plan) => plan,
            Err(e) => {
                error!(job_id = %self.job_id, error = %e, "Output collection failed");
                return Err((e, self.cleanup()));
            }
        };

        let published = match publisher::publish(&plan) {
            Ok(published) => published,
            Err(e) => {
                error!(job_id = %self.job_id, error = %e, "Publish failed");
                return Err((e, self.cleanup()));
            }
        };

        self.phase = CommitPhase::Published;
        info!(
            job_id = %self.job_id,
            files = published.len(),
            "Published job output"
        );

        let dirs = self.job_dirs();
        let cleanup_errors = publisher::remove_dirs(dirs.iter().map(PathBuf::as_path))
            .into_iter()
            .map(|e| e.to_string())
            .collect();

        Ok(CommitReport {
            published,
            cleanup_errors,
        })
    }

    /// Clean up after a failed or cancelled job
    pub fn abort(&mut self) -> Vec<CleanupError> {
        self.phase = CommitPhase::AnyTaskFailed;
        self.cleanup()
    }

    fn cleanup(&mut self) -> Vec<CleanupError> {
        let dirs = self.job_dirs();
        let errors = publisher::remove_dirs(dirs.iter().map(PathBuf::as_path));
        self.phase = CommitPhase::CleanedUp;

        if errors.is_empty() {
            info!(job_id = %self.job_id, "Cleaned up staging and output directories");
        } else {
            warn!(
                job_id = %self.job_id,
                failures = errors.len(),
                "Cleanup left directories behind"
            );
        }
        errors
    }
}
