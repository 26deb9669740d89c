//! Output collection
//!
//! Turns the committed task output of a successful job into a publish plan:
//! one entry per file, mapping the file in a branch output dir to its place
//! in the branch final dir.

use std::collections::BTreeSet;
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::error::CommitError;
use crate::job::{BranchSettings, TaskState};

/// A single file to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishEntry {
    pub branch: usize,
    pub task_id: String,
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct PublishPlan {
    pub entries: Vec<PublishEntry>,
}

impl PublishPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Strategy for building the publish plan
pub trait OutputCollector: Send + Sync {
    fn collect(
        &self,
        job_id: &str,
        branches: &[BranchSettings],
        tasks: &[TaskState],
    ) -> Result<PublishPlan, CommitError>;
}

/// Collects the files each task reported, checked against the output dirs
///
/// Every reported file must exist and every file found under a branch's
/// job-scoped output dir must have been reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskOutputCollector;

impl OutputCollector for TaskOutputCollector {
    fn collect(
        &self,
        job_id: &str,
        branches: &[BranchSettings],
        tasks: &[TaskState],
    ) -> Result<PublishPlan, CommitError> {
        let mut plan = PublishPlan::default();
        let mut reported = BTreeSet::new();

        for task in tasks.iter().filter(|t| t.succeeded()) {
            for branch_state in &task.branches {
                let Some(branch) = branches.get(branch_state.branch) else {
                    continue;
                };
                for file in &branch_state.output_files {
                    if !file.is_file() {
                        return Err(CommitError::MissingOutput {
                            task_id: task.task_id.clone(),
                            path: file.clone(),
                        });
                    }
                    let Some(name) = file.file_name() else {
                        continue;
                    };
                    reported.insert(file.clone());
                    plan.entries.push(PublishEntry {
                        branch: branch.index,
                        task_id: task.task_id.clone(),
                        source: file.clone(),
                        destination: branch.publish_dir().join(name),
                    });
                }
            }
        }

        for branch in branches {
            let dir = branch.branch_output_dir(job_id);
            if !dir.exists() {
                continue;
            }
            for entry in WalkDir::new(&dir) {
                let entry = entry.map_err(|e| CommitError::Collect {
                    path: dir.clone(),
                    source: e.into(),
                })?;
                if entry.file_type().is_file() && !reported.contains(entry.path()) {
                    return Err(CommitError::UnexpectedOutput(entry.path().to_path_buf()));
                }
            }
        }

        Ok(plan)
    }
}
