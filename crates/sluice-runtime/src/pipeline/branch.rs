//! One fork branch of a task
//!
//! A branch consumes the record stream from a bounded channel, applies its
//! row-level policies, writes surviving records into its staging dir and,
//! once the stream ends, runs its task-level policies. If every MANDATORY
//! policy passed, the staged file is committed into the branch output dir.
//! On failure the branch returns early, dropping its receiver so the producer
//! stops feeding it.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{TaskError, WriteError};
use crate::job::{BranchSettings, BranchState, Record};
use crate::policy::{PolicyOutcome, PolicyResult, PolicyScope, RowContext, Severity, TaskStats};
use crate::writer::DataWriter;

/// Message from the extract/convert loop to a branch
#[derive(Debug, Clone)]
pub enum BranchMessage {
    Record(Arc<Record>),
    /// The stream completed normally
    End { records_extracted: u64 },
}

pub struct BranchRunner {
    job_id: String,
    task_id: String,
    settings: BranchSettings,
}

struct BranchRun {
    state: BranchState,
    row_outcomes: Vec<PolicyOutcome>,
    stats: TaskStats,
    ctx: RowContext,
    writer: Option<Box<dyn DataWriter>>,
    staging_file: PathBuf,
}

impl BranchRunner {
    pub fn new(job_id: &str, task_id: &str, settings: BranchSettings) -> Self {
        Self {
            job_id: job_id.to_string(),
            task_id: task_id.to_string(),
            settings,
        }
    }

    /// Consume the stream and return the branch outcome
    pub async fn run(self, mut rx: mpsc::Receiver<BranchMessage>) -> BranchState {
        let branch = self.settings.index;
        let file_name = self.settings.file_name(&self.task_id);

        let mut run = BranchRun {
            state: BranchState::new(branch),
            row_outcomes: self
                .settings
                .row_policies
                .iter()
                .map(|p| PolicyOutcome::new(&p.id, p.severity, PolicyScope::Row))
                .collect(),
            stats: TaskStats {
                branch,
                ..Default::default()
            },
            ctx: RowContext {
                branch,
                expected_schema: None,
            },
            writer: None,
            staging_file: self
                .settings
                .branch_staging_dir(&self.job_id)
                .join(&file_name),
        };

        let result = loop {
            match rx.recv().await {
                Some(BranchMessage::Record(record)) => {
                    if let Err(e) = self.accept(&mut run, &record) {
                        break Err(e);
                    }
                }
                Some(BranchMessage::End { records_extracted }) => {
                    run.stats.records_extracted = records_extracted;
                    break self.finish(&mut run, &file_name);
                }
                None => break Err(TaskError::BranchAborted { branch }),
            }
        };

        drop(rx);
        let mut state = run.state;
        let mut outcomes = run.row_outcomes;
        outcomes.append(&mut state.policy_outcomes);
        state.policy_outcomes = outcomes;

        if let Err(e) = result {
            warn!(
                task_id = %self.task_id,
                branch,
                error = %e,
                "Branch failed"
            );
            state.error = Some(e.to_string());
        }
        state
    }

    fn accept(&self, run: &mut BranchRun, record: &Record) -> Result<(), TaskError> {
        let branch = self.settings.index;
        run.state.records_received += 1;
        run.stats.records_received += 1;

        let mut flagged = false;
        for (policy, outcome) in self
            .settings
            .row_policies
            .iter()
            .zip(run.row_outcomes.iter_mut())
        {
            let result = policy.policy.check(record, &run.ctx);
            outcome.record(&result);
            if let PolicyResult::Failed(detail) = result {
                match policy.severity {
                    Severity::Mandatory => {
                        return Err(TaskError::PolicyViolation {
                            policy: policy.id.clone(),
                            severity: policy.severity,
                            branch,
                            detail,
                        });
                    }
                    Severity::Optional => flagged = true,
                }
            }
        }

        let schema = record.schema();
        if run.ctx.expected_schema.is_none() {
            run.ctx.expected_schema = Some(schema.clone());
        }

        if run.writer.is_none() {
            run.writer = Some(self.open_writer(&run.staging_file)?);
        }
        if let Some(writer) = run.writer.as_mut() {
            writer
                .write(record)
                .map_err(|source| TaskError::Write { branch, source })?;
        }

        run.state.records_written += 1;
        run.stats.records_written += 1;
        run.stats.schemas.insert(schema);
        if flagged {
            run.state.records_flagged += 1;
            run.stats.records_flagged += 1;
        }
        Ok(())
    }

    fn open_writer(&self, path: &std::path::Path) -> Result<Box<dyn DataWriter>, TaskError> {
        let branch = self.settings.index;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| TaskError::Write {
                branch,
                source: WriteError::Io {
                    path: parent.to_path_buf(),
                    source,
                },
            })?;
        }
        self.settings
            .writer
            .create(path)
            .map_err(|source| TaskError::Write { branch, source })
    }

    fn finish(&self, run: &mut BranchRun, file_name: &str) -> Result<(), TaskError> {
        let branch = self.settings.index;

        for policy in &self.settings.task_policies {
            let mut outcome = PolicyOutcome::new(&policy.id, policy.severity, PolicyScope::Task);
            let result = policy.policy.check(&run.stats);
            outcome.record(&result);
            run.state.policy_outcomes.push(outcome);

            if let PolicyResult::Failed(detail) = result {
                match policy.severity {
                    Severity::Mandatory => {
                        return Err(TaskError::PolicyViolation {
                            policy: policy.id.clone(),
                            severity: policy.severity,
                            branch,
                            detail,
                        });
                    }
                    Severity::Optional => {
                        debug!(
                            task_id = %self.task_id,
                            branch,
                            policy = %policy.id,
                            detail = %detail,
                            "Optional task-level policy failed"
                        );
                    }
                }
            }
        }

        let Some(writer) = run.writer.take() else {
            // Nothing was written, so there is nothing to commit
            return Ok(());
        };
        writer
            .close()
            .map_err(|source| TaskError::Write { branch, source })?;

        let committed = self
            .settings
            .branch_output_dir(&self.job_id)
            .join(file_name);
        commit_file(&run.staging_file, &committed)
            .map_err(|source| TaskError::Write { branch, source })?;

        debug!(
            task_id = %self.task_id,
            branch,
            records = run.state.records_written,
            path = %committed.display(),
            "Committed branch output"
        );
        run.state.output_files.push(committed);
        Ok(())
    }
}

/// Move a staged file into the task output dir
fn commit_file(from: &std::path::Path, to: &std::path::Path) -> Result<(), WriteError> {
    let io = |path: &std::path::Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| WriteError::Io { path, source }
    };
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(io(parent))?;
    }
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to).map_err(io(to))?;
        std::fs::remove_file(from).map_err(io(from))?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::job::{keys, JobProperties, JobSettings};
    use crate::registry::Registry;
    use serde_json::json;
    use std::path::Path;

    fn branch_settings(root: &Path, extra: &[(&str, &str)]) -> BranchSettings {
        let mut props = JobProperties::new()
            .with(keys::JOB_NAME, "branch")
            .with(keys::SOURCE_FILE_LIST, "unused.jsonl")
            .with(keys::WRITER_STAGING_DIR, root.join("staging").display())
            .with(keys::WRITER_OUTPUT_DIR, root.join("output").display())
            .with(keys::DATA_PUBLISHER_FINAL_DIR, root.join("final").display());
        for (k, v) in extra {
            props.set(*k, v);
        }
        JobSettings::resolve(&props, &Registry::with_builtins())
            .unwrap()
            .branches
            .remove(0)
    }

    async fn run_branch(settings: BranchSettings, payloads: Vec<serde_json::Value>) -> BranchState {
        let (tx, rx) = mpsc::channel(4);
        let runner = BranchRunner::new("job_b_1", "task_job_b_1_0", settings);
        let handle = tokio::spawn(runner.run(rx));

        let count = payloads.len() as u64;
        for (offset, payload) in payloads.into_iter().enumerate() {
            let record = Arc::new(Record::new("p", offset as u64, payload));
            if tx.send(BranchMessage::Record(record)).await.is_err() {
                break;
            }
        }
        let _ = tx
            .send(BranchMessage::End {
                records_extracted: count,
            })
            .await;
        drop(tx);
        handle.await.unwrap()
    }

    #[tokio::test]
    async fn test_branch_commits_to_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = branch_settings(dir.path(), &[]);

        let state = run_branch(settings, vec![json!({"a": 1}), json!({"a": 2})]).await;
        assert!(state.succeeded());
        assert_eq!(state.records_written, 2);
        assert_eq!(state.output_files.len(), 1);

        let committed = &state.output_files[0];
        assert!(committed.starts_with(dir.path().join("output/job_b_1/branch-0")));
        assert_eq!(std::fs::read_to_string(committed).unwrap().lines().count(), 2);
        assert!(!dir
            .path()
            .join("staging/job_b_1/branch-0/task_job_b_1_0.jsonl")
            .exists());
    }

    #[tokio::test]
    async fn test_optional_row_failure_flags_record() {
        let dir = tempfile::tempdir().unwrap();
        let settings = branch_settings(
            dir.path(),
            &[
                ("row-level-policy-list", "schema-row-check"),
                ("row-level-policy-list-type", "OPTIONAL"),
            ],
        );

        let state = run_branch(
            settings,
            vec![json!({"a": 1}), json!({"b": 2}), json!({"a": 3})],
        )
        .await;
        assert!(state.succeeded());
        assert_eq!(state.records_written, 3);
        assert_eq!(state.records_flagged, 1);
        assert_eq!(state.policy_outcomes[0].failed, 1);
    }

    #[tokio::test]
    async fn test_mandatory_row_failure_stops_branch() {
        let dir = tempfile::tempdir().unwrap();
        let settings = branch_settings(
            dir.path(),
            &[
                ("row-level-policy-list", "required-field:id"),
                ("row-level-policy-list-type", "MANDATORY"),
            ],
        );

        let state = run_branch(
            settings,
            vec![json!({"id": 1}), json!({"name": "x"}), json!({"id": 3})],
        )
        .await;
        assert!(!state.succeeded());
        assert_eq!(state.records_written, 1);
        assert!(state.output_files.is_empty());
        assert!(state.error.unwrap().contains("required-field:id"));
        assert!(!dir.path().join("output").exists());
    }

    #[tokio::test]
    async fn test_mandatory_task_policy_blocks_commit() {
        let dir = tempfile::tempdir().unwrap();
        let settings = branch_settings(
            dir.path(),
            &[
                ("task-level-policy-list", "min-row-count:5"),
                ("task-level-policy-list-type", "MANDATORY"),
            ],
        );

        let state = run_branch(settings, vec![json!({"a": 1})]).await;
        assert!(!state.succeeded());
        assert_eq!(state.policy_outcomes.len(), 1);
        assert!(state.output_files.is_empty());
    }

    #[tokio::test]
    async fn test_stream_closed_without_end_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let settings = branch_settings(dir.path(), &[]);
        let (tx, rx) = mpsc::channel(4);
        tx.send(BranchMessage::Record(Arc::new(Record::new("p", 0, json!({"a": 1})))))
            .await
            .unwrap();
        drop(tx);

        let state = BranchRunner::new("job_b_1", "t", settings).run(rx).await;
        assert!(!state.succeeded());
        assert!(state.output_files.is_empty());
    }
}
