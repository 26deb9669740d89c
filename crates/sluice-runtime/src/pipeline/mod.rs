//! Fork-branch task pipeline
//!
//! A task runs one work unit: extract from the low watermark (up to the pull
//! limit), convert, then fork every converted record to all branches. Each
//! branch runs concurrently behind its own bounded channel. The producer
//! checks the cancellation token between records.

pub mod branch;

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::converter::apply_chain;
use crate::error::TaskError;
use crate::job::{
    JobSettings, MultiWorkUnit, Record, SlotReport, TaskState, TaskStatus, WorkUnit,
};
use branch::{BranchMessage, BranchRunner};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Runs work units for one job
pub struct TaskRunner {
    job_id: String,
    settings: Arc<JobSettings>,
    channel_capacity: usize,
}

impl TaskRunner {
    pub fn new(job_id: impl Into<String>, settings: Arc<JobSettings>) -> Self {
        Self {
            job_id: job_id.into(),
            settings,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Run every unit of a group in order
    ///
    /// Units not yet started when the token fires are reported as CANCELLED.
    pub async fn run_group(&self, group: &MultiWorkUnit, cancel: &CancellationToken) -> SlotReport {
        let mut tasks = Vec::with_capacity(group.len());
        for unit in group.units() {
            if cancel.is_cancelled() {
                tasks.push(TaskState::not_run(
                    &self.job_id,
                    unit,
                    TaskStatus::Cancelled,
                    "cancelled before start",
                ));
                continue;
            }
            tasks.push(self.run_task(unit, cancel).await);
        }
        SlotReport::from_tasks(group.index(), tasks)
    }

    /// Run one work unit through extract, convert, fork and write
    pub async fn run_task(&self, unit: &WorkUnit, cancel: &CancellationToken) -> TaskState {
        let task_id = unit.task_id(&self.job_id);
        let span = tracing::info_span!("task", task_id = %task_id, work_unit = %unit.id);

        async {
            let started_at = Utc::now();
            debug!(low_watermark = unit.low_watermark, "Starting task");

            let mut senders = Vec::with_capacity(self.settings.branches.len());
            let mut branches = Vec::with_capacity(self.settings.branches.len());
            for settings in &self.settings.branches {
                let (tx, rx) = mpsc::channel(self.channel_capacity);
                senders.push(Some(tx));
                let runner = BranchRunner::new(&self.job_id, &task_id, settings.clone());
                branches.push(runner.run(rx));
            }

            let (produced, branch_states) =
                tokio::join!(self.produce(unit, senders, cancel), join_all(branches));

            let mut error = None;
            let status = match &produced {
                Err(TaskError::Cancelled) => TaskStatus::Cancelled,
                Err(e) => {
                    error = Some(e.to_string());
                    TaskStatus::Failed
                }
                Ok(_) => match branch_states.iter().find_map(|b| b.error.clone()) {
                    Some(branch_error) => {
                        error = Some(branch_error);
                        TaskStatus::Failed
                    }
                    None => TaskStatus::Succeeded,
                },
            };
            if status == TaskStatus::Cancelled {
                error = Some(TaskError::Cancelled.to_string());
            }

            let records_extracted = produced.as_ref().copied().unwrap_or_default();
            let high_watermark =
                (status == TaskStatus::Succeeded).then(|| unit.low_watermark + records_extracted);

            match status {
                TaskStatus::Succeeded => info!(
                    records_extracted,
                    high_watermark = ?high_watermark,
                    "Task succeeded"
                ),
                _ => warn!(status = status.as_str(), error = ?error, "Task did not succeed"),
            }

            TaskState {
                task_id: task_id.clone(),
                work_unit_id: unit.id.clone(),
                partition: unit.partition.clone(),
                status,
                records_extracted,
                low_watermark: unit.low_watermark,
                high_watermark,
                branches: branch_states,
                error,
                started_at,
                completed_at: Utc::now(),
            }
        }
        .instrument(span)
        .await
    }

    /// Extract and convert, feeding every live branch
    ///
    /// Returns the number of records extracted. Senders are dropped on
    /// return; branches that never saw `End` treat the stream as aborted.
    async fn produce(
        &self,
        unit: &WorkUnit,
        mut senders: Vec<Option<mpsc::Sender<BranchMessage>>>,
        cancel: &CancellationToken,
    ) -> Result<u64, TaskError> {
        let mut extractor = self.settings.source.open(unit)?;
        let mut extracted = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            if self.settings.pull_limit.is_some_and(|limit| extracted >= limit) {
                debug!(extracted, "Pull limit reached");
                break;
            }

            let Some(record) = extractor.next_record()? else {
                break;
            };
            extracted += 1;

            let offset = record.offset;
            let converted = apply_chain(&self.settings.converters, record).map_err(
                |(converter, source)| TaskError::Conversion {
                    converter,
                    offset,
                    source,
                },
            )?;

            for record in converted {
                self.fork(&mut senders, record, cancel).await?;
            }

            if senders.iter().all(Option::is_none) {
                // Every branch has failed; the task outcome is already decided
                return Ok(extracted);
            }
        }

        for sender in senders.iter().flatten() {
            let _ = sender
                .send(BranchMessage::End {
                    records_extracted: extracted,
                })
                .await;
        }
        Ok(extracted)
    }

    async fn fork(
        &self,
        senders: &mut [Option<mpsc::Sender<BranchMessage>>],
        record: Record,
        cancel: &CancellationToken,
    ) -> Result<(), TaskError> {
        let record = Arc::new(record);
        for slot in senders.iter_mut() {
            let Some(sender) = slot else {
                continue;
            };
            let sent = tokio::select! {
                sent = sender.send(BranchMessage::Record(Arc::clone(&record))) => sent,
                _ = cancel.cancelled() => return Err(TaskError::Cancelled),
            };
            if sent.is_err() {
                // Branch stopped consuming
                *slot = None;
            }
        }
        Ok(())
    }
}
