//! Core types shared by the planner, pipeline and commit stages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::policy::PolicyOutcome;

/// Generate a job id of the form `job_{name}_{uuid}`
pub fn generate_job_id(job_name: &str) -> String {
    format!("job_{}_{}", job_name, Uuid::new_v4().simple())
}

/// A single record flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Partition key of the work unit the record came from
    pub source: String,
    /// Record offset within the partition
    pub offset: u64,
    /// Opaque payload
    pub payload: serde_json::Value,
}

impl Record {
    pub fn new(source: impl Into<String>, offset: u64, payload: serde_json::Value) -> Self {
        Self {
            source: source.into(),
            offset,
            payload,
        }
    }

    /// Field names of an object payload; empty for any other payload
    pub fn schema(&self) -> Vec<String> {
        match &self.payload {
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Copy of this record with a different payload
    pub fn with_payload(&self, payload: serde_json::Value) -> Self {
        Self {
            source: self.source.clone(),
            offset: self.offset,
            payload,
        }
    }
}

/// Persisted position of a work unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkState {
    pub partition: String,
    /// Offset of the next unconsumed record
    pub high_watermark: u64,
    pub job_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Atomic, independently extractable slice of a job's source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Deterministic id, stable across runs of the same job
    pub id: String,
    /// Partition key (the source file path)
    pub partition: String,
    pub path: PathBuf,
    /// First offset to extract
    pub low_watermark: u64,
    /// Number of records in the partition at planning time
    pub extent: u64,
    /// Position in plan order
    pub index: usize,
}

impl WorkUnit {
    pub fn id_for(job_name: &str, partition: &str) -> String {
        format!("{}::{}", job_name, partition)
    }

    /// Records left between the watermark and the extent
    pub fn remaining(&self) -> u64 {
        self.extent.saturating_sub(self.low_watermark)
    }

    pub fn task_id(&self, job_id: &str) -> String {
        format!("task_{}_{}", job_id, self.index)
    }
}

/// Non-empty group of work units run sequentially in one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiWorkUnit {
    index: usize,
    units: Vec<WorkUnit>,
}

impl MultiWorkUnit {
    /// Returns `None` for an empty group
    pub fn new(index: usize, units: Vec<WorkUnit>) -> Option<Self> {
        if units.is_empty() {
            None
        } else {
            Some(Self { index, units })
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn units(&self) -> &[WorkUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn estimated_records(&self) -> u64 {
        self.units.iter().map(WorkUnit::remaining).sum()
    }
}

/// Terminal status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Outcome of one fork branch inside a task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchState {
    pub branch: usize,
    pub records_received: u64,
    pub records_written: u64,
    /// Records written despite an OPTIONAL policy failure
    pub records_flagged: u64,
    pub policy_outcomes: Vec<PolicyOutcome>,
    /// Committed files in the branch output dir
    pub output_files: Vec<PathBuf>,
    pub error: Option<String>,
}

impl BranchState {
    pub fn new(branch: usize) -> Self {
        Self {
            branch,
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Runtime outcome of one work unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub work_unit_id: String,
    pub partition: String,
    pub status: TaskStatus,
    pub records_extracted: u64,
    pub low_watermark: u64,
    /// Set only for succeeded tasks
    pub high_watermark: Option<u64>,
    pub branches: Vec<BranchState>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl TaskState {
    /// State for a work unit that never ran
    pub fn not_run(job_id: &str, unit: &WorkUnit, status: TaskStatus, reason: &str) -> Self {
        let now = Utc::now();
        Self {
            task_id: unit.task_id(job_id),
            work_unit_id: unit.id.clone(),
            partition: unit.partition.clone(),
            status,
            records_extracted: 0,
            low_watermark: unit.low_watermark,
            high_watermark: None,
            branches: Vec::new(),
            error: Some(reason.to_string()),
            started_at: now,
            completed_at: now,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

/// Terminal status of an execution slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Completed,
    Failed,
    Cancelled,
}

/// What a slot reports back to the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotReport {
    pub slot: usize,
    pub status: SlotStatus,
    pub tasks: Vec<TaskState>,
}

impl SlotReport {
    pub fn from_tasks(slot: usize, tasks: Vec<TaskState>) -> Self {
        let status = if tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            SlotStatus::Failed
        } else if tasks.iter().any(|t| t.status == TaskStatus::Cancelled) {
            SlotStatus::Cancelled
        } else {
            SlotStatus::Completed
        };
        Self {
            slot,
            status,
            tasks,
        }
    }
}

/// Overall job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    /// Nothing left to extract
    NothingToDo,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Succeeded => "succeeded",
            JobStatus::NothingToDo => "nothing_to_do",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "succeeded" => JobStatus::Succeeded,
            "nothing_to_do" => JobStatus::NothingToDo,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        }
    }
}

/// A file moved into a branch's final dir
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedFile {
    pub branch: usize,
    pub task_id: String,
    pub metadata: sluice_common::types::FileMetadata,
}

/// Result of a successful launch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub job_name: String,
    pub status: JobStatus,
    pub tasks: Vec<TaskState>,
    pub published: Vec<PublishedFile>,
    pub peak_in_flight: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn records_extracted(&self) -> u64 {
        self.tasks.iter().map(|t| t.records_extracted).sum()
    }

    /// Records written per branch across all tasks
    pub fn records_written(&self, branch: usize) -> u64 {
        self.tasks
            .iter()
            .flat_map(|t| t.branches.iter())
            .filter(|b| b.branch == branch)
            .map(|b| b.records_written)
            .sum()
    }
}
