//! Job model: properties, resolved settings and runtime state types

pub mod properties;
pub mod settings;
pub mod types;

pub use properties::{keys, JobProperties};
pub use settings::{BranchSettings, JobSettings};
pub use types::{
    generate_job_id, BranchState, JobOutcome, JobStatus, MultiWorkUnit, PublishedFile, Record,
    SlotReport, SlotStatus, TaskState, TaskStatus, WatermarkState, WorkUnit,
};
