//! Sources
//!
//! A source enumerates the partitions of a job's input at planning time and
//! opens an [`Extractor`] positioned at a work unit's low watermark at run
//! time. Partitions are addressed by file path; the record count observed
//! during enumeration becomes the work unit extent.

pub mod csv;
pub mod jsonl;

use std::path::{Path, PathBuf};

use crate::error::{ExtractionError, PlanningError};
use crate::job::{Record, WorkUnit};

pub use self::csv::CsvSource;
pub use self::jsonl::JsonLinesSource;

/// One enumerable slice of a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePartition {
    pub key: String,
    pub path: PathBuf,
    /// Records available at enumeration time
    pub extent: u64,
}

/// Pull-based record reader for one work unit
pub trait Extractor: Send {
    /// Next record, or `None` when the partition is exhausted
    fn next_record(&mut self) -> Result<Option<Record>, ExtractionError>;
}

pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// Count the records of one partition
    fn count_records(&self, path: &Path) -> Result<u64, String>;

    /// Open an extractor that starts at `unit.low_watermark`
    fn open(&self, unit: &WorkUnit) -> Result<Box<dyn Extractor>, ExtractionError>;

    /// Enumerate partitions in list order
    fn enumerate(&self, files: &[PathBuf]) -> Result<Vec<SourcePartition>, PlanningError> {
        files
            .iter()
            .map(|path| {
                let key = path.display().to_string();
                if !path.is_file() {
                    return Err(PlanningError::SourceUnavailable {
                        partition: key,
                        reason: "no such file".to_string(),
                    });
                }
                let extent = self
                    .count_records(path)
                    .map_err(|reason| PlanningError::SourceUnavailable {
                        partition: key.clone(),
                        reason,
                    })?;
                Ok(SourcePartition {
                    key,
                    path: path.clone(),
                    extent,
                })
            })
            .collect()
    }
}

/// Skip `count` records of an extractor
pub(crate) fn skip_records(
    extractor: &mut dyn Extractor,
    count: u64,
) -> Result<(), ExtractionError> {
    for _ in 0..count {
        if extractor.next_record()?.is_none() {
            break;
        }
    }
    Ok(())
}
