//! Branch writers
//!
//! A [`WriterFactory`] is registered per output format and creates one
//! [`DataWriter`] per task and branch, writing into the branch staging dir.

pub mod csv;
pub mod jsonl;

use std::path::Path;
use std::str::FromStr;

use crate::error::WriteError;
use crate::job::Record;

pub use self::csv::CsvWriterFactory;
pub use self::jsonl::JsonLinesWriterFactory;

/// Where a branch's files ultimately land
///
/// Both variants are addressed as mounted filesystem paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestinationType {
    #[default]
    Local,
    Hdfs,
}

impl DestinationType {
    pub fn as_str(&self) -> &str {
        match self {
            DestinationType::Local => "local",
            DestinationType::Hdfs => "hdfs",
        }
    }
}

impl FromStr for DestinationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "file" => Ok(DestinationType::Local),
            "hdfs" => Ok(DestinationType::Hdfs),
            other => Err(format!("unknown destination type '{}'", other)),
        }
    }
}

/// Open writer for one staged file
pub trait DataWriter: Send {
    fn write(&mut self, record: &Record) -> Result<(), WriteError>;

    /// Flush and close the file, returning the number of records written
    fn close(self: Box<Self>) -> Result<u64, WriteError>;
}

pub trait WriterFactory: Send + Sync {
    fn format(&self) -> &str;

    /// File extension without the dot
    fn extension(&self) -> &str;

    fn create(&self, path: &Path) -> Result<Box<dyn DataWriter>, WriteError>;
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}
