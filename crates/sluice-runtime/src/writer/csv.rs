//! CSV writer
//!
//! The header is taken from the first record's fields. Later records may omit
//! fields (written as empty cells) but may not add new ones.

use csv::Writer;
use serde_json::Value;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::{io_error, DataWriter, WriterFactory};
use crate::error::WriteError;
use crate::job::Record;

pub struct CsvWriterFactory;

impl WriterFactory for CsvWriterFactory {
    fn format(&self) -> &str {
        "csv"
    }

    fn extension(&self) -> &str {
        "csv"
    }

    fn create(&self, path: &Path) -> Result<Box<dyn DataWriter>, WriteError> {
        let inner = Writer::from_path(path).map_err(csv_error(path))?;
        Ok(Box::new(CsvDataWriter {
            inner,
            path: path.to_path_buf(),
            header: None,
            written: 0,
        }))
    }
}

struct CsvDataWriter {
    inner: Writer<File>,
    path: PathBuf,
    header: Option<Vec<String>>,
    written: u64,
}

fn csv_error(path: &Path) -> impl FnOnce(csv::Error) -> WriteError + '_ {
    move |source| WriteError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl DataWriter for CsvDataWriter {
    fn write(&mut self, record: &Record) -> Result<(), WriteError> {
        let Value::Object(fields) = &record.payload else {
            return Err(WriteError::Unsupported {
                format: "csv".to_string(),
                offset: record.offset,
                reason: "payload is not an object".to_string(),
            });
        };

        if self.header.is_none() {
            let header: Vec<String> = fields.keys().cloned().collect();
            self.inner
                .write_record(&header)
                .map_err(csv_error(&self.path))?;
            self.header = Some(header);
        }
        let header = self.header.as_deref().unwrap_or_default();

        if let Some(extra) = fields.keys().find(|k| !header.contains(*k)) {
            return Err(WriteError::Unsupported {
                format: "csv".to_string(),
                offset: record.offset,
                reason: format!("field '{}' is not in the header", extra),
            });
        }

        let row: Vec<String> = header
            .iter()
            .map(|name| fields.get(name).map(cell).unwrap_or_default())
            .collect();
        self.inner.write_record(&row).map_err(csv_error(&self.path))?;
        self.written += 1;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<u64, WriteError> {
        self.inner.flush().map_err(io_error(&self.path))?;
        Ok(self.written)
    }
}
