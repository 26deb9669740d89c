//! JSON-lines writer: one payload per line

use serde_jsonlines::JsonLinesWriter;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use super::{io_error, DataWriter, WriterFactory};
use crate::error::WriteError;
use crate::job::Record;

pub struct JsonLinesWriterFactory;

impl WriterFactory for JsonLinesWriterFactory {
    fn format(&self) -> &str {
        "jsonl"
    }

    fn extension(&self) -> &str {
        "jsonl"
    }

    fn create(&self, path: &Path) -> Result<Box<dyn DataWriter>, WriteError> {
        let file = File::create(path).map_err(io_error(path))?;
        Ok(Box::new(JsonLinesDataWriter {
            inner: JsonLinesWriter::new(BufWriter::new(file)),
            path: path.to_path_buf(),
            written: 0,
        }))
    }
}

struct JsonLinesDataWriter {
    inner: JsonLinesWriter<BufWriter<File>>,
    path: PathBuf,
    written: u64,
}

impl DataWriter for JsonLinesDataWriter {
    fn write(&mut self, record: &Record) -> Result<(), WriteError> {
        self.inner
            .write(&record.payload)
            .map_err(io_error(&self.path))?;
        self.written += 1;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<u64, WriteError> {
        self.inner.flush().map_err(io_error(&self.path))?;
        Ok(self.written)
    }
}
