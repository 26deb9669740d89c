//! CSV source: header row names the fields, every data row becomes an object
//! of string values

use csv::{Reader, StringRecord};
use serde_json::{Map, Value};
use std::fs::File;
use std::path::{Path, PathBuf};

use super::{skip_records, Extractor, Source};
use crate::error::ExtractionError;
use crate::job::{Record, WorkUnit};

pub struct CsvSource;

impl Source for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn count_records(&self, path: &Path) -> Result<u64, String> {
        let mut reader = Reader::from_path(path).map_err(|e| e.to_string())?;
        let mut count = 0u64;
        for row in reader.records() {
            row.map_err(|e| e.to_string())?;
            count += 1;
        }
        Ok(count)
    }

    fn open(&self, unit: &WorkUnit) -> Result<Box<dyn Extractor>, ExtractionError> {
        let mut reader = Reader::from_path(&unit.path).map_err(|e| malformed(&unit.path, 0, e))?;
        let headers = reader
            .headers()
            .map_err(|e| malformed(&unit.path, 0, e))?
            .clone();

        let mut extractor = CsvExtractor {
            reader,
            headers,
            row: StringRecord::new(),
            path: unit.path.clone(),
            partition: unit.partition.clone(),
            offset: 0,
        };
        skip_records(&mut extractor, unit.low_watermark)?;
        Ok(Box::new(extractor))
    }
}

fn malformed(path: &Path, offset: u64, err: csv::Error) -> ExtractionError {
    let reason = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => ExtractionError::Io {
            path: path.to_path_buf(),
            source,
        },
        _ => ExtractionError::Malformed {
            path: path.to_path_buf(),
            offset,
            reason,
        },
    }
}

struct CsvExtractor {
    reader: Reader<File>,
    headers: StringRecord,
    row: StringRecord,
    path: PathBuf,
    partition: String,
    offset: u64,
}

impl Extractor for CsvExtractor {
    fn next_record(&mut self) -> Result<Option<Record>, ExtractionError> {
        let has_row = self
            .reader
            .read_record(&mut self.row)
            .map_err(|e| malformed(&self.path, self.offset, e))?;
        if !has_row {
            return Ok(None);
        }

        let payload: Map<String, Value> = self
            .headers
            .iter()
            .zip(self.row.iter())
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect();

        let record = Record::new(self.partition.clone(), self.offset, Value::Object(payload));
        self.offset += 1;
        Ok(Some(record))
    }
}
