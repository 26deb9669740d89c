//! JSON-lines source: one JSON value per line, offsets are line numbers

use serde::de::IgnoredAny;
use serde_jsonlines::JsonLinesReader;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use super::{skip_records, Extractor, Source};
use crate::error::ExtractionError;
use crate::job::{Record, WorkUnit};

pub struct JsonLinesSource;

impl Source for JsonLinesSource {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn count_records(&self, path: &Path) -> Result<u64, String> {
        let file = File::open(path).map_err(|e| e.to_string())?;
        let mut reader = JsonLinesReader::new(BufReader::new(file));
        let mut count = 0u64;
        while reader
            .read::<IgnoredAny>()
            .map_err(|e| format!("line {}: {}", count + 1, e))?
            .is_some()
        {
            count += 1;
        }
        Ok(count)
    }

    fn open(&self, unit: &WorkUnit) -> Result<Box<dyn Extractor>, ExtractionError> {
        let file = File::open(&unit.path).map_err(|source| ExtractionError::Io {
            path: unit.path.clone(),
            source,
        })?;
        let mut extractor = JsonLinesExtractor {
            reader: JsonLinesReader::new(BufReader::new(file)),
            path: unit.path.clone(),
            partition: unit.partition.clone(),
            offset: 0,
        };
        skip_records(&mut extractor, unit.low_watermark)?;
        Ok(Box::new(extractor))
    }
}

struct JsonLinesExtractor {
    reader: JsonLinesReader<BufReader<File>>,
    path: PathBuf,
    partition: String,
    offset: u64,
}

impl Extractor for JsonLinesExtractor {
    fn next_record(&mut self) -> Result<Option<Record>, ExtractionError> {
        let value = self
            .reader
            .read::<serde_json::Value>()
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidData | ErrorKind::UnexpectedEof => ExtractionError::Malformed {
                    path: self.path.clone(),
                    offset: self.offset,
                    reason: e.to_string(),
                },
                _ => ExtractionError::Io {
                    path: self.path.clone(),
                    source: e,
                },
            })?;

        Ok(value.map(|payload| {
            let record = Record::new(self.partition.clone(), self.offset, payload);
            self.offset += 1;
            record
        }))
    }
}
