//! Record converters
//!
//! A converter maps one record to zero or more records. Converters run in
//! the order given by `converter-classes`, before records are forked.

use serde_json::{Map, Value};

use crate::error::ConversionError;
use crate::job::Record;

pub trait Converter: Send + Sync {
    fn name(&self) -> &str;

    fn convert(&self, record: Record) -> Result<Vec<Record>, ConversionError>;
}

/// Run a record through a converter chain
///
/// On failure returns the name of the converter that rejected the record.
pub fn apply_chain(
    chain: &[std::sync::Arc<dyn Converter>],
    record: Record,
) -> Result<Vec<Record>, (String, ConversionError)> {
    let mut records = vec![record];
    for converter in chain {
        let mut next = Vec::with_capacity(records.len());
        for record in records {
            let converted = converter
                .convert(record)
                .map_err(|e| (converter.name().to_string(), e))?;
            next.extend(converted);
        }
        records = next;
    }
    Ok(records)
}

/// Passes records through unchanged
pub struct Identity;

impl Converter for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn convert(&self, record: Record) -> Result<Vec<Record>, ConversionError> {
        Ok(vec![record])
    }
}

/// Flattens nested objects into dotted keys (`{"a":{"b":1}}` → `{"a.b":1}`)
pub struct Flatten;

impl Flatten {
    fn flatten_into(prefix: &str, value: Value, out: &mut Map<String, Value>) {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (key, inner) in map {
                    Self::flatten_into(&format!("{}.{}", prefix, key), inner, out);
                }
            }
            other => {
                out.insert(prefix.to_string(), other);
            }
        }
    }
}

impl Converter for Flatten {
    fn name(&self) -> &str {
        "flatten"
    }

    fn convert(&self, record: Record) -> Result<Vec<Record>, ConversionError> {
        match &record.payload {
            Value::Object(map) => {
                let mut flat = Map::new();
                for (key, inner) in map {
                    Self::flatten_into(key, inner.clone(), &mut flat);
                }
                Ok(vec![record.with_payload(Value::Object(flat))])
            }
            _ => Err(ConversionError::new("flatten requires an object payload")),
        }
    }
}

/// Removes null-valued fields from object payloads
pub struct DropNulls;

impl Converter for DropNulls {
    fn name(&self) -> &str {
        "drop-nulls"
    }

    fn convert(&self, mut record: Record) -> Result<Vec<Record>, ConversionError> {
        if let Value::Object(map) = &mut record.payload {
            map.retain(|_, v| !v.is_null());
        }
        Ok(vec![record])
    }
}

/// Emits one record per element of an array payload
///
/// Non-array payloads pass through; an empty array yields no records.
pub struct Explode;

impl Converter for Explode {
    fn name(&self) -> &str {
        "explode"
    }

    fn convert(&self, record: Record) -> Result<Vec<Record>, ConversionError> {
        let Record {
            source,
            offset,
            payload,
        } = record;
        match payload {
            Value::Array(items) => Ok(items
                .into_iter()
                .map(|item| Record::new(source.clone(), offset, item))
                .collect()),
            other => Ok(vec![Record::new(source, offset, other)]),
        }
    }
}
