//! Built-in policies
//!
//! | id | scope | passes when |
//! |---|---|---|
//! | `schema-row-check` | row | record schema matches the branch's first record |
//! | `not-empty` | row | payload is not null, `{}`, `[]` or `""` |
//! | `required-field:<name>` | row | object payload has a non-null `<name>` |
//! | `row-count` | task | records written equals records extracted |
//! | `schema-compatibility` | task | all written records share one schema |
//! | `min-row-count:<n>` | task | at least `n` records written |

use serde_json::Value;

use super::{PolicyResult, RowContext, RowLevelPolicy, TaskLevelPolicy, TaskStats};
use crate::job::Record;

pub struct SchemaRowCheck;

impl RowLevelPolicy for SchemaRowCheck {
    fn name(&self) -> &str {
        "schema-row-check"
    }

    fn check(&self, record: &Record, ctx: &RowContext) -> PolicyResult {
        if !record.payload.is_object() {
            return PolicyResult::Failed(format!("offset {} is not an object", record.offset));
        }
        match &ctx.expected_schema {
            None => PolicyResult::Passed,
            Some(expected) => {
                let actual = record.schema();
                PolicyResult::from_check(&actual == expected, || {
                    format!(
                        "offset {} has fields {:?}, expected {:?}",
                        record.offset, actual, expected
                    )
                })
            }
        }
    }
}

pub struct NotEmpty;

impl RowLevelPolicy for NotEmpty {
    fn name(&self) -> &str {
        "not-empty"
    }

    fn check(&self, record: &Record, _ctx: &RowContext) -> PolicyResult {
        let empty = match &record.payload {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::String(s) => s.is_empty(),
            _ => false,
        };
        PolicyResult::from_check(!empty, || format!("offset {} is empty", record.offset))
    }
}

pub struct RequiredField {
    field: String,
}

impl RequiredField {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl RowLevelPolicy for RequiredField {
    fn name(&self) -> &str {
        "required-field"
    }

    fn check(&self, record: &Record, _ctx: &RowContext) -> PolicyResult {
        let present = record
            .payload
            .get(&self.field)
            .is_some_and(|v| !v.is_null());
        PolicyResult::from_check(present, || {
            format!("offset {} is missing field '{}'", record.offset, self.field)
        })
    }
}

pub struct RowCount;

impl TaskLevelPolicy for RowCount {
    fn name(&self) -> &str {
        "row-count"
    }

    fn check(&self, stats: &TaskStats) -> PolicyResult {
        PolicyResult::from_check(stats.records_written == stats.records_extracted, || {
            format!(
                "wrote {} records but extracted {}",
                stats.records_written, stats.records_extracted
            )
        })
    }
}

pub struct SchemaCompatibility;

impl TaskLevelPolicy for SchemaCompatibility {
    fn name(&self) -> &str {
        "schema-compatibility"
    }

    fn check(&self, stats: &TaskStats) -> PolicyResult {
        PolicyResult::from_check(stats.schemas.len() <= 1, || {
            format!("{} distinct schemas written", stats.schemas.len())
        })
    }
}

pub struct MinRowCount {
    min: u64,
}

impl MinRowCount {
    pub fn new(min: u64) -> Self {
        Self { min }
    }
}

impl TaskLevelPolicy for MinRowCount {
    fn name(&self) -> &str {
        "min-row-count"
    }

    fn check(&self, stats: &TaskStats) -> PolicyResult {
        PolicyResult::from_check(stats.records_written >= self.min, || {
            format!(
                "wrote {} records, minimum is {}",
                stats.records_written, self.min
            )
        })
    }
}
