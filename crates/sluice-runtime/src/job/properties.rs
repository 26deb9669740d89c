//! Job properties file loading
//!
//! Job configuration is a flat `key=value` document. Lines starting with `#`
//! or `!` are comments, and `key: value` is accepted as well. Per-branch keys
//! carry a `.N` suffix and fall back to the unsuffixed key.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::PlanningError;

/// Property keys understood by the launcher
pub mod keys {
    pub const JOB_NAME: &str = "job-name";
    pub const SOURCE_TYPE: &str = "source-type";
    pub const SOURCE_FILE_LIST: &str = "source-file-list";
    pub const MAX_CONCURRENT_SLOTS: &str = "max-concurrent-slots";
    pub const EXTRACT_PULL_LIMIT: &str = "extract-pull-limit";
    pub const USE_MULTI_WORK_UNIT: &str = "use-multi-work-unit";
    pub const FORK_BRANCHES: &str = "fork-branches";
    pub const CONVERTER_CLASSES: &str = "converter-classes";
    pub const ROW_LEVEL_POLICY_LIST: &str = "row-level-policy-list";
    pub const ROW_LEVEL_POLICY_LIST_TYPE: &str = "row-level-policy-list-type";
    pub const TASK_LEVEL_POLICY_LIST: &str = "task-level-policy-list";
    pub const TASK_LEVEL_POLICY_LIST_TYPE: &str = "task-level-policy-list-type";
    pub const WRITER_OUTPUT_FORMAT: &str = "writer-output-format";
    pub const WRITER_DESTINATION_TYPE: &str = "writer-destination-type";
    pub const WRITER_STAGING_DIR: &str = "writer-staging-dir";
    pub const WRITER_OUTPUT_DIR: &str = "writer-output-dir";
    pub const DATA_PUBLISHER_FINAL_DIR: &str = "data-publisher-final-dir";
}

/// Ordered key/value job configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobProperties {
    entries: BTreeMap<String, String>,
}

impl JobProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a properties file from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PlanningError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PlanningError::Properties {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Parse properties text. Later duplicates win.
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let split_at = line.find(['=', ':']);
            let (key, value) = match split_at {
                Some(pos) => (&line[..pos], &line[pos + 1..]),
                None => (line, ""),
            };

            let key = key.trim();
            if !key.is_empty() {
                entries.insert(key.to_string(), value.trim().to_string());
            }
        }

        Self { entries }
    }

    /// Set a property, returning `self` for chaining
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.entries.insert(key.into(), value.to_string());
        self
    }

    /// Builder-style variant of [`JobProperties::set`]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// Non-empty value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str, PlanningError> {
        self.get(key)
            .ok_or_else(|| PlanningError::MissingProperty(key.to_string()))
    }

    /// Parse a value, `None` when absent
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, PlanningError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| parse_value(key, raw))
            .transpose()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, PlanningError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(PlanningError::InvalidProperty {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: "expected true or false".to_string(),
                }),
            },
        }
    }

    /// Comma-separated list, empty when absent
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key).map(split_list).unwrap_or_default()
    }

    /// Branch-scoped lookup: `key.N` first, then `key`
    pub fn get_for_branch(&self, key: &str, branch: usize) -> Option<&str> {
        self.get(&branch_key(key, branch)).or_else(|| self.get(key))
    }

    pub fn require_for_branch(&self, key: &str, branch: usize) -> Result<&str, PlanningError> {
        self.get_for_branch(key, branch)
            .ok_or_else(|| PlanningError::MissingProperty(branch_key(key, branch)))
    }

    pub fn get_list_for_branch(&self, key: &str, branch: usize) -> Vec<String> {
        self.get_for_branch(key, branch)
            .map(split_list)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromStr for JobProperties {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

pub fn branch_key(key: &str, branch: usize) -> String {
    format!("{}.{}", key, branch)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, PlanningError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| PlanningError::InvalidProperty {
            key: key.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}
