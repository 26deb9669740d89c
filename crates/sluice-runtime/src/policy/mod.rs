//! Quality policies
//!
//! Row-level policies run against every record a branch receives; task-level
//! policies run once against the branch aggregates after the record stream
//! ends. Each configured policy carries a [`Severity`]: MANDATORY failures fail
//! the branch, OPTIONAL failures are only recorded.

pub mod builtin;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use crate::job::Record;

/// How a policy failure is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Optional,
    Mandatory,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Optional => write!(f, "OPTIONAL"),
            Severity::Mandatory => write!(f, "MANDATORY"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPTIONAL" => Ok(Severity::Optional),
            "MANDATORY" => Ok(Severity::Mandatory),
            other => Err(format!("unknown policy severity '{}'", other)),
        }
    }
}

/// Outcome of a single evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyResult {
    Passed,
    Failed(String),
}

impl PolicyResult {
    pub fn from_check(passed: bool, detail: impl FnOnce() -> String) -> Self {
        if passed {
            PolicyResult::Passed
        } else {
            PolicyResult::Failed(detail())
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, PolicyResult::Passed)
    }
}

/// Where a policy runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyScope {
    Row,
    Task,
}

/// Aggregated results of one configured policy on one branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOutcome {
    pub policy: String,
    pub severity: Severity,
    pub scope: PolicyScope,
    pub evaluated: u64,
    pub failed: u64,
    /// Detail of the most recent failure
    pub last_failure: Option<String>,
}

impl PolicyOutcome {
    pub fn new(policy: &str, severity: Severity, scope: PolicyScope) -> Self {
        Self {
            policy: policy.to_string(),
            severity,
            scope,
            evaluated: 0,
            failed: 0,
            last_failure: None,
        }
    }

    pub fn record(&mut self, result: &PolicyResult) {
        self.evaluated += 1;
        if let PolicyResult::Failed(detail) = result {
            self.failed += 1;
            self.last_failure = Some(detail.clone());
        }
    }

    pub fn passed(&self) -> bool {
        self.failed == 0
    }
}

/// Per-branch context handed to row-level policies
#[derive(Debug, Clone, Default)]
pub struct RowContext {
    pub branch: usize,
    /// Schema of the first record the branch received
    pub expected_schema: Option<Vec<String>>,
}

/// Branch aggregates handed to task-level policies
#[derive(Debug, Clone, Default)]
pub struct TaskStats {
    pub branch: usize,
    pub records_extracted: u64,
    pub records_received: u64,
    pub records_written: u64,
    pub records_flagged: u64,
    /// Distinct schemas among written records
    pub schemas: BTreeSet<Vec<String>>,
}

/// Check applied to each record of a branch
pub trait RowLevelPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, record: &Record, ctx: &RowContext) -> PolicyResult;
}

/// Check applied to the aggregates of a branch
pub trait TaskLevelPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, stats: &TaskStats) -> PolicyResult;
}

/// A resolved policy with its configured id and severity
pub struct ConfiguredPolicy<P: ?Sized> {
    /// Identifier as written in the job properties
    pub id: String,
    pub severity: Severity,
    pub policy: Arc<P>,
}

impl<P: ?Sized> Clone for ConfiguredPolicy<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            severity: self.severity,
            policy: Arc::clone(&self.policy),
        }
    }
}

impl<P: ?Sized> std::fmt::Debug for ConfiguredPolicy<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredPolicy")
            .field("id", &self.id)
            .field("severity", &self.severity)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parse() {
        assert_eq!("optional".parse::<Severity>().unwrap(), Severity::Optional);
        assert_eq!(" MANDATORY ".parse::<Severity>().unwrap(), Severity::Mandatory);
        assert!("REQUIRED".parse::<Severity>().is_err());
        assert_eq!(Severity::Mandatory.to_string(), "MANDATORY");
    }

    #[test]
    fn test_outcome_counts_failures() {
        let mut outcome = PolicyOutcome::new("not-empty", Severity::Optional, PolicyScope::Row);
        outcome.record(&PolicyResult::Passed);
        outcome.record(&PolicyResult::Failed("empty payload".into()));
        outcome.record(&PolicyResult::Passed);

        assert_eq!(outcome.evaluated, 3);
        assert_eq!(outcome.failed, 1);
        assert!(!outcome.passed());
        assert_eq!(outcome.last_failure.as_deref(), Some("empty payload"));
    }
}
