//! Resolved job configuration
//!
//! [`JobSettings::resolve`] validates job properties and looks up every named
//! component in the [`Registry`]. Anything wrong with the configuration
//! surfaces here as a [`PlanningError`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::properties::{branch_key, keys, JobProperties};
use crate::converter::Converter;
use crate::error::PlanningError;
use crate::policy::{ConfiguredPolicy, RowLevelPolicy, Severity, TaskLevelPolicy};
use crate::registry::Registry;
use crate::source::Source;
use crate::writer::{DestinationType, WriterFactory};

pub const DEFAULT_SOURCE_TYPE: &str = "jsonl";
pub const DEFAULT_MAX_CONCURRENT_SLOTS: usize = 4;
pub const DEFAULT_FORK_BRANCHES: usize = 1;
pub const DEFAULT_WRITER_OUTPUT_FORMAT: &str = "jsonl";

/// Everything one fork branch needs at run and commit time
#[derive(Clone)]
pub struct BranchSettings {
    pub index: usize,
    /// Subdirectory name used to scope this branch's files
    pub name: String,
    pub row_policies: Vec<ConfiguredPolicy<dyn RowLevelPolicy>>,
    pub task_policies: Vec<ConfiguredPolicy<dyn TaskLevelPolicy>>,
    pub output_format: String,
    pub writer: Arc<dyn WriterFactory>,
    pub destination: DestinationType,
    pub staging_dir: PathBuf,
    pub output_dir: PathBuf,
    pub final_dir: PathBuf,
    /// Publish into `final_dir/<name>` rather than `final_dir`
    pub publish_into_subdir: bool,
}

impl BranchSettings {
    /// `<staging_dir>/<job_id>`
    pub fn job_staging_dir(&self, job_id: &str) -> PathBuf {
        self.staging_dir.join(job_id)
    }

    /// `<output_dir>/<job_id>`
    pub fn job_output_dir(&self, job_id: &str) -> PathBuf {
        self.output_dir.join(job_id)
    }

    /// `<staging_dir>/<job_id>/<branch>`
    pub fn branch_staging_dir(&self, job_id: &str) -> PathBuf {
        self.job_staging_dir(job_id).join(&self.name)
    }

    /// `<output_dir>/<job_id>/<branch>`
    pub fn branch_output_dir(&self, job_id: &str) -> PathBuf {
        self.job_output_dir(job_id).join(&self.name)
    }

    pub fn publish_dir(&self) -> PathBuf {
        if self.publish_into_subdir {
            self.final_dir.join(&self.name)
        } else {
            self.final_dir.clone()
        }
    }

    /// File name a task writes for this branch
    pub fn file_name(&self, task_id: &str) -> String {
        format!("{}.{}", task_id, self.writer.extension())
    }
}

impl std::fmt::Debug for BranchSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchSettings")
            .field("index", &self.index)
            .field("row_policies", &self.row_policies)
            .field("task_policies", &self.task_policies)
            .field("output_format", &self.output_format)
            .field("destination", &self.destination)
            .field("staging_dir", &self.staging_dir)
            .field("output_dir", &self.output_dir)
            .field("final_dir", &self.final_dir)
            .finish()
    }
}

/// Validated, component-resolved job configuration
#[derive(Clone)]
pub struct JobSettings {
    pub job_name: String,
    pub source_type: String,
    pub source: Arc<dyn Source>,
    pub source_files: Vec<PathBuf>,
    pub max_concurrent_slots: usize,
    pub pull_limit: Option<u64>,
    pub use_multi_work_unit: bool,
    pub converter_ids: Vec<String>,
    pub converters: Vec<Arc<dyn Converter>>,
    pub branches: Vec<BranchSettings>,
}

impl std::fmt::Debug for JobSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSettings")
            .field("job_name", &self.job_name)
            .field("source_type", &self.source_type)
            .field("source_files", &self.source_files)
            .field("max_concurrent_slots", &self.max_concurrent_slots)
            .field("pull_limit", &self.pull_limit)
            .field("use_multi_work_unit", &self.use_multi_work_unit)
            .field("converters", &self.converter_ids)
            .field("branches", &self.branches)
            .finish()
    }
}

impl JobSettings {
    pub fn resolve(props: &JobProperties, registry: &Registry) -> Result<Self, PlanningError> {
        let job_name = props.require(keys::JOB_NAME)?.to_string();
        if job_name.contains(['/', '\\']) {
            return Err(invalid(keys::JOB_NAME, &job_name, "must not contain path separators"));
        }

        let source_type = props
            .get(keys::SOURCE_TYPE)
            .unwrap_or(DEFAULT_SOURCE_TYPE)
            .to_string();
        let source = registry.source(&source_type)?;

        let source_files: Vec<PathBuf> = props
            .get_list(keys::SOURCE_FILE_LIST)
            .into_iter()
            .map(PathBuf::from)
            .collect();
        if source_files.is_empty() {
            return Err(PlanningError::MissingProperty(
                keys::SOURCE_FILE_LIST.to_string(),
            ));
        }

        let max_concurrent_slots = props
            .get_parsed::<usize>(keys::MAX_CONCURRENT_SLOTS)?
            .unwrap_or(DEFAULT_MAX_CONCURRENT_SLOTS);
        if max_concurrent_slots == 0 {
            return Err(invalid(keys::MAX_CONCURRENT_SLOTS, "0", "must be at least 1"));
        }

        let pull_limit = props.get_parsed::<u64>(keys::EXTRACT_PULL_LIMIT)?;
        let use_multi_work_unit = props.get_bool(keys::USE_MULTI_WORK_UNIT, false)?;

        let fork_branches = props
            .get_parsed::<usize>(keys::FORK_BRANCHES)?
            .unwrap_or(DEFAULT_FORK_BRANCHES);
        if fork_branches == 0 {
            return Err(invalid(keys::FORK_BRANCHES, "0", "must be at least 1"));
        }

        let converter_ids = props.get_list(keys::CONVERTER_CLASSES);
        let converters = converter_ids
            .iter()
            .map(|id| registry.converter(id))
            .collect::<Result<Vec<_>, _>>()?;

        let branches = (0..fork_branches)
            .map(|index| resolve_branch(props, registry, index, fork_branches > 1))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            job_name,
            source_type,
            source,
            source_files,
            max_concurrent_slots,
            pull_limit,
            use_multi_work_unit,
            converter_ids,
            converters,
            branches,
        })
    }

    pub fn fork_branches(&self) -> usize {
        self.branches.len()
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> PlanningError {
    PlanningError::InvalidProperty {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parallel id and severity lists for one branch
fn policy_list(
    props: &JobProperties,
    list_key: &str,
    type_key: &str,
    branch: usize,
) -> Result<Vec<(String, Severity)>, PlanningError> {
    let ids = props.get_list_for_branch(list_key, branch);
    let severities = props.get_list_for_branch(type_key, branch);

    if ids.len() != severities.len() {
        return Err(PlanningError::PolicySeverityMismatch {
            branch,
            list_key: list_key.to_string(),
            policies: ids.len(),
            severities: severities.len(),
        });
    }

    ids.into_iter()
        .zip(severities)
        .map(|(id, raw)| {
            let severity = raw
                .parse::<Severity>()
                .map_err(|reason| invalid(&branch_key(type_key, branch), &raw, &reason))?;
            Ok((id, severity))
        })
        .collect()
}

fn resolve_branch(
    props: &JobProperties,
    registry: &Registry,
    index: usize,
    forked: bool,
) -> Result<BranchSettings, PlanningError> {
    let row_policies = policy_list(
        props,
        keys::ROW_LEVEL_POLICY_LIST,
        keys::ROW_LEVEL_POLICY_LIST_TYPE,
        index,
    )?
    .into_iter()
    .map(|(id, severity)| {
        Ok(ConfiguredPolicy {
            policy: registry.row_policy(&id)?,
            id,
            severity,
        })
    })
    .collect::<Result<Vec<_>, PlanningError>>()?;

    let task_policies = policy_list(
        props,
        keys::TASK_LEVEL_POLICY_LIST,
        keys::TASK_LEVEL_POLICY_LIST_TYPE,
        index,
    )?
    .into_iter()
    .map(|(id, severity)| {
        Ok(ConfiguredPolicy {
            policy: registry.task_policy(&id)?,
            id,
            severity,
        })
    })
    .collect::<Result<Vec<_>, PlanningError>>()?;

    let output_format = props
        .get_for_branch(keys::WRITER_OUTPUT_FORMAT, index)
        .unwrap_or(DEFAULT_WRITER_OUTPUT_FORMAT)
        .to_string();
    let writer = registry.writer(&output_format)?;

    let destination = match props.get_for_branch(keys::WRITER_DESTINATION_TYPE, index) {
        None => DestinationType::default(),
        Some(raw) => raw.parse::<DestinationType>().map_err(|reason| {
            invalid(&branch_key(keys::WRITER_DESTINATION_TYPE, index), raw, &reason)
        })?,
    };

    let dir = |key: &str| -> Result<PathBuf, PlanningError> {
        props
            .require_for_branch(key, index)
            .map(|raw| Path::new(raw).to_path_buf())
    };

    Ok(BranchSettings {
        index,
        name: format!("branch-{}", index),
        row_policies,
        task_policies,
        output_format,
        writer,
        destination,
        staging_dir: dir(keys::WRITER_STAGING_DIR)?,
        output_dir: dir(keys::WRITER_OUTPUT_DIR)?,
        final_dir: dir(keys::DATA_PUBLISHER_FINAL_DIR)?,
        publish_into_subdir: forked,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ComponentKind;

    fn base() -> JobProperties {
        JobProperties::new()
            .with(keys::JOB_NAME, "wiki")
            .with(keys::SOURCE_FILE_LIST, "/data/a.jsonl,/data/b.jsonl")
            .with(keys::WRITER_STAGING_DIR, "/tmp/staging")
            .with(keys::WRITER_OUTPUT_DIR, "/tmp/output")
            .with(keys::DATA_PUBLISHER_FINAL_DIR, "/tmp/final")
    }

    #[test]
    fn test_defaults() {
        let settings = JobSettings::resolve(&base(), &Registry::with_builtins()).unwrap();
        assert_eq!(settings.source_type, "jsonl");
        assert_eq!(settings.max_concurrent_slots, DEFAULT_MAX_CONCURRENT_SLOTS);
        assert_eq!(settings.pull_limit, None);
        assert!(!settings.use_multi_work_unit);
        assert_eq!(settings.fork_branches(), 1);

        let branch = &settings.branches[0];
        assert_eq!(branch.output_format, "jsonl");
        assert_eq!(branch.destination, DestinationType::Local);
        assert_eq!(branch.publish_dir(), PathBuf::from("/tmp/final"));
        assert_eq!(
            branch.branch_staging_dir("job_1"),
            PathBuf::from("/tmp/staging/job_1/branch-0")
        );
        assert_eq!(branch.file_name("task_job_1_0"), "task_job_1_0.jsonl");
    }

    #[test]
    fn test_two_branches_with_suffixed_keys() {
        let props = base()
            .with(keys::FORK_BRANCHES, 2)
            .with("writer-output-format.1", "csv")
            .with("writer-destination-type.1", "hdfs")
            .with("data-publisher-final-dir.1", "/tmp/final-csv")
            .with("row-level-policy-list.0", "schema-row-check")
            .with("row-level-policy-list-type.0", "OPTIONAL")
            .with("task-level-policy-list", "row-count,schema-compatibility")
            .with("task-level-policy-list-type", "OPTIONAL,MANDATORY");

        let settings = JobSettings::resolve(&props, &Registry::with_builtins()).unwrap();
        let (b0, b1) = (&settings.branches[0], &settings.branches[1]);

        assert_eq!(b0.row_policies.len(), 1);
        assert!(b1.row_policies.is_empty());
        assert_eq!(b1.task_policies.len(), 2);
        assert_eq!(b1.task_policies[1].severity, Severity::Mandatory);
        assert_eq!(b1.output_format, "csv");
        assert_eq!(b1.destination, DestinationType::Hdfs);
        assert_eq!(b0.publish_dir(), PathBuf::from("/tmp/final/branch-0"));
        assert_eq!(b1.publish_dir(), PathBuf::from("/tmp/final-csv/branch-1"));
    }

    #[test]
    fn test_severity_list_mismatch() {
        let props = base()
            .with("row-level-policy-list", "not-empty,schema-row-check")
            .with("row-level-policy-list-type", "OPTIONAL");
        assert!(matches!(
            JobSettings::resolve(&props, &Registry::with_builtins()),
            Err(PlanningError::PolicySeverityMismatch {
                policies: 2,
                severities: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_severity_and_component() {
        let props = base()
            .with("row-level-policy-list", "not-empty")
            .with("row-level-policy-list-type", "SOMETIMES");
        assert!(matches!(
            JobSettings::resolve(&props, &Registry::with_builtins()),
            Err(PlanningError::InvalidProperty { .. })
        ));

        let props = base().with(keys::CONVERTER_CLASSES, "identity,gobble");
        assert!(matches!(
            JobSettings::resolve(&props, &Registry::with_builtins()),
            Err(PlanningError::UnknownComponent {
                kind: ComponentKind::Converter,
                ..
            })
        ));

        let props = base().with(keys::WRITER_OUTPUT_FORMAT, "avro");
        assert!(matches!(
            JobSettings::resolve(&props, &Registry::with_builtins()),
            Err(PlanningError::UnknownComponent {
                kind: ComponentKind::Writer,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_and_invalid_values() {
        let mut props = base();
        props.set(keys::DATA_PUBLISHER_FINAL_DIR, "");
        assert!(matches!(
            JobSettings::resolve(&props, &Registry::with_builtins()),
            Err(PlanningError::MissingProperty(_))
        ));

        let props = base().with(keys::MAX_CONCURRENT_SLOTS, 0);
        assert!(JobSettings::resolve(&props, &Registry::with_builtins()).is_err());

        let props = base().with(keys::EXTRACT_PULL_LIMIT, "-1");
        assert!(JobSettings::resolve(&props, &Registry::with_builtins()).is_err());
    }
}
