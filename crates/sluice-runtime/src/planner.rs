//! Work unit planning
//!
//! One work unit per source partition, resumed from its persisted watermark.
//! Partitions already consumed up to their extent are skipped.

use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::PlanningError;
use crate::job::{JobSettings, WorkUnit};
use crate::state_store::StateStore;

pub struct WorkUnitPlanner<'a> {
    state_store: &'a dyn StateStore,
}

impl<'a> WorkUnitPlanner<'a> {
    pub fn new(state_store: &'a dyn StateStore) -> Self {
        Self { state_store }
    }

    /// Plan the unconsumed work of a job, in source list order
    pub async fn plan(&self, settings: &JobSettings) -> Result<Vec<WorkUnit>, PlanningError> {
        let partitions = settings.source.enumerate(&settings.source_files)?;

        let mut seen = HashSet::new();
        let mut units = Vec::with_capacity(partitions.len());
        let mut skipped = 0usize;

        for partition in partitions {
            if !seen.insert(partition.key.clone()) {
                return Err(PlanningError::DuplicatePartition(partition.key));
            }

            let id = WorkUnit::id_for(&settings.job_name, &partition.key);
            let low_watermark = self
                .state_store
                .load_watermark(&id)
                .await
                .map_err(|source| PlanningError::Watermark {
                    work_unit_id: id.clone(),
                    source,
                })?
                .map(|state| state.high_watermark)
                .unwrap_or(0);

            if low_watermark >= partition.extent {
                debug!(
                    work_unit_id = %id,
                    watermark = low_watermark,
                    extent = partition.extent,
                    "Partition fully consumed, skipping"
                );
                skipped += 1;
                continue;
            }

            units.push(WorkUnit {
                id,
                partition: partition.key,
                path: partition.path,
                low_watermark,
                extent: partition.extent,
                index: units.len(),
            });
        }

        info!(
            job_name = %settings.job_name,
            work_units = units.len(),
            skipped,
            "Planned work units"
        );

        Ok(units)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::job::{keys, JobProperties, WatermarkState};
    use crate::registry::Registry;
    use crate::state_store::MemoryStateStore;
    use chrono::Utc;
    use std::path::Path;

    fn write_jsonl(dir: &Path, name: &str, records: usize) -> String {
        let path = dir.join(name);
        let body: String = (0..records).map(|i| format!("{{\"n\":{}}}\n", i)).collect();
        std::fs::write(&path, body).unwrap();
        path.display().to_string()
    }

    fn settings(files: &[String]) -> JobSettings {
        let props = JobProperties::new()
            .with(keys::JOB_NAME, "plan")
            .with(keys::SOURCE_FILE_LIST, files.join(","))
            .with(keys::WRITER_STAGING_DIR, "/tmp/s")
            .with(keys::WRITER_OUTPUT_DIR, "/tmp/o")
            .with(keys::DATA_PUBLISHER_FINAL_DIR, "/tmp/f");
        JobSettings::resolve(&props, &Registry::with_builtins()).unwrap()
    }

    #[tokio::test]
    async fn test_plan_resumes_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_jsonl(dir.path(), "a.jsonl", 5);
        let b = write_jsonl(dir.path(), "b.jsonl", 4);
        let c = write_jsonl(dir.path(), "c.jsonl", 3);

        let store = MemoryStateStore::new();
        for (partition, high) in [(&a, 2u64), (&b, 4u64)] {
            let state = WatermarkState {
                partition: partition.clone(),
                high_watermark: high,
                job_id: "job_plan_old".into(),
                updated_at: Utc::now(),
            };
            store
                .persist_watermark(&WorkUnit::id_for("plan", partition), &state)
                .await
                .unwrap();
        }

        let units = WorkUnitPlanner::new(&store)
            .plan(&settings(&[a.clone(), b, c.clone()]))
            .await
            .unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].partition, a);
        assert_eq!(units[0].low_watermark, 2);
        assert_eq!(units[0].remaining(), 3);
        assert_eq!(units[1].partition, c);
        assert_eq!(units[1].index, 1);
        assert_eq!(units[1].id, WorkUnit::id_for("plan", &c));
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_jsonl(dir.path(), "a.jsonl", 1);
        let missing = dir.path().join("gone.jsonl").display().to_string();

        let result = WorkUnitPlanner::new(&MemoryStateStore::new())
            .plan(&settings(&[a, missing]))
            .await;
        assert!(matches!(result, Err(PlanningError::SourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_partition_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_jsonl(dir.path(), "a.jsonl", 1);

        let result = WorkUnitPlanner::new(&MemoryStateStore::new())
            .plan(&settings(&[a.clone(), a]))
            .await;
        assert!(matches!(result, Err(PlanningError::DuplicatePartition(_))));
    }
}
