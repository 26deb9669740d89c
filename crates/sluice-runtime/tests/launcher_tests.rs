//! End-to-end tests for the job launcher
//!
//! These tests run real jobs against temporary directories:
//! - Concurrency limits and grouping produce the same published output
//! - Pull limits and watermark resumption
//! - Fork branches, including a MANDATORY policy failure on one branch
//! - Cleanup after injected commit faults and cancellation
//! - Planning failures and job history

mod helpers;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use helpers::{
    file_count, job_properties, published_records, records_per_file, with_branch_dirs,
    write_sources,
};
use sluice_runtime::commit::PublishPlan;
use sluice_runtime::dispatcher::{ExecutionSubstrate, LocalSubstrate, Slot};
use sluice_runtime::error::PlanningError;
use sluice_runtime::job::{keys, BranchSettings, SlotReport};
use sluice_runtime::{
    CommitError, FsStateStore, JobLauncher, JobStatus, LaunchError, MemoryHistoryStore,
    MemoryStateStore, OutputCollector, SqliteHistoryStore, StateStore, TaskState,
};

/// Fails at the entry of output collection
struct FaultyCollector;

impl OutputCollector for FaultyCollector {
    fn collect(
        &self,
        _job_id: &str,
        _branches: &[BranchSettings],
        _tasks: &[TaskState],
    ) -> Result<PublishPlan, CommitError> {
        Err(CommitError::Collect {
            path: PathBuf::from("/injected"),
            source: std::io::Error::other("injected collection fault"),
        })
    }
}

/// Runs slots locally and cancels the job once the first slot is done
struct CancelAfterFirstSlot;

#[async_trait]
impl ExecutionSubstrate for CancelAfterFirstSlot {
    async fn execute(&self, slot: Slot) -> Result<SlotReport, String> {
        let cancel = slot.cancel.clone();
        let report = LocalSubstrate.execute(slot).await;
        cancel.cancel();
        report
    }
}

// ============================================================================
// Concurrency and grouping
// ============================================================================

#[tokio::test]
async fn test_concurrency_limit_does_not_change_output() {
    let mut outputs = Vec::new();

    for limit in [2usize, 3, 5] {
        let dir = tempfile::tempdir().unwrap();
        let sources = write_sources(dir.path(), 7, 12);
        let props = job_properties(dir.path(), "concurrency", &sources)
            .with(keys::MAX_CONCURRENT_SLOTS, limit);

        let launcher = JobLauncher::builder().build();
        let outcome = launcher.launch(&props).await.unwrap();

        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert!(outcome.peak_in_flight <= limit);
        assert_eq!(outcome.records_extracted(), 84);
        assert_eq!(file_count(&dir.path().join("staging")), 0);
        assert_eq!(file_count(&dir.path().join("output")), 0);

        outputs.push(published_records(&dir.path().join("final")));
    }

    assert_eq!(outputs[0].len(), 84);
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[1], outputs[2]);
}

#[tokio::test]
async fn test_grouping_publishes_same_records() {
    let mut outputs = Vec::new();

    for grouped in [false, true] {
        let dir = tempfile::tempdir().unwrap();
        let sources = write_sources(dir.path(), 9, 5);
        let props = job_properties(dir.path(), "grouping", &sources)
            .with(keys::MAX_CONCURRENT_SLOTS, 2)
            .with(keys::USE_MULTI_WORK_UNIT, grouped);

        let outcome = JobLauncher::builder().build().launch(&props).await.unwrap();
        assert_eq!(outcome.tasks.len(), 9);
        outputs.push(published_records(&dir.path().join("final")));
    }

    assert_eq!(outputs[0].len(), 45);
    assert_eq!(outputs[0], outputs[1]);
}

// ============================================================================
// Pull limit and watermarks
// ============================================================================

#[tokio::test]
async fn test_pull_limit_caps_records_per_task() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path(), 3, 25);
    let props = job_properties(dir.path(), "limited", &sources).with(keys::EXTRACT_PULL_LIMIT, 10);

    let state_store = Arc::new(MemoryStateStore::new());
    let launcher = JobLauncher::builder().state_store(state_store.clone()).build();

    let outcome = launcher.launch(&props).await.unwrap();
    assert_eq!(outcome.records_extracted(), 30);
    let per_file = records_per_file(&dir.path().join("final"));
    assert_eq!(per_file.len(), 3);
    assert!(per_file.iter().all(|&n| n <= 10));

    // The next run resumes from the persisted watermarks
    let outcome = launcher.launch(&props).await.unwrap();
    assert_eq!(outcome.records_extracted(), 30);
    assert!(outcome.tasks.iter().all(|t| t.low_watermark == 10));
    assert_eq!(published_records(&dir.path().join("final")).len(), 60);

    let id = &outcome.tasks[0].work_unit_id;
    let watermark = state_store.load_watermark(id).await.unwrap().unwrap();
    assert_eq!(watermark.high_watermark, 20);
}

#[tokio::test]
async fn test_rerun_after_success_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path(), 4, 6);
    let props = job_properties(dir.path(), "idempotent", &sources);

    let launcher = JobLauncher::builder()
        .state_store(Arc::new(FsStateStore::new(dir.path().join("state"))))
        .build();

    let first = launcher.launch(&props).await.unwrap();
    assert_eq!(first.status, JobStatus::Succeeded);
    let published = published_records(&dir.path().join("final"));

    let second = launcher.launch(&props).await.unwrap();
    assert_eq!(second.status, JobStatus::NothingToDo);
    assert!(second.tasks.is_empty());
    assert_eq!(published_records(&dir.path().join("final")), published);
}

// ============================================================================
// Fork branches
// ============================================================================

#[tokio::test]
async fn test_two_branches_publish_independently() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path(), 3, 8);
    let props = job_properties(dir.path(), "forked", &sources)
        .with(keys::FORK_BRANCHES, 2)
        .with(format!("{}.1", keys::WRITER_OUTPUT_FORMAT), "csv");
    let props = with_branch_dirs(props, dir.path(), 0);
    let props = with_branch_dirs(props, dir.path(), 1);

    let outcome = JobLauncher::builder().build().launch(&props).await.unwrap();

    assert_eq!(outcome.records_written(0), 24);
    assert_eq!(outcome.records_written(1), 24);
    assert_eq!(published_records(&dir.path().join("b0/final")).len(), 24);
    assert_eq!(file_count(&dir.path().join("b1/final")), 3);
    for branch in 0..2 {
        let root = dir.path().join(format!("b{}", branch));
        assert_eq!(file_count(&root.join("staging")), 0);
        assert_eq!(file_count(&root.join("output")), 0);
    }
}

#[tokio::test]
async fn test_mandatory_failure_on_one_branch_fails_job() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path(), 3, 8);
    let props = job_properties(dir.path(), "strict", &sources)
        .with(keys::FORK_BRANCHES, 2)
        .with(format!("{}.1", keys::ROW_LEVEL_POLICY_LIST), "required-field:missing")
        .with(format!("{}.1", keys::ROW_LEVEL_POLICY_LIST_TYPE), "MANDATORY");
    let props = with_branch_dirs(props, dir.path(), 0);
    let props = with_branch_dirs(props, dir.path(), 1);

    let state_store = Arc::new(MemoryStateStore::new());
    let err = JobLauncher::builder()
        .state_store(state_store.clone())
        .build()
        .launch(&props)
        .await
        .unwrap_err();

    match &err {
        LaunchError::TasksFailed { failed, total, cause, .. } => {
            assert_eq!(*total, 3);
            assert_eq!(*failed, 3);
            assert!(cause.contains("required-field"));
        }
        other => panic!("expected TasksFailed, got {other}"),
    }
    assert!(err.cleanup_errors().is_empty());
    assert_eq!(file_count(dir.path().join("b0").as_path()), 0);
    assert_eq!(file_count(dir.path().join("b1").as_path()), 0);
    assert!(state_store.is_empty().await);
}

#[tokio::test]
async fn test_optional_failure_is_recorded_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path(), 2, 5);
    let props = job_properties(dir.path(), "lenient", &sources)
        .with(keys::ROW_LEVEL_POLICY_LIST, "required-field:missing,not-empty")
        .with(keys::ROW_LEVEL_POLICY_LIST_TYPE, "OPTIONAL,MANDATORY");

    let outcome = JobLauncher::builder().build().launch(&props).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.records_written(0), 10);
    let flagged: u64 = outcome
        .tasks
        .iter()
        .flat_map(|t| t.branches.iter())
        .map(|b| b.records_flagged)
        .sum();
    assert_eq!(flagged, 10);
}

// ============================================================================
// Cleanup
// ============================================================================

#[tokio::test]
async fn test_collection_fault_leaves_no_files() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path(), 4, 10);
    let props = job_properties(dir.path(), "faulty", &sources);

    let state_store = Arc::new(MemoryStateStore::new());
    let err = JobLauncher::builder()
        .state_store(state_store.clone())
        .collector(Arc::new(FaultyCollector))
        .build()
        .launch(&props)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LaunchError::Commit {
            source: CommitError::Collect { .. },
            ..
        }
    ));
    assert_eq!(file_count(&dir.path().join("staging")), 0);
    assert_eq!(file_count(&dir.path().join("output")), 0);
    assert_eq!(file_count(&dir.path().join("final")), 0);
    assert!(state_store.is_empty().await);
}

#[tokio::test]
async fn test_cancellation_cleans_up_without_watermarks() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path(), 6, 10);
    let props = job_properties(dir.path(), "cancelled", &sources).with(keys::MAX_CONCURRENT_SLOTS, 1);

    let state_store = Arc::new(MemoryStateStore::new());
    let err = JobLauncher::builder()
        .state_store(state_store.clone())
        .substrate(Arc::new(CancelAfterFirstSlot))
        .build()
        .launch(&props)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(file_count(&dir.path().join("staging")), 0);
    assert_eq!(file_count(&dir.path().join("output")), 0);
    assert_eq!(file_count(&dir.path().join("final")), 0);
    assert!(state_store.is_empty().await);
}

#[tokio::test]
async fn test_cancelled_launcher_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path(), 2, 3);
    let props = job_properties(dir.path(), "stopped", &sources);

    let launcher = JobLauncher::builder().build();
    launcher.cancel();
    let err = launcher.launch(&props).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(file_count(dir.path()), 2);
}

// ============================================================================
// Planning failures
// ============================================================================

#[tokio::test]
async fn test_unknown_component_fails_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path(), 2, 3);
    let props =
        job_properties(dir.path(), "unknown", &sources).with(keys::CONVERTER_CLASSES, "flatten,teleport");

    let history = Arc::new(MemoryHistoryStore::new());
    let err = JobLauncher::builder()
        .history(history.clone())
        .build()
        .launch(&props)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LaunchError::Planning(PlanningError::UnknownComponent { .. })
    ));
    assert!(!dir.path().join("staging").exists());
    assert!(!dir.path().join("output").exists());
    assert!(!dir.path().join("final").exists());
    assert!(history.records().is_empty());
}

#[tokio::test]
async fn test_missing_source_fails_planning() {
    let dir = tempfile::tempdir().unwrap();
    let props = job_properties(
        dir.path(),
        "missing",
        &[dir.path().join("does-not-exist.jsonl")],
    );

    let err = JobLauncher::builder().build().launch(&props).await.unwrap_err();
    assert!(matches!(
        err,
        LaunchError::Planning(PlanningError::SourceUnavailable { .. })
    ));
}

// ============================================================================
// Job history
// ============================================================================

#[tokio::test]
async fn test_history_records_every_launch() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path(), 3, 4);
    let props = job_properties(dir.path(), "history", &sources);

    let history = Arc::new(SqliteHistoryStore::new("sqlite::memory:"));
    let launcher = JobLauncher::builder().history(history.clone()).build();
    launcher.start().await.unwrap();

    let outcome = launcher.launch(&props).await.unwrap();
    launcher.launch(&props).await.unwrap();
    JobLauncher::builder()
        .history(history.clone())
        .collector(Arc::new(FaultyCollector))
        .build()
        .launch(&job_properties(
            dir.path(),
            "history",
            &write_sources(&dir.path().join("more"), 1, 2),
        ))
        .await
        .unwrap_err();

    let executions = history.executions("history").await.unwrap();
    assert_eq!(executions.len(), 3);
    assert_eq!(executions[0].status, JobStatus::Failed);
    assert!(executions[0].error.is_some());
    assert_eq!(executions[1].status, JobStatus::NothingToDo);

    let first = &executions[2];
    assert_eq!(first.job_id, outcome.job_id);
    assert_eq!(first.status, JobStatus::Succeeded);
    assert_eq!(first.metrics.work_units, 3);
    assert_eq!(first.metrics.records_extracted, 12);
    assert_eq!(first.metrics.records_written, vec![12]);
    assert_eq!(first.metrics.files_published, 3);

    launcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_history_failure_does_not_mask_result() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path(), 1, 2);
    let props = job_properties(dir.path(), "unopened", &sources);

    // Never opened, so every record attempt fails
    let launcher = JobLauncher::builder()
        .history(Arc::new(SqliteHistoryStore::new("sqlite::memory:")))
        .build();

    let outcome = launcher.launch(&props).await.unwrap();
    assert_eq!(outcome.status, JobStatus::Succeeded);
}
