//! Job launcher
//!
//! Ties planning, grouping, dispatch, commit, watermark persistence and
//! history together for one job at a time. The launcher owns a parent
//! cancellation token; every launch runs under a child of it.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use crate::commit::{CommitCoordinator, OutputCollector, TaskOutputCollector};
use crate::config::LauncherConfig;
use crate::dispatcher::{Dispatcher, ExecutionSubstrate, LocalSubstrate};
use crate::error::{LaunchError, StateStoreError};
use crate::grouper::group_work_units;
use crate::history::{
    JobExecutionRecord, JobHistoryStore, JobMetrics, MemoryHistoryStore, SqliteHistoryStore,
};
use crate::job::{
    generate_job_id, JobOutcome, JobProperties, JobSettings, JobStatus, MultiWorkUnit,
    PublishedFile, TaskState, TaskStatus, WatermarkState, WorkUnit,
};
use crate::pipeline::{TaskRunner, DEFAULT_CHANNEL_CAPACITY};
use crate::planner::WorkUnitPlanner;
use crate::registry::Registry;
use crate::state_store::{FsStateStore, MemoryStateStore, StateStore};

/// Planned work of a job, before dispatch
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub settings: Arc<JobSettings>,
    pub units: Vec<WorkUnit>,
    pub groups: Vec<MultiWorkUnit>,
}

impl JobPlan {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

pub struct JobLauncherBuilder {
    registry: Registry,
    state_store: Arc<dyn StateStore>,
    history: Arc<dyn JobHistoryStore>,
    substrate: Arc<dyn ExecutionSubstrate>,
    collector: Arc<dyn OutputCollector>,
    channel_capacity: usize,
}

impl Default for JobLauncherBuilder {
    fn default() -> Self {
        Self {
            registry: Registry::with_builtins(),
            state_store: Arc::new(MemoryStateStore::new()),
            history: Arc::new(MemoryHistoryStore::new()),
            substrate: Arc::new(LocalSubstrate),
            collector: Arc::new(TaskOutputCollector),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl JobLauncherBuilder {
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn state_store(mut self, state_store: Arc<dyn StateStore>) -> Self {
        self.state_store = state_store;
        self
    }

    pub fn history(mut self, history: Arc<dyn JobHistoryStore>) -> Self {
        self.history = history;
        self
    }

    pub fn substrate(mut self, substrate: Arc<dyn ExecutionSubstrate>) -> Self {
        self.substrate = substrate;
        self
    }

    pub fn collector(mut self, collector: Arc<dyn OutputCollector>) -> Self {
        self.collector = collector;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> JobLauncher {
        JobLauncher {
            registry: self.registry,
            state_store: self.state_store,
            history: self.history,
            substrate: self.substrate,
            collector: self.collector,
            channel_capacity: self.channel_capacity,
            cancel: CancellationToken::new(),
        }
    }
}

pub struct JobLauncher {
    registry: Registry,
    state_store: Arc<dyn StateStore>,
    history: Arc<dyn JobHistoryStore>,
    substrate: Arc<dyn ExecutionSubstrate>,
    collector: Arc<dyn OutputCollector>,
    channel_capacity: usize,
    cancel: CancellationToken,
}

impl JobLauncher {
    pub fn builder() -> JobLauncherBuilder {
        JobLauncherBuilder::default()
    }

    /// Launcher with a filesystem state store and the configured history
    pub fn from_config(config: &LauncherConfig) -> Self {
        let history: Arc<dyn JobHistoryStore> = match &config.job_history_url {
            Some(url) => Arc::new(SqliteHistoryStore::new(url.clone())),
            None => Arc::new(MemoryHistoryStore::new()),
        };
        Self::builder()
            .state_store(Arc::new(FsStateStore::new(config.state_store_dir.clone())))
            .history(history)
            .channel_capacity(config.channel_capacity)
            .build()
    }

    /// Open the history store
    pub async fn start(&self) -> Result<(), LaunchError> {
        self.history.open().await?;
        Ok(())
    }

    /// Close the history store
    pub async fn shutdown(&self) -> Result<(), LaunchError> {
        self.history.close().await?;
        Ok(())
    }

    /// Cancel every running and future launch of this launcher
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolve, plan and group a job without running it
    pub async fn plan(&self, props: &JobProperties) -> Result<JobPlan, LaunchError> {
        let settings = Arc::new(JobSettings::resolve(props, &self.registry)?);
        let units = WorkUnitPlanner::new(self.state_store.as_ref())
            .plan(&settings)
            .await?;
        let groups = group_work_units(
            units.clone(),
            settings.max_concurrent_slots,
            settings.use_multi_work_unit,
        );
        Ok(JobPlan {
            settings,
            units,
            groups,
        })
    }

    /// Run a job to completion
    ///
    /// Returns `Ok` only once every file is published and every watermark
    /// persisted. On any task or commit failure, and on cancellation, the
    /// job's staging and output directories are removed before returning.
    pub async fn launch(&self, props: &JobProperties) -> Result<JobOutcome, LaunchError> {
        let settings = Arc::new(JobSettings::resolve(props, &self.registry)?);
        let job_id = generate_job_id(&settings.job_name);
        let span = tracing::info_span!("job", job_id = %job_id, job_name = %settings.job_name);

        let run = JobRun {
            job_id: job_id.clone(),
            settings,
            started_at: Utc::now(),
            cancel: self.cancel.child_token(),
        };

        let result = self.run(&run).instrument(span).await;
        self.record_history(&run, &result).await;
        result
    }

    async fn run(&self, run: &JobRun) -> Result<JobOutcome, LaunchError> {
        let settings = &run.settings;
        info!(
            source_type = %settings.source_type,
            sources = settings.source_files.len(),
            fork_branches = settings.fork_branches(),
            "Launching job"
        );

        let units = WorkUnitPlanner::new(self.state_store.as_ref())
            .plan(settings)
            .await?;
        if units.is_empty() {
            info!("No unconsumed work units, nothing to do");
            return Ok(run.outcome(JobStatus::NothingToDo, Vec::new(), Vec::new(), 0));
        }

        let groups = group_work_units(
            units,
            settings.max_concurrent_slots,
            settings.use_multi_work_unit,
        );
        let runner = Arc::new(
            TaskRunner::new(run.job_id.clone(), Arc::clone(settings))
                .with_channel_capacity(self.channel_capacity),
        );
        let dispatcher = Dispatcher::new(Arc::clone(&self.substrate), settings.max_concurrent_slots);
        let report = dispatcher.dispatch(groups, runner, run.cancel.clone()).await;
        let peak_in_flight = report.peak_in_flight;
        let tasks = report.into_tasks();

        let mut coordinator = CommitCoordinator::new(
            run.job_id.clone(),
            settings.branches.clone(),
            Arc::clone(&self.collector),
        );

        if run.cancel.is_cancelled() {
            warn!("Job cancelled, cleaning up");
            let cleanup_errors = coordinator.abort();
            return Err(LaunchError::Cancelled {
                job_id: run.job_id.clone(),
                cleanup_errors,
            });
        }

        if let Some(first) = tasks.iter().find(|t| !t.succeeded()) {
            let failed = tasks.iter().filter(|t| !t.succeeded()).count();
            error!(
                failed,
                total = tasks.len(),
                task_id = %first.task_id,
                "Tasks failed, cleaning up"
            );
            let cleanup_errors = coordinator.abort();
            return Err(LaunchError::TasksFailed {
                job_id: run.job_id.clone(),
                total: tasks.len(),
                failed,
                task_id: first.task_id.clone(),
                cause: first
                    .error
                    .clone()
                    .unwrap_or_else(|| first.status.as_str().to_string()),
                cleanup_errors,
            });
        }

        let report = coordinator
            .publish(&tasks)
            .map_err(|(source, cleanup_errors)| LaunchError::Commit {
                job_id: run.job_id.clone(),
                source,
                cleanup_errors,
            })?;
        for failure in &report.cleanup_errors {
            warn!(error = %failure, "Post-publish cleanup incomplete");
        }

        self.persist_watermarks(&run.job_id, &tasks).await?;

        let outcome = run.outcome(JobStatus::Succeeded, tasks, report.published, peak_in_flight);
        info!(
            tasks = outcome.tasks.len(),
            records_extracted = outcome.records_extracted(),
            files_published = outcome.published.len(),
            peak_in_flight,
            "Job succeeded"
        );
        Ok(outcome)
    }

    async fn persist_watermarks(
        &self,
        job_id: &str,
        tasks: &[TaskState],
    ) -> Result<(), StateStoreError> {
        for task in tasks.iter().filter(|t| t.status == TaskStatus::Succeeded) {
            let Some(high_watermark) = task.high_watermark else {
                continue;
            };
            let state = WatermarkState {
                partition: task.partition.clone(),
                high_watermark,
                job_id: job_id.to_string(),
                updated_at: Utc::now(),
            };
            self.state_store
                .persist_watermark(&task.work_unit_id, &state)
                .await?;
        }
        Ok(())
    }

    async fn record_history(&self, run: &JobRun, result: &Result<JobOutcome, LaunchError>) {
        let record = match result {
            Ok(outcome) => JobExecutionRecord {
                job_id: outcome.job_id.clone(),
                job_name: outcome.job_name.clone(),
                status: outcome.status,
                error: None,
                metrics: metrics(
                    &outcome.tasks,
                    &outcome.published,
                    run.settings.fork_branches(),
                    outcome.peak_in_flight,
                    0,
                ),
                started_at: outcome.started_at,
                completed_at: outcome.completed_at,
            },
            Err(e) => JobExecutionRecord {
                job_id: run.job_id.clone(),
                job_name: run.settings.job_name.clone(),
                status: if e.is_cancelled() {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Failed
                },
                error: Some(e.to_string()),
                metrics: JobMetrics {
                    cleanup_errors: e.cleanup_errors().len(),
                    ..Default::default()
                },
                started_at: run.started_at,
                completed_at: Utc::now(),
            },
        };

        if let Err(e) = self.history.record_job_outcome(&record).await {
            warn!(job_id = %run.job_id, error = %e, "Failed to record job history");
        }
    }
}

/// Per-launch identity and cancellation scope
struct JobRun {
    job_id: String,
    settings: Arc<JobSettings>,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl JobRun {
    fn outcome(
        &self,
        status: JobStatus,
        tasks: Vec<TaskState>,
        published: Vec<PublishedFile>,
        peak_in_flight: usize,
    ) -> JobOutcome {
        JobOutcome {
            job_id: self.job_id.clone(),
            job_name: self.settings.job_name.clone(),
            status,
            tasks,
            published,
            peak_in_flight,
            started_at: self.started_at,
            completed_at: Utc::now(),
        }
    }
}

fn metrics(
    tasks: &[TaskState],
    published: &[PublishedFile],
    fork_branches: usize,
    peak_in_flight: usize,
    cleanup_errors: usize,
) -> JobMetrics {
    let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
    let mut records_written = vec![0u64; fork_branches];
    let mut records_flagged = 0u64;
    for branch in tasks.iter().flat_map(|t| t.branches.iter()) {
        if let Some(written) = records_written.get_mut(branch.branch) {
            *written += branch.records_written;
        }
        records_flagged += branch.records_flagged;
    }

    JobMetrics {
        work_units: tasks.len(),
        tasks_succeeded: count(TaskStatus::Succeeded),
        tasks_failed: count(TaskStatus::Failed),
        tasks_cancelled: count(TaskStatus::Cancelled),
        records_extracted: tasks.iter().map(|t| t.records_extracted).sum(),
        records_written,
        records_flagged,
        files_published: published.len(),
        peak_in_flight_slots: peak_in_flight,
        cleanup_errors,
    }
}
