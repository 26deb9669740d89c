//! Concurrency-limited dispatch of work unit groups
//!
//! Every group is submitted to an [`ExecutionSubstrate`]; at most
//! `max_in_flight` slots run at once. The dispatcher waits until every slot
//! reports a terminal status, including after cancellation.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::job::{MultiWorkUnit, SlotReport, TaskState, TaskStatus};
use crate::pipeline::TaskRunner;

/// A group ready to run, with everything the substrate needs
pub struct Slot {
    pub group: MultiWorkUnit,
    pub runner: Arc<TaskRunner>,
    pub cancel: CancellationToken,
}

/// Where slots actually execute
#[async_trait]
pub trait ExecutionSubstrate: Send + Sync {
    /// Run a slot to completion
    ///
    /// An `Err` means the substrate lost the slot; every unit in it is then
    /// reported as failed.
    async fn execute(&self, slot: Slot) -> Result<SlotReport, String>;
}

/// Runs each slot as a tokio task on the current runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSubstrate;

#[async_trait]
impl ExecutionSubstrate for LocalSubstrate {
    async fn execute(&self, slot: Slot) -> Result<SlotReport, String> {
        let handle = tokio::spawn(async move {
            slot.runner.run_group(&slot.group, &slot.cancel).await
        });
        handle.await.map_err(|e| format!("slot task aborted: {}", e))
    }
}

/// Result of dispatching every group of a job
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub slots: Vec<SlotReport>,
    /// Highest number of slots observed in flight at once
    pub peak_in_flight: usize,
}

impl DispatchReport {
    pub fn tasks(&self) -> impl Iterator<Item = &TaskState> {
        self.slots.iter().flat_map(|s| s.tasks.iter())
    }

    pub fn into_tasks(self) -> Vec<TaskState> {
        self.slots.into_iter().flat_map(|s| s.tasks).collect()
    }
}

pub struct Dispatcher {
    substrate: Arc<dyn ExecutionSubstrate>,
    max_in_flight: usize,
}

impl Dispatcher {
    pub fn new(substrate: Arc<dyn ExecutionSubstrate>, max_in_flight: usize) -> Self {
        Self {
            substrate,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Dispatch every group and wait for all of them
    pub async fn dispatch(
        &self,
        groups: Vec<MultiWorkUnit>,
        runner: Arc<TaskRunner>,
        cancel: CancellationToken,
    ) -> DispatchReport {
        let total = groups.len();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        info!(
            job_id = %runner.job_id(),
            slots = total,
            max_in_flight = self.max_in_flight,
            "Dispatching work unit groups"
        );

        let mut slots: Vec<SlotReport> = stream::iter(groups)
            .map(|group| {
                let substrate = Arc::clone(&self.substrate);
                let runner = Arc::clone(&runner);
                let cancel = cancel.clone();
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);

                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);

                    let index = group.index();
                    let units = group.units().to_vec();
                    let job_id = runner.job_id().to_string();
                    let result = substrate
                        .execute(Slot {
                            group,
                            runner,
                            cancel,
                        })
                        .await;

                    in_flight.fetch_sub(1, Ordering::SeqCst);

                    match result {
                        Ok(report) => report,
                        Err(reason) => {
                            error!(job_id = %job_id, slot = index, error = %reason, "Slot lost");
                            let tasks = units
                                .iter()
                                .map(|u| TaskState::not_run(&job_id, u, TaskStatus::Failed, &reason))
                                .collect();
                            SlotReport::from_tasks(index, tasks)
                        }
                    }
                }
            })
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        slots.sort_by_key(|s| s.slot);

        DispatchReport {
            slots,
            peak_in_flight: peak.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::job::{keys, JobProperties, JobSettings, SlotStatus, WorkUnit};
    use crate::registry::Registry;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Reports success after a short sleep, tracking its own concurrency
    struct SleepySubstrate {
        current: AtomicUsize,
        max_seen: AtomicUsize,
    }

    #[async_trait]
    impl ExecutionSubstrate for SleepySubstrate {
        async fn execute(&self, slot: Slot) -> Result<SlotReport, String> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            if slot.group.index() == 3 {
                return Err("node lost".to_string());
            }
            Ok(SlotReport::from_tasks(slot.group.index(), Vec::new()))
        }
    }

    fn runner() -> Arc<TaskRunner> {
        let props = JobProperties::new()
            .with(keys::JOB_NAME, "dispatch")
            .with(keys::SOURCE_FILE_LIST, "unused.jsonl")
            .with(keys::WRITER_STAGING_DIR, "/tmp/s")
            .with(keys::WRITER_OUTPUT_DIR, "/tmp/o")
            .with(keys::DATA_PUBLISHER_FINAL_DIR, "/tmp/f");
        let settings = JobSettings::resolve(&props, &Registry::with_builtins()).unwrap();
        Arc::new(TaskRunner::new("job_dispatch_1", Arc::new(settings)))
    }

    fn groups(count: usize) -> Vec<MultiWorkUnit> {
        (0..count)
            .map(|i| {
                let unit = WorkUnit {
                    id: format!("dispatch::{}", i),
                    partition: i.to_string(),
                    path: PathBuf::from(i.to_string()),
                    low_watermark: 0,
                    extent: 1,
                    index: i,
                };
                MultiWorkUnit::new(i, vec![unit]).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        for limit in [1usize, 2, 3, 5] {
            let substrate = Arc::new(SleepySubstrate {
                current: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
            });
            let dispatcher = Dispatcher::new(substrate.clone(), limit);

            let report = dispatcher
                .dispatch(groups(12), runner(), CancellationToken::new())
                .await;

            assert_eq!(report.slots.len(), 12);
            assert!(report.peak_in_flight <= limit);
            assert!(substrate.max_seen.load(Ordering::SeqCst) <= limit);
        }
    }

    #[tokio::test]
    async fn test_lost_slot_reports_failed_tasks() {
        let substrate = Arc::new(SleepySubstrate {
            current: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        });
        let report = Dispatcher::new(substrate, 2)
            .dispatch(groups(5), runner(), CancellationToken::new())
            .await;

        let lost = &report.slots[3];
        assert_eq!(lost.status, SlotStatus::Failed);
        assert_eq!(lost.tasks.len(), 1);
        assert_eq!(lost.tasks[0].error.as_deref(), Some("node lost"));
        assert_eq!(report.tasks().count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_slots_terminate() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = Dispatcher::new(Arc::new(LocalSubstrate), 2)
            .dispatch(groups(4), runner(), cancel)
            .await;

        assert_eq!(report.slots.len(), 4);
        assert!(report
            .slots
            .iter()
            .all(|s| s.status == SlotStatus::Cancelled));
    }
}
