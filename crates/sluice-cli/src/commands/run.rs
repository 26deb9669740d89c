//! `sluice run` command implementation
//!
//! Launches one job and prints a summary of what was published.

use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use tracing::warn;

use sluice_runtime::{JobLauncher, JobOutcome, JobProperties, JobStatus, LauncherConfig};

/// Launch the job described by `job_file`
///
/// Ctrl-C cancels the running job; its staging and output are still
/// cleaned up before the command returns.
pub async fn run(job_file: &Path, config: &LauncherConfig) -> Result<()> {
    let props = JobProperties::from_file(job_file)?;

    let launcher = JobLauncher::from_config(config);
    launcher.start().await?;

    let token = launcher.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling job");
            token.cancel();
        }
    });

    let result = launcher.launch(&props).await;
    interrupt.abort();
    launcher.shutdown().await?;

    match result {
        Ok(outcome) => {
            print_summary(&outcome);
            Ok(())
        }
        Err(e) => {
            for cleanup in e.cleanup_errors() {
                eprintln!("{} {}", "Cleanup failed:".yellow(), cleanup);
            }
            Err(e.into())
        }
    }
}

fn print_summary(outcome: &JobOutcome) {
    if outcome.status == JobStatus::NothingToDo {
        println!("Nothing to do: every partition of '{}' is consumed.", outcome.job_name);
        return;
    }

    let branches = outcome
        .tasks
        .iter()
        .flat_map(|t| t.branches.iter().map(|b| b.branch + 1))
        .max()
        .unwrap_or(0);

    println!("{}", "Job succeeded:".green().bold());
    println!("  Job id:            {}", outcome.job_id);
    println!("  Tasks:             {}", outcome.tasks.len());
    println!("  Records extracted: {}", outcome.records_extracted());
    for branch in 0..branches {
        println!(
            "  Branch {} written:  {}",
            branch,
            outcome.records_written(branch)
        );
    }
    println!("  Files published:   {}", outcome.published.len());
    println!("  Peak slots:        {}", outcome.peak_in_flight);
    println!(
        "  Duration:          {}ms",
        (outcome.completed_at - outcome.started_at).num_milliseconds()
    );
}
