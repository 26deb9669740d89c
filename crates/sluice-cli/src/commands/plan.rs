//! `sluice plan` command implementation
//!
//! Shows the work a job would run, without dispatching it.

use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use sluice_runtime::{JobLauncher, JobPlan, JobProperties, LauncherConfig};

/// Plan the job described by `job_file` and print its groups
pub async fn run(job_file: &Path, config: &LauncherConfig) -> Result<()> {
    let props = JobProperties::from_file(job_file)?;
    let plan = JobLauncher::from_config(config).plan(&props).await?;
    print_plan(&plan);
    Ok(())
}

fn print_plan(plan: &JobPlan) {
    let settings = &plan.settings;

    println!("{}", "Job:".cyan().bold());
    println!("  Name:          {}", settings.job_name);
    println!("  Source type:   {}", settings.source_type);
    println!("  Fork branches: {}", settings.fork_branches());
    println!("  Max slots:     {}", settings.max_concurrent_slots);
    match settings.pull_limit {
        Some(limit) => println!("  Pull limit:    {}", limit),
        None => println!("  Pull limit:    unlimited"),
    }
    println!();

    if plan.is_empty() {
        println!("Nothing to do: every partition is consumed.");
        return;
    }

    println!("{}", "Groups:".cyan().bold());
    for group in &plan.groups {
        println!(
            "{} ({} units, ~{} records)",
            format!("  slot {}", group.index()).green(),
            group.len(),
            group.estimated_records()
        );
        for unit in group.units() {
            println!(
                "    {}  records {}..{}",
                unit.partition, unit.low_watermark, unit.extent
            );
        }
    }
    println!();
    println!("{}", "Summary:".cyan().bold());
    println!("  Work units: {}", plan.units.len());
    println!("  Slots:      {}", plan.groups.len());
}
