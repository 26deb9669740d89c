//! Sluice CLI Library
//!
//! Command-line interface for launching Sluice batch jobs.
//!
//! # Overview
//!
//! - **Running jobs**: plan, dispatch, commit and record a job (`sluice run`)
//! - **Inspecting plans**: show the work units and groups a job would run (`sluice plan`)
//!
//! Both commands read a job properties file. Launcher-wide settings come
//! from the environment (see [`sluice_runtime::LauncherConfig`]).

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sluice - batch job launcher for data-ingestion pipelines
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print help as markdown
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch a job and wait for it to publish
    Run {
        /// Job properties file
        #[arg(short, long)]
        job_file: PathBuf,
    },

    /// Show the planned work units and groups without running them
    Plan {
        /// Job properties file
        #[arg(short, long)]
        job_file: PathBuf,
    },
}
