//! Launcher configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::pipeline::DEFAULT_CHANNEL_CAPACITY;

// ============================================================================
// Launcher Configuration Constants
// ============================================================================

/// Default root of the filesystem state store.
pub const DEFAULT_STATE_STORE_DIR: &str = "./state";

/// Default capacity of each fork branch channel.
pub const DEFAULT_BRANCH_CHANNEL_CAPACITY: usize = DEFAULT_CHANNEL_CAPACITY;

/// Launcher configuration
///
/// Job-specific settings come from the job properties file; this only
/// covers what is shared by every job a launcher runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    pub state_store_dir: PathBuf,
    /// SQLite URL of the job history database; in-memory history when unset
    pub job_history_url: Option<String>,
    pub channel_capacity: usize,
}

impl LauncherConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = LauncherConfig {
            state_store_dir: std::env::var("SLUICE_STATE_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_STORE_DIR)),
            job_history_url: std::env::var("SLUICE_JOB_HISTORY_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            channel_capacity: std::env::var("SLUICE_CHANNEL_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BRANCH_CHANNEL_CAPACITY),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.state_store_dir.as_os_str().is_empty() {
            anyhow::bail!("State store directory cannot be empty");
        }

        if self.channel_capacity == 0 {
            anyhow::bail!("Branch channel capacity must be greater than 0");
        }

        if let Some(url) = &self.job_history_url {
            if !url.starts_with("sqlite:") {
                anyhow::bail!("Job history URL must be a sqlite URL, got '{}'", url);
            }
        } else {
            tracing::debug!("No job history URL configured - history is kept in memory");
        }

        Ok(())
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            state_store_dir: PathBuf::from(DEFAULT_STATE_STORE_DIR),
            job_history_url: None,
            channel_capacity: DEFAULT_BRANCH_CHANNEL_CAPACITY,
        }
    }
}
