//! Moving files into final dirs and removing job-scoped directories

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use sluice_common::checksum::{compute_file_checksum, file_metadata, verify_file_checksum};
use sluice_common::types::ChecksumAlgorithm;
use sluice_common::SluiceError;

use super::collector::PublishPlan;
use crate::error::{CleanupError, CommitError};
use crate::job::PublishedFile;

/// Publish every entry of a plan, rolling back on the first failure
pub fn publish(plan: &PublishPlan) -> Result<Vec<PublishedFile>, CommitError> {
    let mut moved: Vec<PathBuf> = Vec::with_capacity(plan.len());
    let mut published = Vec::with_capacity(plan.len());

    for entry in &plan.entries {
        let result = move_file(&entry.source, &entry.destination).and_then(|()| {
            file_metadata(&entry.destination, ChecksumAlgorithm::Sha256).map_err(|source| {
                CommitError::Publish {
                    from: entry.source.clone(),
                    to: entry.destination.clone(),
                    source,
                }
            })
        });

        match result {
            Ok(metadata) => {
                debug!(
                    branch = entry.branch,
                    task_id = %entry.task_id,
                    path = %entry.destination.display(),
                    "Published file"
                );
                moved.push(entry.destination.clone());
                published.push(PublishedFile {
                    branch: entry.branch,
                    task_id: entry.task_id.clone(),
                    metadata,
                });
            }
            Err(e) => {
                if entry.destination.exists() && !matches!(e, CommitError::DestinationExists(_)) {
                    moved.push(entry.destination.clone());
                }
                rollback(&moved);
                return Err(e);
            }
        }
    }

    Ok(published)
}

fn move_file(from: &Path, to: &Path) -> Result<(), CommitError> {
    let publish_err = |source: SluiceError| CommitError::Publish {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    if to.exists() {
        return Err(CommitError::DestinationExists(to.to_path_buf()));
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| publish_err(e.into()))?;
    }

    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }

    // Rename fails across filesystems; copy, verify, then delete the source
    let expected =
        compute_file_checksum(from, ChecksumAlgorithm::Sha256).map_err(&publish_err)?;
    std::fs::copy(from, to).map_err(|e| publish_err(e.into()))?;
    verify_file_checksum(to, &expected, ChecksumAlgorithm::Sha256).map_err(&publish_err)?;
    std::fs::remove_file(from).map_err(|e| publish_err(e.into()))?;
    Ok(())
}

/// Remove files already published by a failed publish
fn rollback(moved: &[PathBuf]) {
    for path in moved.iter().rev() {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Rolled back published file"),
            Err(e) => error!(path = %path.display(), error = %e, "Failed to roll back published file"),
        }
    }
}

/// Recursively remove each directory, once per distinct path
///
/// Errors are collected, never retried.
pub fn remove_dirs<'a>(dirs: impl IntoIterator<Item = &'a Path>) -> Vec<CleanupError> {
    let unique: BTreeSet<&Path> = dirs.into_iter().collect();
    let mut errors = Vec::new();

    for dir in unique {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => debug!(path = %dir.display(), "Removed directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                warn!(path = %dir.display(), error = %source, "Cleanup failed");
                errors.push(CleanupError {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        }
    }

    errors
}
