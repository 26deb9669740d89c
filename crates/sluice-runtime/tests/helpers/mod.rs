//! Shared fixtures for launcher integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use sluice_runtime::job::keys;
use sluice_runtime::JobProperties;
use walkdir::WalkDir;

/// Write `files` JSON-lines sources with `records` records each
///
/// Every record carries its file and line number so published output can
/// be compared across runs.
pub fn write_sources(dir: &Path, files: usize, records: usize) -> Vec<PathBuf> {
    let sources = dir.join("sources");
    std::fs::create_dir_all(&sources).unwrap();

    (0..files)
        .map(|f| {
            let path = sources.join(format!("part-{:03}.jsonl", f));
            let body: String = (0..records)
                .map(|n| format!("{{\"file\":{},\"n\":{},\"name\":\"r{}-{}\"}}\n", f, n, f, n))
                .collect();
            std::fs::write(&path, body).unwrap();
            path
        })
        .collect()
}

/// Single-branch job properties rooted at `dir`
pub fn job_properties(dir: &Path, name: &str, sources: &[PathBuf]) -> JobProperties {
    let list: Vec<String> = sources.iter().map(|p| p.display().to_string()).collect();
    JobProperties::new()
        .with(keys::JOB_NAME, name)
        .with(keys::SOURCE_FILE_LIST, list.join(","))
        .with(keys::WRITER_STAGING_DIR, dir.join("staging").display())
        .with(keys::WRITER_OUTPUT_DIR, dir.join("output").display())
        .with(keys::DATA_PUBLISHER_FINAL_DIR, dir.join("final").display())
}

/// Give branch `branch` its own staging, output and final dirs
pub fn with_branch_dirs(props: JobProperties, dir: &Path, branch: usize) -> JobProperties {
    let root = dir.join(format!("b{}", branch));
    props
        .with(
            format!("{}.{}", keys::WRITER_STAGING_DIR, branch),
            root.join("staging").display(),
        )
        .with(
            format!("{}.{}", keys::WRITER_OUTPUT_DIR, branch),
            root.join("output").display(),
        )
        .with(
            format!("{}.{}", keys::DATA_PUBLISHER_FINAL_DIR, branch),
            root.join("final").display(),
        )
}

/// Number of regular files below `dir`, zero when it does not exist
pub fn file_count(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count()
}

/// Every published JSON-lines record below `dir`, sorted for comparison
pub fn published_records(dir: &Path) -> Vec<String> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut records: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .flat_map(|e| {
            std::fs::read_to_string(e.path())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect();
    records.sort();
    records
}

/// Records each published file holds, keyed by file name
pub fn records_per_file(dir: &Path) -> Vec<usize> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| std::fs::read_to_string(e.path()).unwrap().lines().count())
        .collect()
}
