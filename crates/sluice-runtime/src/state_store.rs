//! Watermark persistence
//!
//! Watermarks are keyed by work unit id (`<job-name>::<partition>`), so a
//! re-run of the same job resumes each partition where the last successful
//! publish left it.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::StateStoreError;
use crate::job::WatermarkState;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_watermark(
        &self,
        work_unit_id: &str,
    ) -> Result<Option<WatermarkState>, StateStoreError>;

    async fn persist_watermark(
        &self,
        work_unit_id: &str,
        state: &WatermarkState,
    ) -> Result<(), StateStoreError>;
}

/// In-process store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, WatermarkState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_watermark(
        &self,
        work_unit_id: &str,
    ) -> Result<Option<WatermarkState>, StateStoreError> {
        Ok(self.states.read().await.get(work_unit_id).cloned())
    }

    async fn persist_watermark(
        &self,
        work_unit_id: &str,
        state: &WatermarkState,
    ) -> Result<(), StateStoreError> {
        self.states
            .write()
            .await
            .insert(work_unit_id.to_string(), state.clone());
        Ok(())
    }
}

type Document = BTreeMap<String, WatermarkState>;

/// One JSON document per job name under a root directory
///
/// Documents are replaced atomically by writing a temp file and renaming it.
#[derive(Debug)]
pub struct FsStateStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, work_unit_id: &str) -> PathBuf {
        let namespace = work_unit_id
            .split_once("::")
            .map(|(job_name, _)| job_name)
            .unwrap_or("default");
        self.root.join(format!("{}.watermarks.json", namespace))
    }

    async fn read_document(&self, path: &Path) -> Result<Document, StateStoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|source| StateStoreError::Serialization {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::new()),
            Err(source) => Err(StateStoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[async_trait]
impl StateStore for FsStateStore {
    async fn load_watermark(
        &self,
        work_unit_id: &str,
    ) -> Result<Option<WatermarkState>, StateStoreError> {
        let path = self.document_path(work_unit_id);
        let mut document = self.read_document(&path).await?;
        Ok(document.remove(work_unit_id))
    }

    async fn persist_watermark(
        &self,
        work_unit_id: &str,
        state: &WatermarkState,
    ) -> Result<(), StateStoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.document_path(work_unit_id);

        let mut document = self.read_document(&path).await?;
        document.insert(work_unit_id.to_string(), state.clone());

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| StateStoreError::Io { path, source }
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(io_err(&self.root))?;

        let bytes = serde_json::to_vec_pretty(&document).map_err(|source| {
            StateStoreError::Serialization {
                path: path.clone(),
                source,
            }
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(io_err(&path))?;

        debug!(
            work_unit_id = %work_unit_id,
            high_watermark = state.high_watermark,
            "Persisted watermark"
        );
        Ok(())
    }
}
