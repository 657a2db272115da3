//! Saga state persistence
//!
//! `StateStore` moves raw JSON documents keyed by workflow id. The typed
//! `save_state` / `get_state` / `delete_state` helpers live on
//! `StateStoreExt` so any serde type can be stored through a trait object.

use async_trait::async_trait;
use dashmap::DashMap;
use pacsflow_core::{SagaState, WorkflowId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for pacsflow_core::Error {
    fn from(e: StoreError) -> Self {
        pacsflow_core::Error::persistence(e.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, workflow_id: WorkflowId, document: serde_json::Value) -> StoreResult<()>;

    async fn load(&self, workflow_id: WorkflowId) -> StoreResult<Option<serde_json::Value>>;

    async fn delete(&self, workflow_id: WorkflowId) -> StoreResult<()>;

    /// Every stored workflow id.
    async fn ids(&self) -> StoreResult<Vec<WorkflowId>>;
}

#[async_trait]
pub trait StateStoreExt: StateStore {
    async fn save_state<T>(&self, workflow_id: WorkflowId, state: &T) -> StoreResult<()>
    where
        T: Serialize + Sync,
    {
        let document = serde_json::to_value(state)?;
        self.save(workflow_id, document).await
    }

    async fn get_state<T>(&self, workflow_id: WorkflowId) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.load(workflow_id).await? {
            Some(document) => Ok(Some(serde_json::from_value(document)?)),
            None => Ok(None),
        }
    }

    async fn delete_state(&self, workflow_id: WorkflowId) -> StoreResult<()> {
        self.delete(workflow_id).await
    }

    /// Every stored saga that still parses, oldest first.
    async fn list_sagas(&self) -> StoreResult<Vec<SagaState>> {
        let mut sagas = Vec::new();
        for id in self.ids().await? {
            match self.get_state::<SagaState>(id).await {
                Ok(Some(state)) => sagas.push(state),
                Ok(None) => {}
                Err(e) => warn!(workflow_id = %id, error = %e, "Skipping unreadable saga state"),
            }
        }
        sagas.sort_by_key(|s| s.created_at);
        Ok(sagas)
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryStateStore {
    documents: DashMap<WorkflowId, serde_json::Value>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, workflow_id: WorkflowId, document: serde_json::Value) -> StoreResult<()> {
        self.documents.insert(workflow_id, document);
        Ok(())
    }

    async fn load(&self, workflow_id: WorkflowId) -> StoreResult<Option<serde_json::Value>> {
        Ok(self.documents.get(&workflow_id).map(|d| d.value().clone()))
    }

    async fn delete(&self, workflow_id: WorkflowId) -> StoreResult<()> {
        self.documents.remove(&workflow_id);
        Ok(())
    }

    async fn ids(&self) -> StoreResult<Vec<WorkflowId>> {
        Ok(self.documents.iter().map(|e| *e.key()).collect())
    }
}

// ---------------------------------------------------------------------------
// File store: one `<id>.json` per saga
// ---------------------------------------------------------------------------

pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, workflow_id: WorkflowId) -> PathBuf {
        self.dir.join(format!("{}.json", workflow_id))
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save(&self, workflow_id: WorkflowId, document: serde_json::Value) -> StoreResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(io_err(&self.dir))?;
        let path = self.path_for(workflow_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&document)?;
        fs::write(&tmp, bytes).await.map_err(io_err(&tmp))?;
        // Readers never observe a partial checkpoint.
        fs::rename(&tmp, &path).await.map_err(io_err(&path))?;
        debug!(workflow_id = %workflow_id, path = %path.display(), "State saved");
        Ok(())
    }

    async fn load(&self, workflow_id: WorkflowId) -> StoreResult<Option<serde_json::Value>> {
        let path = self.path_for(workflow_id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    async fn delete(&self, workflow_id: WorkflowId) -> StoreResult<()> {
        let path = self.path_for(workflow_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    async fn ids(&self) -> StoreResult<Vec<WorkflowId>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.dir)(e)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&self.dir))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<WorkflowId>().ok())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}
