//! Running workflow registry

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pacsflow_core::{Error, Result, WorkflowId, WorkflowKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone, Debug)]
pub struct RunningWorkflow {
    pub workflow_id: WorkflowId,
    pub kind: WorkflowKind,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Sagas currently being driven in this process, by id.
#[derive(Default)]
pub struct WorkflowRegistry {
    running: DashMap<WorkflowId, RunningWorkflow>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry lives as long as the returned guard. Fails with
    /// `AlreadyRunning` while another guard holds the same id.
    pub fn register(
        &self,
        workflow_id: WorkflowId,
        kind: WorkflowKind,
        cancel: CancellationToken,
    ) -> Result<RegistryEntry<'_>> {
        match self.running.entry(workflow_id) {
            Entry::Occupied(_) => return Err(Error::AlreadyRunning(workflow_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(RunningWorkflow {
                    workflow_id,
                    kind,
                    started_at: Utc::now(),
                    cancel,
                });
            }
        }
        Ok(RegistryEntry {
            registry: self,
            workflow_id,
        })
    }

    /// Returns false when nothing with that id is running.
    pub fn cancel(&self, workflow_id: WorkflowId) -> bool {
        match self.running.get(&workflow_id) {
            Some(entry) => {
                info!(workflow_id = %workflow_id, "Cancelling workflow");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.running.iter() {
            entry.cancel.cancel();
        }
    }

    pub fn is_running(&self, workflow_id: WorkflowId) -> bool {
        self.running.contains_key(&workflow_id)
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<RunningWorkflow> {
        let mut list: Vec<_> = self.running.iter().map(|e| e.value().clone()).collect();
        list.sort_by_key(|w| w.started_at);
        list
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}

pub struct RegistryEntry<'a> {
    registry: &'a WorkflowRegistry,
    workflow_id: WorkflowId,
}

impl Drop for RegistryEntry<'_> {
    fn drop(&mut self) {
        self.registry.running.remove(&self.workflow_id);
    }
}
