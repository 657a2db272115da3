//! Fake collaborators shared by the saga test suites

#![allow(dead_code)]

use pacsflow_activities::{
    AnonymizedInstance, Anonymizer, CollaboratorError, FileImporter, ImportReceipt, Validation,
};
use pacsflow_core::{
    ExecutionLimits, FindQuery, ImportOptions, MemoryAudit, ResourceClass, ResourceConstraints,
    WorkflowEvent, WorkflowId,
};
use pacsflow_net::{
    DicomPeer, FindMatch, NetError, NetResult, NetworkCoordinator, RetryPolicy, StoreReceipt,
};
use pacsflow_saga::{InMemoryStateStore, Orchestrator, ResourceGovernor, StateStore, StoreError, StoreResult};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub fn limits(parallel: usize, timeout_ms: u64) -> ExecutionLimits {
    ExecutionLimits::new(
        parallel,
        ResourceConstraints {
            acquire_timeout_ms: timeout_ms,
            units_per_item: 1,
        },
    )
}

pub fn files(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("/in/file{}.dcm", i)).collect()
}

pub struct Harness {
    pub governor: Arc<ResourceGovernor>,
    pub store: Arc<InMemoryStateStore>,
    pub audit: Arc<MemoryAudit>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(capacities: &[(ResourceClass, usize)]) -> Self {
        Self::with_store(capacities, Arc::new(InMemoryStateStore::new()))
    }

    pub fn with_store(capacities: &[(ResourceClass, usize)], store: Arc<InMemoryStateStore>) -> Self {
        let governor = Arc::new(ResourceGovernor::new(capacities.iter().copied()));
        let audit = Arc::new(MemoryAudit::new());
        let orchestrator = Arc::new(Orchestrator::new(governor.clone(), store.clone(), audit.clone()));
        Self {
            governor,
            store,
            audit,
            orchestrator,
        }
    }

    pub fn with_dyn_store(capacities: &[(ResourceClass, usize)], store: Arc<dyn StateStore>) -> (Arc<Orchestrator>, Arc<MemoryAudit>, Arc<ResourceGovernor>) {
        let governor = Arc::new(ResourceGovernor::new(capacities.iter().copied()));
        let audit = Arc::new(MemoryAudit::new());
        let orchestrator = Arc::new(Orchestrator::new(governor.clone(), store, audit.clone()));
        (orchestrator, audit, governor)
    }

    pub fn coordinator(&self, peer: Arc<FakePeer>) -> Arc<NetworkCoordinator> {
        let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(40), true)
            .expect("valid policy");
        Arc::new(NetworkCoordinator::new(peer, policy, self.audit.clone()))
    }
}

pub fn drain(rx: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn terminal_events(events: &[WorkflowEvent]) -> Vec<&WorkflowEvent> {
    events.iter().filter(|e| e.is_terminal()).collect()
}

/// Asserts processed never decreases and never exceeds total.
pub fn assert_monotone_progress(events: &[WorkflowEvent]) {
    let mut last = 0;
    for event in events {
        if let WorkflowEvent::ProgressUpdated(report) = event {
            assert!(report.processed_items >= last, "progress went backwards");
            assert!(report.processed_items <= report.total_items);
            assert!(report.percent_complete <= 100);
            last = report.processed_items;
        }
    }
}

// ---------------------------------------------------------------------------
// File importer
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeImporter {
    pub invalid: HashMap<String, String>,
    pub delay: Duration,
    pub misconfigured: bool,
    pub imported: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl FakeImporter {
    pub fn rejecting(path: &str, reason: &str) -> Self {
        Self {
            invalid: HashMap::from([(path.to_string(), reason.to_string())]),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn imported(&self) -> Vec<String> {
        self.imported.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl FileImporter for FakeImporter {
    async fn validate_file(
        &self,
        path: &str,
        _workflow_id: WorkflowId,
        cancel: &CancellationToken,
    ) -> Result<Validation, CollaboratorError> {
        if self.misconfigured {
            return Err(CollaboratorError::Misconfigured("library directory missing".into()));
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let waited = tokio::select! {
            _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
            _ = tokio::time::sleep(self.delay) => Ok(()),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        waited?;

        Ok(match self.invalid.get(path) {
            Some(reason) => Validation::invalid(reason.clone()),
            None => Validation::valid(),
        })
    }

    async fn import_files(
        &self,
        paths: &[String],
        _options: &ImportOptions,
    ) -> Result<ImportReceipt, CollaboratorError> {
        self.imported.lock().unwrap().extend_from_slice(paths);
        Ok(ImportReceipt {
            imported: paths.len(),
            duplicates: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// Anonymizer
// ---------------------------------------------------------------------------

pub struct FakeAnonymizer {
    pub known_profiles: Vec<String>,
}

#[async_trait::async_trait]
impl Anonymizer for FakeAnonymizer {
    async fn anonymize_dataset(
        &self,
        instance_uid: &str,
        profile_id: &str,
    ) -> Result<AnonymizedInstance, CollaboratorError> {
        if !self.known_profiles.iter().any(|p| p == profile_id) {
            return Err(CollaboratorError::Misconfigured(format!("unknown profile {}", profile_id)));
        }
        Ok(AnonymizedInstance {
            original_uid: instance_uid.to_string(),
            anonymized_uid: format!("2.25.{}", instance_uid.replace('.', "")),
        })
    }
}

// ---------------------------------------------------------------------------
// Remote peer
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakePeer {
    pub remote_uids: Vec<String>,
    pub rejected_files: BTreeSet<String>,
    pub stored: Mutex<Vec<String>>,
}

impl FakePeer {
    pub fn stored(&self) -> Vec<String> {
        let mut stored = self.stored.lock().unwrap().clone();
        stored.sort();
        stored
    }
}

#[async_trait::async_trait]
impl DicomPeer for FakePeer {
    async fn echo(&self, peer_id: &str) -> NetResult<()> {
        if peer_id == "OFFLINE" {
            Err(NetError::UnknownPeer(peer_id.to_string()))
        } else {
            Ok(())
        }
    }

    async fn store(&self, _peer_id: &str, files: &[String]) -> NetResult<StoreReceipt> {
        if let Some(bad) = files.iter().find(|f| self.rejected_files.contains(*f)) {
            return Err(NetError::rejected(format!("{} refused", bad)));
        }
        self.stored.lock().unwrap().extend_from_slice(files);
        Ok(StoreReceipt {
            stored: files.len(),
            warnings: vec![],
        })
    }

    async fn find(&self, _peer_id: &str, _query: &FindQuery) -> NetResult<Vec<FindMatch>> {
        Ok(self
            .remote_uids
            .iter()
            .map(|uid| FindMatch::new([("SOPInstanceUID", uid.as_str())]))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// State store that starts failing after a number of saves
// ---------------------------------------------------------------------------

pub struct FlakyStore {
    inner: InMemoryStateStore,
    ok_saves: usize,
    saves: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_after(ok_saves: usize) -> Self {
        Self {
            inner: InMemoryStateStore::new(),
            ok_saves,
            saves: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl StateStore for FlakyStore {
    async fn save(&self, workflow_id: WorkflowId, document: serde_json::Value) -> StoreResult<()> {
        if self.saves.fetch_add(1, Ordering::SeqCst) >= self.ok_saves {
            return Err(StoreError::Unavailable("disk full".into()));
        }
        self.inner.save(workflow_id, document).await
    }

    async fn load(&self, workflow_id: WorkflowId) -> StoreResult<Option<serde_json::Value>> {
        self.inner.load(workflow_id).await
    }

    async fn delete(&self, workflow_id: WorkflowId) -> StoreResult<()> {
        self.inner.delete(workflow_id).await
    }

    async fn ids(&self) -> StoreResult<Vec<WorkflowId>> {
        self.inner.ids().await
    }
}
