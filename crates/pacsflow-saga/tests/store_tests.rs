//! Tests for saga state stores

use pacsflow_core::{
    CorrelationId, ExecutionLimits, ImportOptions, SagaState, WorkflowId, WorkflowStatus,
};
use pacsflow_saga::{FileStateStore, ImportWorkflow, InMemoryStateStore, StateStore, StateStoreExt};
use serde::{Deserialize, Serialize};

fn sample() -> SagaState {
    ImportWorkflow::new_state(
        ["/in/a.dcm", "/in/b.dcm"],
        ImportOptions::default(),
        ExecutionLimits::default(),
        Some(CorrelationId::new("req-7")),
    )
}

// ===========================================================================
// File store
// ===========================================================================

#[tokio::test]
async fn file_store_round_trips_saga_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::new(dir.path().join("state"));
    let mut state = sample();
    state.start().unwrap();
    state.record_processed("/in/a.dcm").unwrap();
    let id = state.workflow_id;

    store.save_state(id, &state).await.unwrap();
    assert!(dir.path().join("state").join(format!("{}.json", id)).exists());

    let loaded: SagaState = store.get_state(id).await.unwrap().unwrap();
    assert_eq!(loaded, state);
    assert_eq!(loaded.status(), WorkflowStatus::Running);
    assert_eq!(loaded.correlation_id.as_str(), "req-7");
}

#[tokio::test]
async fn file_store_missing_entries() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::new(dir.path().join("never-created"));
    let missing: Option<SagaState> = store.get_state(WorkflowId::new()).await.unwrap();
    assert!(missing.is_none());
    assert!(store.ids().await.unwrap().is_empty());
    store.delete_state(WorkflowId::new()).await.unwrap();
}

#[tokio::test]
async fn list_skips_unreadable_documents() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::new(dir.path());
    let first = sample();
    let second = sample();
    store.save_state(first.workflow_id, &first).await.unwrap();
    store.save_state(second.workflow_id, &second).await.unwrap();
    std::fs::write(dir.path().join(format!("{}.json", WorkflowId::new())), b"{ not json").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let listed = store.list_sagas().await.unwrap();
    let ids: Vec<_> = listed.iter().map(|s| s.workflow_id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first.workflow_id) && ids.contains(&second.workflow_id));

    store.delete_state(first.workflow_id).await.unwrap();
    assert_eq!(store.list_sagas().await.unwrap().len(), 1);
}

// ===========================================================================
// Generic helpers
// ===========================================================================

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Marker {
    label: String,
    count: u32,
}

#[tokio::test]
async fn typed_helpers_store_any_serde_value() {
    let store = InMemoryStateStore::new();
    let id = WorkflowId::new();
    let marker = Marker {
        label: "nightly".into(),
        count: 3,
    };
    store.save_state(id, &marker).await.unwrap();
    assert_eq!(store.get_state::<Marker>(id).await.unwrap(), Some(marker));
    assert!(store.get_state::<SagaState>(id).await.is_err(), "shape mismatch is an error");

    store.delete_state(id).await.unwrap();
    assert!(store.is_empty());
}
