//! End-to-end import against a temporary directory

use pacsflow::{collect_files, LocalLibrary, ScanError};
use pacsflow_core::{
    ExecutionLimits, ImportOptions, MemoryAudit, ResourceClass, SagaState, WorkflowStatus,
};
use pacsflow_saga::{FileStateStore, ImportWorkflow, Orchestrator, ResourceGovernor, StateStoreExt};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn write_part10(path: &Path) {
    write_part10_tagged(path, 0x00);
}

fn write_part10_tagged(path: &Path, tag: u8) {
    let mut bytes = vec![0u8; 128];
    bytes.extend_from_slice(b"DICM");
    bytes.extend_from_slice(&[0x02, 0x00, 0x00, tag]);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

// ===========================================================================
// Scanning
// ===========================================================================

#[test]
fn scan_filters_by_include_patterns_and_skips_hidden() {
    let dir = tempfile::tempdir().unwrap();
    write_part10(&dir.path().join("a/one.dcm"));
    write_part10(&dir.path().join("a/two.DCM"));
    write_part10(&dir.path().join("b/three.dcm"));
    write_part10(&dir.path().join(".trash/four.dcm"));
    std::fs::write(dir.path().join("b/readme.txt"), b"x").unwrap();

    let all = collect_files(dir.path(), &[]).unwrap();
    assert_eq!(all.len(), 4);

    let dcm = collect_files(dir.path(), &["**/*.dcm".to_string()]).unwrap();
    let names: Vec<_> = dcm
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["one.dcm", "three.dcm"]);
}

#[test]
fn scan_rejects_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        collect_files(&dir.path().join("missing"), &[]),
        Err(ScanError::NotADirectory(_))
    ));
    assert!(matches!(
        collect_files(dir.path(), &["a[".to_string()]),
        Err(ScanError::InvalidPattern { .. })
    ));
}

// ===========================================================================
// Import saga over the local library
// ===========================================================================

#[tokio::test]
async fn import_copies_valid_files_and_records_invalid_ones() {
    let input = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    for name in ["1.dcm", "2.dcm", "4.dcm", "5.dcm"] {
        write_part10(&input.path().join(name));
    }
    std::fs::write(input.path().join("3.dcm"), vec![0u8; 200]).unwrap();

    let files = collect_files(input.path(), &[]).unwrap();
    let store = Arc::new(FileStateStore::new(work.path().join("state")));
    let orchestrator = Orchestrator::new(
        Arc::new(ResourceGovernor::new([(ResourceClass::ImportThread, 2)])),
        store.clone(),
        Arc::new(MemoryAudit::new()),
    );
    let library = work.path().join("library");
    let workflow = ImportWorkflow::new(Arc::new(LocalLibrary::new(&library)));
    let state = ImportWorkflow::new_state(
        files.iter().map(|p| p.to_string_lossy().into_owned()),
        ImportOptions::default(),
        ExecutionLimits::default(),
        None,
    );
    let id = state.workflow_id;

    let done = orchestrator
        .run(state, &workflow, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.status(), WorkflowStatus::Completed);
    assert_eq!(done.ledger().processed().len(), 4);
    let (failed, reason) = done.ledger().failed().iter().next().unwrap();
    assert!(failed.ends_with("3.dcm"));
    assert!(reason.contains("DICM"));
    assert!(library.join("1.dcm").exists());
    assert!(!library.join("3.dcm").exists());

    let persisted: pacsflow_core::SagaState = store.get_state(id).await.unwrap().unwrap();
    assert_eq!(persisted.status(), WorkflowStatus::Completed);
}

#[tokio::test]
async fn reimport_counts_duplicates_as_processed() {
    let input = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_part10(&input.path().join("x.dcm"));
    let path = input.path().join("x.dcm").to_string_lossy().into_owned();

    let orchestrator = Orchestrator::new(
        Arc::new(ResourceGovernor::new([(ResourceClass::ImportThread, 1)])),
        Arc::new(FileStateStore::new(work.path().join("state"))),
        Arc::new(MemoryAudit::new()),
    );
    let workflow = ImportWorkflow::new(Arc::new(LocalLibrary::new(work.path().join("library"))));

    for _ in 0..2 {
        let state = ImportWorkflow::new_state(
            [path.clone()],
            ImportOptions::default(),
            ExecutionLimits::default(),
            None,
        );
        let done = orchestrator
            .run(state, &workflow, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.ledger().processed().len(), 1);
    }
}

async fn import_all(library: &Path, state_dir: &Path, files: Vec<String>, options: ImportOptions) -> SagaState {
    let orchestrator = Orchestrator::new(
        Arc::new(ResourceGovernor::new([(ResourceClass::ImportThread, 1)])),
        Arc::new(FileStateStore::new(state_dir)),
        Arc::new(MemoryAudit::new()),
    );
    let workflow = ImportWorkflow::new(Arc::new(LocalLibrary::new(library)));
    let state = ImportWorkflow::new_state(files, options, ExecutionLimits::default(), None);
    orchestrator
        .run(state, &workflow, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn same_file_names_in_sibling_series_are_both_kept() {
    let input = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_part10_tagged(&input.path().join("series1/IM00001"), 1);
    write_part10_tagged(&input.path().join("series2/IM00001"), 2);
    let files: Vec<String> = collect_files(input.path(), &[])
        .unwrap()
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let library = work.path().join("library");

    let options = ImportOptions {
        source_root: Some(input.path().to_path_buf()),
        ..ImportOptions::default()
    };
    let done = import_all(&library, &work.path().join("state"), files, options).await;

    assert_eq!(done.status(), WorkflowStatus::Completed);
    assert_eq!(done.ledger().processed().len(), 2);
    assert!(done.ledger().failed().is_empty());
    let first = std::fs::read(library.join("series1/IM00001")).unwrap();
    let second = std::fs::read(library.join("series2/IM00001")).unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn name_collision_with_different_content_is_a_failed_item() {
    let input = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_part10_tagged(&input.path().join("series1/IM00001"), 1);
    write_part10_tagged(&input.path().join("series2/IM00001"), 2);
    let files = vec![
        input.path().join("series1/IM00001").to_string_lossy().into_owned(),
        input.path().join("series2/IM00001").to_string_lossy().into_owned(),
    ];
    let library = work.path().join("library");

    // No source root: both map onto the same library path.
    let done = import_all(&library, &work.path().join("state"), files, ImportOptions::default()).await;

    assert_eq!(done.status(), WorkflowStatus::Completed);
    assert_eq!(done.ledger().processed().len(), 1);
    let (_, reason) = done.ledger().failed().iter().next().unwrap();
    assert!(reason.contains("different content"), "{reason}");
}
