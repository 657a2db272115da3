//! Tests for pacsflow-activities: outcome mapping for each activity

use pacsflow_activities::*;
use pacsflow_core::{ImportOptions, MemoryAudit, ResourceClass, WorkflowId};
use pacsflow_net::{
    CancellationToken, DicomPeer, FindMatch, NetError, NetResult, NetworkCoordinator, RetryPolicy,
    StoreReceipt,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn ctx() -> ActivityContext {
    ActivityContext::new(WorkflowId::new(), CancellationToken::new())
}

// ===========================================================================
// Import
// ===========================================================================

#[derive(Default)]
struct FakeImporter {
    invalid: HashMap<String, String>,
    misconfigured: bool,
    imported: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl FileImporter for FakeImporter {
    async fn validate_file(
        &self,
        path: &str,
        _workflow_id: WorkflowId,
        _cancel: &CancellationToken,
    ) -> Result<Validation, CollaboratorError> {
        if self.misconfigured {
            return Err(CollaboratorError::Misconfigured("library missing".into()));
        }
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

#[tokio::test]
async fn valid_file_is_imported() {
    let importer = Arc::new(FakeImporter::default());
    let activity = ImportFileActivity::new(importer.clone(), ImportOptions::default());

    let outcome = activity.run(&ctx(), "/in/a.dcm").await.unwrap();
    assert_eq!(outcome, ItemOutcome::Processed);
    assert_eq!(*importer.imported.lock().unwrap(), vec!["/in/a.dcm".to_string()]);
    assert_eq!(activity.resources(), vec![ResourceClass::ImportThread]);
}

#[tokio::test]
async fn invalid_file_fails_item_with_reason() {
    let importer = Arc::new(FakeImporter {
        invalid: HashMap::from([("/in/bad.dcm".to_string(), "missing DICM preamble".to_string())]),
        ..Default::default()
    });
    let activity = ImportFileActivity::new(importer.clone(), ImportOptions::default());

    let outcome = activity.run(&ctx(), "/in/bad.dcm").await.unwrap();
    assert_eq!(outcome, ItemOutcome::failed("missing DICM preamble"));
    assert!(importer.imported.lock().unwrap().is_empty());
}

#[tokio::test]
async fn misconfigured_importer_is_fatal() {
    let importer = Arc::new(FakeImporter {
        misconfigured: true,
        ..Default::default()
    });
    let activity = ImportFileActivity::new(importer, ImportOptions::default());

    let err = activity.run(&ctx(), "/in/a.dcm").await.unwrap_err();
    assert!(matches!(err, ActivityError::Fatal { ref activity, .. } if activity == "import-file"));
}

// ===========================================================================
// Anonymize
// ===========================================================================

struct FakeAnonymizer;

#[async_trait::async_trait]
impl Anonymizer for FakeAnonymizer {
    async fn anonymize_dataset(
        &self,
        instance_uid: &str,
        profile_id: &str,
    ) -> Result<AnonymizedInstance, CollaboratorError> {
        if instance_uid.ends_with(".bad") {
            return Err(CollaboratorError::Rejected("burned-in annotation".into()));
        }
        Ok(AnonymizedInstance {
            original_uid: instance_uid.to_string(),
            anonymized_uid: format!("2.25.{}.{}", profile_id.len(), instance_uid.len()),
        })
    }
}

#[tokio::test]
async fn anonymize_maps_rejection_to_item_failure() {
    let activity = AnonymizeInstanceActivity::new(Arc::new(FakeAnonymizer), "basic");
    assert_eq!(activity.run(&ctx(), "1.2.3").await.unwrap(), ItemOutcome::Processed);

    let outcome = activity.run(&ctx(), "1.2.3.bad").await.unwrap();
    assert!(outcome.is_failed());
    assert_eq!(activity.resources(), vec![ResourceClass::AnonymizationWorker]);
}

#[tokio::test]
async fn anonymize_observes_cancellation() {
    let activity = AnonymizeInstanceActivity::new(Arc::new(FakeAnonymizer), "basic");
    let ctx = ctx();
    ctx.cancel.cancel();
    assert!(matches!(
        activity.run(&ctx, "1.2.3").await,
        Err(ActivityError::Cancelled)
    ));
}

// ===========================================================================
// Transmit
// ===========================================================================

struct CountingPeer {
    calls: AtomicUsize,
    fail_with: Option<NetError>,
}

#[async_trait::async_trait]
impl DicomPeer for CountingPeer {
    async fn echo(&self, _peer_id: &str) -> NetResult<()> {
        Ok(())
    }

    async fn store(&self, _peer_id: &str, files: &[String]) -> NetResult<StoreReceipt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(StoreReceipt {
                stored: files.len(),
                warnings: vec![],
            }),
        }
    }

    async fn find(&self, _peer_id: &str, _query: &pacsflow_core::FindQuery) -> NetResult<Vec<FindMatch>> {
        Ok(vec![])
    }
}

fn transmit(peer: Arc<CountingPeer>, audit: Arc<MemoryAudit>) -> TransmitActivity {
    let policy = RetryPolicy::new(2, Duration::from_millis(100), Duration::from_millis(400), true).unwrap();
    TransmitActivity::new(Arc::new(NetworkCoordinator::new(peer, policy, audit)), "ARCHIVE")
}

#[tokio::test]
async fn transmit_success_is_processed_and_audited() {
    let peer = Arc::new(CountingPeer {
        calls: AtomicUsize::new(0),
        fail_with: None,
    });
    let audit = Arc::new(MemoryAudit::new());
    let ctx = ctx();

    let outcome = transmit(peer, audit.clone()).run(&ctx, "/lib/a.dcm").await.unwrap();
    assert_eq!(outcome, ItemOutcome::Processed);
    assert_eq!(audit.records_for(ctx.workflow_id).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn transmit_exhaustion_fails_item_not_run() {
    let peer = Arc::new(CountingPeer {
        calls: AtomicUsize::new(0),
        fail_with: Some(NetError::timeout("no response")),
    });
    let audit = Arc::new(MemoryAudit::new());

    let outcome = transmit(peer.clone(), audit).run(&ctx(), "/lib/a.dcm").await.unwrap();
    match outcome {
        ItemOutcome::Failed(reason) => assert!(reason.contains("3 attempts"), "{}", reason),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(peer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn transmit_cancellation_stops_run() {
    let peer = Arc::new(CountingPeer {
        calls: AtomicUsize::new(0),
        fail_with: None,
    });
    let ctx = ctx();
    ctx.cancel.cancel();

    let result = transmit(peer.clone(), Arc::new(MemoryAudit::new()))
        .run(&ctx, "/lib/a.dcm")
        .await;
    assert!(matches!(result, Err(ActivityError::Cancelled)));
    assert_eq!(peer.calls.load(Ordering::SeqCst), 0);
}
