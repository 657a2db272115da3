use crate::orchestrator::{wrong_kind, Fault, Workflow};
use pacsflow_activities::{Activity, TransmitActivity};
use pacsflow_core::{
    CorrelationId, ExecutionLimits, FindQuery, ItemLedger, QueryLevel, Result, SagaState,
    SyncPayload, SyncPhase, WorkflowKind, WorkflowPayload,
};
use pacsflow_net::NetworkCoordinator;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Push local instances the remote peer does not hold.
///
/// Planning verifies the peer, asks it for its instances at instance level
/// and queues the local files whose SOP instance UID it did not report.
/// A resumed sync that already planned goes straight to transferring.
pub struct SyncWorkflow {
    coordinator: Arc<NetworkCoordinator>,
}

impl SyncWorkflow {
    pub fn new(coordinator: Arc<NetworkCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn new_state(
        peer_id: impl Into<String>,
        query: FindQuery,
        local_instances: BTreeMap<String, String>,
        limits: ExecutionLimits,
        correlation_id: Option<CorrelationId>,
    ) -> SagaState {
        SagaState::new(
            correlation_id.unwrap_or_else(CorrelationId::generate),
            WorkflowPayload::Sync(SyncPayload {
                peer_id: peer_id.into(),
                query,
                local_instances,
                phase: SyncPhase::Planning,
                files: ItemLedger::default(),
                limits,
            }),
        )
    }
}

#[async_trait::async_trait]
impl Workflow for SyncWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Sync
    }

    async fn plan(&self, state: &mut SagaState, cancel: &CancellationToken) -> std::result::Result<(), Fault> {
        let workflow_id = state.workflow_id;
        let WorkflowPayload::Sync(p) = &mut state.payload else {
            return Err(Fault::new("payload is not a sync", "plan sync"));
        };
        if p.phase == SyncPhase::Transferring {
            return Ok(());
        }

        self.coordinator
            .echo(&p.peer_id, workflow_id, cancel)
            .await
            .map_err(|e| Fault::new(e.to_string(), format!("verify peer {}", p.peer_id)))?;

        let query = FindQuery {
            level: QueryLevel::Instance,
            ..p.query.clone()
        };
        let matches = self
            .coordinator
            .query(&p.peer_id, &query, workflow_id, cancel)
            .await
            .map_err(|e| Fault::new(e.to_string(), format!("query peer {}", p.peer_id)))?;

        let remote: BTreeSet<String> = matches
            .iter()
            .filter_map(|m| m.unique_key(QueryLevel::Instance))
            .map(str::to_string)
            .collect();
        p.plan(&remote);
        info!(
            workflow_id = %workflow_id,
            peer = %p.peer_id,
            local = p.local_instances.len(),
            remote = remote.len(),
            to_send = p.files.total(),
            "Sync planned"
        );
        Ok(())
    }

    fn activity(&self, state: &SagaState) -> Result<Arc<dyn Activity>> {
        match &state.payload {
            WorkflowPayload::Sync(p) => Ok(Arc::new(TransmitActivity::new(
                self.coordinator.clone(),
                p.peer_id.clone(),
            ))),
            other => Err(wrong_kind(WorkflowKind::Sync, other.kind())),
        }
    }
}
