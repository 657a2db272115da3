use crate::orchestrator::{wrong_kind, Fault, Workflow};
use pacsflow_activities::{Activity, TransmitActivity};
use pacsflow_core::{
    CorrelationId, ExecutionLimits, ExportPayload, ItemLedger, Result, SagaState, WorkflowKind,
    WorkflowPayload,
};
use pacsflow_net::NetworkCoordinator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Send files to a remote peer after verifying it answers.
pub struct ExportWorkflow {
    coordinator: Arc<NetworkCoordinator>,
}

impl ExportWorkflow {
    pub fn new(coordinator: Arc<NetworkCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn new_state<I, S>(
        peer_id: impl Into<String>,
        files: I,
        limits: ExecutionLimits,
        correlation_id: Option<CorrelationId>,
    ) -> SagaState
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SagaState::new(
            correlation_id.unwrap_or_else(CorrelationId::generate),
            WorkflowPayload::Export(ExportPayload {
                peer_id: peer_id.into(),
                files: ItemLedger::new(files),
                limits,
            }),
        )
    }
}

#[async_trait::async_trait]
impl Workflow for ExportWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Export
    }

    async fn plan(&self, state: &mut SagaState, cancel: &CancellationToken) -> std::result::Result<(), Fault> {
        let workflow_id = state.workflow_id;
        let WorkflowPayload::Export(p) = &state.payload else {
            return Err(Fault::new("payload is not an export", "verify peer"));
        };
        self.coordinator
            .echo(&p.peer_id, workflow_id, cancel)
            .await
            .map_err(|e| Fault::new(e.to_string(), format!("verify peer {}", p.peer_id)))
    }

    fn activity(&self, state: &SagaState) -> Result<Arc<dyn Activity>> {
        match &state.payload {
            WorkflowPayload::Export(p) => Ok(Arc::new(TransmitActivity::new(
                self.coordinator.clone(),
                p.peer_id.clone(),
            ))),
            other => Err(wrong_kind(WorkflowKind::Export, other.kind())),
        }
    }
}
