use crate::orchestrator::{wrong_kind, Workflow};
use pacsflow_activities::{Activity, FileImporter, ImportFileActivity};
use pacsflow_core::{
    CorrelationId, ExecutionLimits, ImportOptions, ImportPayload, ItemLedger, Result, SagaState,
    WorkflowKind, WorkflowPayload,
};
use std::sync::Arc;

/// Bulk file import: validate then import each file.
pub struct ImportWorkflow {
    importer: Arc<dyn FileImporter>,
}

impl ImportWorkflow {
    pub fn new(importer: Arc<dyn FileImporter>) -> Self {
        Self { importer }
    }

    pub fn new_state<I, S>(
        files: I,
        options: ImportOptions,
        limits: ExecutionLimits,
        correlation_id: Option<CorrelationId>,
    ) -> SagaState
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SagaState::new(
            correlation_id.unwrap_or_else(CorrelationId::generate),
            WorkflowPayload::Import(ImportPayload {
                files: ItemLedger::new(files),
                limits,
                options,
            }),
        )
    }
}

#[async_trait::async_trait]
impl Workflow for ImportWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Import
    }

    fn activity(&self, state: &SagaState) -> Result<Arc<dyn Activity>> {
        match &state.payload {
            WorkflowPayload::Import(p) => Ok(Arc::new(ImportFileActivity::new(
                self.importer.clone(),
                p.options.clone(),
            ))),
            other => Err(wrong_kind(WorkflowKind::Import, other.kind())),
        }
    }
}
