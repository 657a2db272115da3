use crate::orchestrator::{wrong_kind, Workflow};
use pacsflow_activities::{Activity, AnonymizeInstanceActivity, Anonymizer};
use pacsflow_core::{
    AnonymizationPayload, CorrelationId, ExecutionLimits, ItemLedger, Result, SagaState,
    WorkflowKind, WorkflowPayload,
};
use std::sync::Arc;

/// Batch anonymization of instances under one profile.
pub struct AnonymizationWorkflow {
    anonymizer: Arc<dyn Anonymizer>,
}

impl AnonymizationWorkflow {
    pub fn new(anonymizer: Arc<dyn Anonymizer>) -> Self {
        Self { anonymizer }
    }

    pub fn new_state<I, S>(
        instance_uids: I,
        profile_id: impl Into<String>,
        limits: ExecutionLimits,
        correlation_id: Option<CorrelationId>,
    ) -> SagaState
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SagaState::new(
            correlation_id.unwrap_or_else(CorrelationId::generate),
            WorkflowPayload::Anonymization(AnonymizationPayload {
                instances: ItemLedger::new(instance_uids),
                profile_id: profile_id.into(),
                limits,
            }),
        )
    }
}

#[async_trait::async_trait]
impl Workflow for AnonymizationWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Anonymization
    }

    fn activity(&self, state: &SagaState) -> Result<Arc<dyn Activity>> {
        match &state.payload {
            WorkflowPayload::Anonymization(p) => Ok(Arc::new(AnonymizeInstanceActivity::new(
                self.anonymizer.clone(),
                p.profile_id.clone(),
            ))),
            other => Err(wrong_kind(WorkflowKind::Anonymization, other.kind())),
        }
    }
}
