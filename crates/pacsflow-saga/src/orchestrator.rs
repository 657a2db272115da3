//! Saga orchestrator
//!
//! Drives one saga from start (or resume) to a terminal status. Units of
//! the batch run concurrently up to the payload's parallelism limit, but
//! only the consuming loop here touches `SagaState`: it applies each
//! outcome, checkpoints, and emits progress in settle order.
//!
//! A workflow-level fault (resource timeout, persistence failure, failed
//! planning step, fatal activity error) stops units that have not started
//! and signals running ones; outcomes already produced are still recorded.

use crate::governor::ResourceGovernor;
use crate::registry::WorkflowRegistry;
use crate::store::{StateStore, StateStoreExt};
use futures::StreamExt;
use pacsflow_activities::{Activity, ActivityContext, ActivityError, ItemOutcome};
use pacsflow_core::{
    AuditEventType, AuditRecord, AuditSink, Error, ResourceClass, ResourceConstraints, Result,
    SagaState, WorkflowEvent, WorkflowId, WorkflowKind, WorkflowStatus,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A workflow-level fault: what went wrong and at which step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub details: String,
    pub step: String,
}

impl Fault {
    pub fn new(details: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            details: details.into(),
            step: step.into(),
        }
    }
}

/// One kind of saga: how to prepare it and which activity handles its units.
#[async_trait::async_trait]
pub trait Workflow: Send + Sync {
    fn kind(&self) -> WorkflowKind;

    /// Steps that must succeed before any unit runs. May rewrite the payload.
    async fn plan(&self, _state: &mut SagaState, _cancel: &CancellationToken) -> std::result::Result<(), Fault> {
        Ok(())
    }

    fn activity(&self, state: &SagaState) -> Result<Arc<dyn Activity>>;
}

pub(crate) fn wrong_kind(expected: WorkflowKind, found: WorkflowKind) -> Error {
    Error::WrongKind {
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

enum UnitResult {
    Settled(ItemOutcome),
    /// Stopped before producing an outcome; the item stays in `remaining()`.
    Skipped,
    Fault(Fault),
}

/// Handle to a saga running on its own task.
pub struct WorkflowHandle {
    pub workflow_id: WorkflowId,
    pub cancel: CancellationToken,
    pub join: JoinHandle<Result<SagaState>>,
}

pub struct Orchestrator {
    governor: Arc<ResourceGovernor>,
    store: Arc<dyn StateStore>,
    audit: Arc<dyn AuditSink>,
    registry: Arc<WorkflowRegistry>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl Orchestrator {
    pub fn new(
        governor: Arc<ResourceGovernor>,
        store: Arc<dyn StateStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            governor,
            store,
            audit,
            registry: Arc::new(WorkflowRegistry::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub fn governor(&self) -> &Arc<ResourceGovernor> {
        &self.governor
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    /// Run `state` to a terminal status.
    ///
    /// A NotStarted saga starts; a Running one (an interrupted run) is picked
    /// up with its retry count bumped; a terminal one is returned unchanged.
    /// Errors when `workflow` does not handle the saga's kind, or when the
    /// same saga is already running here.
    pub async fn run(
        &self,
        mut state: SagaState,
        workflow: &dyn Workflow,
        cancel: &CancellationToken,
    ) -> Result<SagaState> {
        if workflow.kind() != state.kind() {
            return Err(wrong_kind(workflow.kind(), state.kind()));
        }
        if state.is_terminal() {
            debug!(workflow_id = %state.workflow_id, status = %state.status(), "Saga already finished");
            return Ok(state);
        }
        let activity = workflow.activity(&state)?;
        let _entry = self.registry.register(state.workflow_id, state.kind(), cancel.clone())?;

        let fault = self.begin(&mut state).await;
        let fault = match fault {
            Some(f) => Some(f),
            None => self.plan(&mut state, workflow, cancel).await,
        };
        let fault = match fault {
            Some(f) => Some(f),
            None if cancel.is_cancelled() => None,
            None => self.process(&mut state, activity, cancel).await,
        };
        Ok(self.finish(state, fault, cancel).await)
    }

    /// Load the last checkpoint of `workflow_id` and run it on.
    pub async fn resume(
        &self,
        workflow_id: WorkflowId,
        workflow: &dyn Workflow,
        cancel: &CancellationToken,
    ) -> Result<SagaState> {
        let state: SagaState = self
            .store
            .get_state(workflow_id)
            .await?
            .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))?;
        self.run(state, workflow, cancel).await
    }

    /// Run on a separate task. The handle's token cancels the run.
    pub fn spawn(self: &Arc<Self>, state: SagaState, workflow: Arc<dyn Workflow>) -> WorkflowHandle {
        let workflow_id = state.workflow_id;
        let cancel = CancellationToken::new();
        let this = self.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move { this.run(state, workflow.as_ref(), &token).await });
        WorkflowHandle {
            workflow_id,
            cancel,
            join,
        }
    }

    async fn begin(&self, state: &mut SagaState) -> Option<Fault> {
        let transition = match state.status() {
            WorkflowStatus::NotStarted => state.start(),
            _ => {
                state.note_resumed();
                Ok(())
            }
        };
        if let Err(e) = transition {
            return Some(Fault::new(e.to_string(), "start"));
        }
        info!(
            workflow_id = %state.workflow_id,
            kind = %state.kind(),
            correlation_id = %state.correlation_id,
            total = state.ledger().total(),
            remaining = state.ledger().remaining().len(),
            retry_count = state.retry_count,
            "Workflow running"
        );
        self.checkpoint(state)
            .await
            .err()
            .map(|e| Fault::new(e.to_string(), "persist initial state"))
    }

    async fn plan(
        &self,
        state: &mut SagaState,
        workflow: &dyn Workflow,
        cancel: &CancellationToken,
    ) -> Option<Fault> {
        if let Err(fault) = workflow.plan(state, cancel).await {
            return Some(fault);
        }
        self.checkpoint(state)
            .await
            .err()
            .map(|e| Fault::new(e.to_string(), "persist plan"))
    }

    async fn process(
        &self,
        state: &mut SagaState,
        activity: Arc<dyn Activity>,
        cancel: &CancellationToken,
    ) -> Option<Fault> {
        let remaining = state.ledger().remaining();
        if remaining.is_empty() {
            return None;
        }
        let limits = state.payload.limits().clone();
        let workflow_id = state.workflow_id;
        let stop = cancel.child_token();
        let classes = activity.resources();

        let mut units = futures::stream::iter(remaining.into_iter().map(|item| {
            let governor = self.governor.clone();
            let activity = activity.clone();
            let classes = classes.clone();
            let constraints = limits.resource_constraints.clone();
            let stop = stop.clone();
            async move {
                let result = run_unit(
                    &governor,
                    activity.as_ref(),
                    &classes,
                    &constraints,
                    workflow_id,
                    &stop,
                    &item,
                )
                .await;
                (item, result)
            }
        }))
        .buffer_unordered(limits.parallel_processing_limit.max(1));

        let mut fault: Option<Fault> = None;
        while let Some((item, result)) = units.next().await {
            let recorded = match result {
                UnitResult::Settled(ItemOutcome::Processed) => state.record_processed(&item),
                UnitResult::Settled(ItemOutcome::Failed(reason)) => {
                    warn!(workflow_id = %workflow_id, item = %item, reason = %reason, "Item failed");
                    state.record_failed(&item, reason)
                }
                UnitResult::Skipped => continue,
                UnitResult::Fault(f) => {
                    if fault.is_none() {
                        warn!(workflow_id = %workflow_id, step = %f.step, details = %f.details, "Workflow fault, stopping units");
                        stop.cancel();
                        fault = Some(f);
                    }
                    continue;
                }
            };

            let description = activity.describe(&item);
            if let Err(e) = recorded {
                error!(workflow_id = %workflow_id, item = %item, error = %e, "Could not record outcome");
                stop.cancel();
                fault.get_or_insert(Fault::new(e.to_string(), description));
                continue;
            }
            if let Err(e) = self.checkpoint(state).await {
                error!(workflow_id = %workflow_id, error = %e, "Checkpoint failed");
                stop.cancel();
                fault.get_or_insert(Fault::new(e.to_string(), format!("checkpoint after {}", description)));
            }
            self.emit(WorkflowEvent::ProgressUpdated(state.progress_report(description)));
        }
        fault
    }

    /// Move to the terminal status, persist it, audit it, then emit the one
    /// terminal event of this run.
    async fn finish(&self, mut state: SagaState, fault: Option<Fault>, cancel: &CancellationToken) -> SagaState {
        let workflow_id = state.workflow_id;
        let mut terminal = state.clone();
        let transition = if cancel.is_cancelled() {
            terminal.cancel()
        } else if let Some(f) = &fault {
            terminal.fail(f.details.clone(), f.step.clone())
        } else {
            terminal.complete()
        };
        if let Err(e) = transition {
            error!(workflow_id = %workflow_id, error = %e, "Terminal transition rejected");
        }

        match self.checkpoint(&terminal).await {
            Ok(()) => state = terminal,
            Err(e) if terminal.status() == WorkflowStatus::Completed => {
                error!(workflow_id = %workflow_id, error = %e, "Final state not persisted, failing workflow");
                if let Err(e) = state.fail(e.to_string(), "persist final state") {
                    error!(workflow_id = %workflow_id, error = %e, "Terminal transition rejected");
                }
                if let Err(e) = self.checkpoint(&state).await {
                    error!(workflow_id = %workflow_id, error = %e, "Failed state not persisted");
                }
            }
            Err(e) => {
                error!(workflow_id = %workflow_id, error = %e, "Final state not persisted");
                state = terminal;
            }
        }

        let ledger = state.ledger();
        let (processed, failed) = (ledger.processed().len(), ledger.failed().len());
        let now = chrono::Utc::now();
        let (record, event) = match state.status() {
            WorkflowStatus::Completed => {
                info!(workflow_id = %workflow_id, processed, failed, "Workflow completed");
                (
                    AuditRecord::success(
                        AuditEventType::WorkflowCompleted,
                        workflow_id,
                        format!("{} processed, {} failed", processed, failed),
                    ),
                    WorkflowEvent::Completed {
                        workflow_id,
                        time: now,
                        processed,
                        failed,
                    },
                )
            }
            WorkflowStatus::Cancelled => {
                info!(workflow_id = %workflow_id, processed, failed, "Workflow cancelled");
                (
                    AuditRecord::failure(AuditEventType::WorkflowCancelled, workflow_id, "cancelled"),
                    WorkflowEvent::Cancelled {
                        workflow_id,
                        time: now,
                    },
                )
            }
            _ => {
                let error_details = state.error_details.clone().unwrap_or_default();
                let failed_step = state.failed_step.clone().unwrap_or_default();
                warn!(workflow_id = %workflow_id, step = %failed_step, details = %error_details, "Workflow failed");
                (
                    AuditRecord::failure(AuditEventType::WorkflowFailed, workflow_id, error_details.clone()),
                    WorkflowEvent::Failed {
                        workflow_id,
                        time: now,
                        error_details,
                        failed_step,
                    },
                )
            }
        };
        let record = record.with_payload(serde_json::json!({
            "kind": state.kind().to_string(),
            "processed": processed,
            "failed": failed,
            "total": ledger.total(),
        }));
        self.audit.log_event(record).await;
        self.emit(event);
        state
    }

    async fn checkpoint(&self, state: &SagaState) -> Result<()> {
        self.store
            .save_state(state.workflow_id, state)
            .await
            .map_err(Error::from)
    }

    fn emit(&self, event: WorkflowEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn run_unit(
    governor: &ResourceGovernor,
    activity: &dyn Activity,
    classes: &[ResourceClass],
    constraints: &ResourceConstraints,
    workflow_id: WorkflowId,
    stop: &CancellationToken,
    item: &str,
) -> UnitResult {
    if stop.is_cancelled() {
        return UnitResult::Skipped;
    }
    let grants = match governor
        .acquire_all(
            classes,
            constraints.units_per_item,
            workflow_id,
            stop,
            constraints.acquire_timeout(),
        )
        .await
    {
        Ok(grants) => grants,
        Err(Error::Cancelled) => return UnitResult::Skipped,
        Err(e) => {
            return UnitResult::Fault(Fault::new(
                e.to_string(),
                format!("acquire resources for {}", activity.describe(item)),
            ))
        }
    };

    let ctx = ActivityContext::new(workflow_id, stop.clone());
    let result = activity.run(&ctx, item).await;
    drop(grants);

    match result {
        Ok(outcome) => UnitResult::Settled(outcome),
        Err(ActivityError::Cancelled) => UnitResult::Skipped,
        Err(e) => UnitResult::Fault(Fault::new(e.to_string(), activity.describe(item))),
    }
}
