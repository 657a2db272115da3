//! Periodic archive synchronization

use crate::orchestrator::Orchestrator;
use crate::workflows::SyncWorkflow;
use pacsflow_core::{SagaState, WorkflowStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shortest period between scheduled runs.
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Summary of a schedule that stopped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub runs: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Run a fresh sync saga every `interval` until `cancel` fires. The first
/// run starts immediately. A failed run is logged and the schedule goes on;
/// runs never overlap. Intervals below `MIN_SYNC_INTERVAL` are raised to it.
pub async fn run_scheduled_sync<F>(
    orchestrator: Arc<Orchestrator>,
    workflow: Arc<SyncWorkflow>,
    mut next_state: F,
    interval: Duration,
    cancel: CancellationToken,
) -> ScheduleReport
where
    F: FnMut() -> SagaState,
{
    if interval < MIN_SYNC_INTERVAL {
        warn!(
            requested_ms = interval.as_millis() as u64,
            min_ms = MIN_SYNC_INTERVAL.as_millis() as u64,
            "Sync interval too short, using the minimum"
        );
    }
    let mut ticker = tokio::time::interval(interval.max(MIN_SYNC_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut report = ScheduleReport::default();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let state = next_state();
        let workflow_id = state.workflow_id;
        report.runs += 1;
        match orchestrator.run(state, workflow.as_ref(), &cancel).await {
            Ok(done) if done.status() == WorkflowStatus::Completed => report.completed += 1,
            Ok(done) if done.status() == WorkflowStatus::Cancelled => break,
            Ok(done) => {
                report.failed += 1;
                warn!(
                    workflow_id = %workflow_id,
                    step = done.failed_step.as_deref().unwrap_or("-"),
                    details = done.error_details.as_deref().unwrap_or("-"),
                    "Scheduled sync failed"
                );
            }
            Err(e) => {
                report.failed += 1;
                warn!(workflow_id = %workflow_id, error = %e, "Scheduled sync could not run");
            }
        }
    }

    info!(runs = report.runs, completed = report.completed, failed = report.failed, "Sync schedule stopped");
    report
}
