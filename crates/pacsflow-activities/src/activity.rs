//! Activity trait and outcome types

use pacsflow_core::{ResourceClass, WorkflowId};
use tokio_util::sync::CancellationToken;

/// What happened to one item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    Processed,
    Failed(String),
}

impl ItemOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Faults that stop the whole run rather than one item.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActivityError {
    #[error("cancelled")]
    Cancelled,

    #[error("{activity}: {message}")]
    Fatal { activity: String, message: String },
}

impl ActivityError {
    pub fn fatal(activity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            activity: activity.into(),
            message: message.into(),
        }
    }
}

/// Per-run context handed to every activity invocation.
#[derive(Clone, Debug)]
pub struct ActivityContext {
    pub workflow_id: WorkflowId,
    pub cancel: CancellationToken,
}

impl ActivityContext {
    pub fn new(workflow_id: WorkflowId, cancel: CancellationToken) -> Self {
        Self { workflow_id, cancel }
    }
}

/// One unit of saga work.
///
/// The orchestrator acquires every class in `resources()` before `run` and
/// releases them afterwards, whatever `run` returns. `run` must not touch
/// saga state; the orchestrator applies the outcome.
#[async_trait::async_trait]
pub trait Activity: Send + Sync {
    /// Short name used in logs and failed-step descriptions.
    fn name(&self) -> &str;

    /// Resource classes held while one item runs.
    fn resources(&self) -> Vec<ResourceClass>;

    /// Step description for progress reports.
    fn describe(&self, item: &str) -> String {
        format!("{} {}", self.name(), item)
    }

    async fn run(&self, ctx: &ActivityContext, item: &str) -> Result<ItemOutcome, ActivityError>;
}
