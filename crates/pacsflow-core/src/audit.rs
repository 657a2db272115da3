//! Audit trail contract
//!
//! Callers await `log_event` so an audit record always lands before the
//! terminal event that follows it.

use crate::types::WorkflowId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    NetworkEcho,
    NetworkStore,
    NetworkQuery,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NetworkEcho => "network.echo",
            Self::NetworkStore => "network.store",
            Self::NetworkQuery => "network.query",
            Self::WorkflowCompleted => "workflow.completed",
            Self::WorkflowFailed => "workflow.failed",
            Self::WorkflowCancelled => "workflow.cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub event_type: AuditEventType,
    pub outcome: AuditOutcome,
    pub details: String,
    pub workflow_id: WorkflowId,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn success(event_type: AuditEventType, workflow_id: WorkflowId, details: impl Into<String>) -> Self {
        Self::new(event_type, AuditOutcome::Success, workflow_id, details)
    }

    pub fn failure(event_type: AuditEventType, workflow_id: WorkflowId, details: impl Into<String>) -> Self {
        Self::new(event_type, AuditOutcome::Failure, workflow_id, details)
    }

    fn new(
        event_type: AuditEventType,
        outcome: AuditOutcome,
        workflow_id: WorkflowId,
        details: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            outcome,
            details: details.into(),
            workflow_id,
            payload: serde_json::Value::Null,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Receives audit records. Implementations must not fail the caller.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_event(&self, record: AuditRecord);
}

/// Writes audit records as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

#[async_trait::async_trait]
impl AuditSink for TracingAudit {
    async fn log_event(&self, record: AuditRecord) {
        tracing::info!(
            target: "pacsflow::audit",
            event = %record.event_type,
            outcome = ?record.outcome,
            workflow_id = %record.workflow_id,
            payload = %record.payload,
            "{}",
            record.details
        );
    }
}

/// Keeps every record in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.lock().clone()
    }

    pub fn records_for(&self, workflow_id: WorkflowId) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.workflow_id == workflow_id)
            .collect()
    }

    /// A panic elsewhere while holding the lock leaves a usable list; records
    /// are never dropped because of it.
    fn lock(&self) -> MutexGuard<'_, Vec<AuditRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Audit record list was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

#[async_trait::async_trait]
impl AuditSink for MemoryAudit {
    async fn log_event(&self, record: AuditRecord) {
        self.lock().push(record);
    }
}
