//! Saga state: a common header plus a payload selected by workflow kind.
//!
//! The orchestrator that owns a saga is its only writer. Every mutation goes
//! through the methods here so the status and step invariants hold no matter
//! which workflow drives the state:
//!
//! - status only moves NotStarted -> Running -> {Completed | Failed | Cancelled}
//! - `current_step` never decreases and only advances while Running
//! - `updated_at` is never earlier than `created_at`

use crate::error::{Error, Result};
use crate::types::{
    percent, CorrelationId, FindQuery, ProgressReport, WorkflowId, WorkflowKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not-started"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConstraints {
    /// How long one unit may wait for its resource grant.
    pub acquire_timeout_ms: u64,
    /// Units of the activity's resource class consumed per item.
    pub units_per_item: u32,
}

impl ResourceConstraints {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for ResourceConstraints {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 30_000,
            units_per_item: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub parallel_processing_limit: usize,
    pub resource_constraints: ResourceConstraints,
}

impl ExecutionLimits {
    /// Parallelism below one is clamped to one.
    pub fn new(parallel_processing_limit: usize, resource_constraints: ResourceConstraints) -> Self {
        Self {
            parallel_processing_limit: parallel_processing_limit.max(1),
            resource_constraints,
        }
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self::new(4, ResourceConstraints::default())
    }
}

// ---------------------------------------------------------------------------
// Item ledger
// ---------------------------------------------------------------------------

/// Tracks every unit of a batch. `processed` and `failed` stay disjoint and
/// both only ever contain items from `to_process`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemLedger {
    to_process: Vec<String>,
    #[serde(default)]
    processed: BTreeSet<String>,
    #[serde(default)]
    failed: BTreeMap<String, String>,
}

impl ItemLedger {
    /// Duplicates are dropped, first occurrence wins.
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let to_process = items
            .into_iter()
            .map(Into::into)
            .filter(|item: &String| seen.insert(item.clone()))
            .collect();
        Self {
            to_process,
            processed: BTreeSet::new(),
            failed: BTreeMap::new(),
        }
    }

    pub fn items(&self) -> &[String] {
        &self.to_process
    }

    pub fn processed(&self) -> &BTreeSet<String> {
        &self.processed
    }

    pub fn failed(&self) -> &BTreeMap<String, String> {
        &self.failed
    }

    pub fn total(&self) -> usize {
        self.to_process.len()
    }

    pub fn settled_count(&self) -> usize {
        self.processed.len() + self.failed.len()
    }

    pub fn is_settled(&self, item: &str) -> bool {
        self.processed.contains(item) || self.failed.contains_key(item)
    }

    pub fn is_complete(&self) -> bool {
        self.settled_count() == self.total()
    }

    /// Items still to run, in their original order.
    pub fn remaining(&self) -> Vec<String> {
        self.to_process
            .iter()
            .filter(|item| !self.is_settled(item))
            .cloned()
            .collect()
    }

    pub fn mark_processed(&mut self, item: &str) -> Result<()> {
        self.ensure_known(item)?;
        self.failed.remove(item);
        self.processed.insert(item.to_string());
        Ok(())
    }

    pub fn mark_failed(&mut self, item: &str, reason: impl Into<String>) -> Result<()> {
        self.ensure_known(item)?;
        self.processed.remove(item);
        self.failed.insert(item.to_string(), reason.into());
        Ok(())
    }

    fn ensure_known(&self, item: &str) -> Result<()> {
        if self.to_process.iter().any(|i| i == item) {
            Ok(())
        } else {
            Err(Error::UnknownItem(item.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Options handed to the import collaborator unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    #[serde(default)]
    pub overwrite_existing: bool,
    #[serde(default)]
    pub source_label: Option<String>,
    /// Directory the files were collected from. Paths below it keep their
    /// layout in the library.
    #[serde(default)]
    pub source_root: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportPayload {
    pub files: ItemLedger,
    pub limits: ExecutionLimits,
    #[serde(default)]
    pub options: ImportOptions,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizationPayload {
    pub instances: ItemLedger,
    pub profile_id: String,
    pub limits: ExecutionLimits,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportPayload {
    pub peer_id: String,
    pub files: ItemLedger,
    pub limits: ExecutionLimits,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Remote contents not yet compared against local instances.
    Planning,
    /// Ledger holds the local files the peer is missing.
    Transferring,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub peer_id: String,
    pub query: FindQuery,
    /// SOP instance UID -> local file path.
    pub local_instances: BTreeMap<String, String>,
    pub phase: SyncPhase,
    pub files: ItemLedger,
    pub limits: ExecutionLimits,
}

impl SyncPayload {
    /// Queue every local instance whose UID the peer did not report.
    pub fn plan(&mut self, remote_uids: &BTreeSet<String>) {
        let missing = self
            .local_instances
            .iter()
            .filter(|(uid, _)| !remote_uids.contains(*uid))
            .map(|(_, path)| path.clone());
        self.files = ItemLedger::new(missing);
        self.phase = SyncPhase::Transferring;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum WorkflowPayload {
    Import(ImportPayload),
    Anonymization(AnonymizationPayload),
    Export(ExportPayload),
    Sync(SyncPayload),
}

impl WorkflowPayload {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            Self::Import(_) => WorkflowKind::Import,
            Self::Anonymization(_) => WorkflowKind::Anonymization,
            Self::Export(_) => WorkflowKind::Export,
            Self::Sync(_) => WorkflowKind::Sync,
        }
    }

    pub fn ledger(&self) -> &ItemLedger {
        match self {
            Self::Import(p) => &p.files,
            Self::Anonymization(p) => &p.instances,
            Self::Export(p) => &p.files,
            Self::Sync(p) => &p.files,
        }
    }

    pub fn ledger_mut(&mut self) -> &mut ItemLedger {
        match self {
            Self::Import(p) => &mut p.files,
            Self::Anonymization(p) => &mut p.instances,
            Self::Export(p) => &mut p.files,
            Self::Sync(p) => &mut p.files,
        }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        match self {
            Self::Import(p) => &p.limits,
            Self::Anonymization(p) => &p.limits,
            Self::Export(p) => &p.limits,
            Self::Sync(p) => &p.limits,
        }
    }
}

// ---------------------------------------------------------------------------
// Saga state
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SagaState {
    pub workflow_id: WorkflowId,
    status: WorkflowStatus,
    pub correlation_id: CorrelationId,
    pub created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    current_step: u64,
    pub error_details: Option<String>,
    pub failed_step: Option<String>,
    pub retry_count: u32,
    pub payload: WorkflowPayload,
}

impl SagaState {
    pub fn new(correlation_id: CorrelationId, payload: WorkflowPayload) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: WorkflowId::new(),
            status: WorkflowStatus::NotStarted,
            correlation_id,
            created_at: now,
            updated_at: now,
            current_step: 0,
            error_details: None,
            failed_step: None,
            retry_count: 0,
            payload,
        }
    }

    pub fn kind(&self) -> WorkflowKind {
        self.payload.kind()
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn ledger(&self) -> &ItemLedger {
        self.payload.ledger()
    }

    pub fn transition(&mut self, next: WorkflowStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(WorkflowStatus::Running)
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(WorkflowStatus::Completed)
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(WorkflowStatus::Cancelled)
    }

    pub fn fail(&mut self, error_details: impl Into<String>, failed_step: impl Into<String>) -> Result<()> {
        self.transition(WorkflowStatus::Failed)?;
        self.error_details = Some(error_details.into());
        self.failed_step = Some(failed_step.into());
        Ok(())
    }

    pub fn advance_step(&mut self) -> Result<u64> {
        if self.status != WorkflowStatus::Running {
            return Err(Error::NotRunning(self.status));
        }
        self.current_step += 1;
        self.touch();
        Ok(self.current_step)
    }

    /// Record a unit that succeeded and advance the step counter.
    pub fn record_processed(&mut self, item: &str) -> Result<u64> {
        self.ensure_running()?;
        self.payload.ledger_mut().mark_processed(item)?;
        self.advance_step()
    }

    /// Record a unit that failed and advance the step counter.
    pub fn record_failed(&mut self, item: &str, reason: impl Into<String>) -> Result<u64> {
        self.ensure_running()?;
        self.payload.ledger_mut().mark_failed(item, reason)?;
        self.advance_step()
    }

    /// Mark an interrupted run as picked up again.
    pub fn note_resumed(&mut self) {
        self.retry_count += 1;
        self.touch();
    }

    pub fn progress_report(&self, step_description: impl Into<String>) -> ProgressReport {
        let ledger = self.ledger();
        ProgressReport::new(
            self.workflow_id,
            ledger.settled_count(),
            ledger.total(),
            step_description,
        )
    }

    pub fn percent_complete(&self) -> u8 {
        let ledger = self.ledger();
        percent(ledger.settled_count(), ledger.total())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.status == WorkflowStatus::Running {
            Ok(())
        } else {
            Err(Error::NotRunning(self.status))
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.created_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import_state(files: &[&str]) -> SagaState {
        SagaState::new(
            CorrelationId::new("c-1"),
            WorkflowPayload::Import(ImportPayload {
                files: ItemLedger::new(files.iter().copied()),
                limits: ExecutionLimits::default(),
                options: ImportOptions::default(),
            }),
        )
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            for next in [
                WorkflowStatus::NotStarted,
                WorkflowStatus::Running,
                WorkflowStatus::Completed,
                WorkflowStatus::Failed,
                WorkflowStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn step_does_not_move_before_start() {
        let mut state = import_state(&["a"]);
        assert!(matches!(state.advance_step(), Err(Error::NotRunning(_))));
        assert_eq!(state.current_step(), 0);
    }

    #[test]
    fn failed_item_later_processed_leaves_failed_set() {
        let mut ledger = ItemLedger::new(["a", "b"]);
        ledger.mark_failed("a", "bad header").unwrap();
        ledger.mark_processed("a").unwrap();
        assert!(ledger.failed().is_empty());
        assert!(ledger.processed().contains("a"));
        assert_eq!(ledger.remaining(), vec!["b".to_string()]);
    }

    #[test]
    fn fail_sets_details() {
        let mut state = import_state(&["a"]);
        state.start().unwrap();
        state.fail("disk full", "checkpoint").unwrap();
        assert_eq!(state.status(), WorkflowStatus::Failed);
        assert_eq!(state.failed_step.as_deref(), Some("checkpoint"));
        assert!(state.updated_at() >= state.created_at);
    }
}
