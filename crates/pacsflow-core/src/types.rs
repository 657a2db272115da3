//! Core types for pacsflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// Workflow identifier, generated once at saga creation.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Links a saga to whatever external request started it.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Fresh correlation id for sagas started without one.
    pub fn generate() -> Self {
        Self(format!("corr-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Scarce resource kinds. The derived ordering is the global acquisition order:
/// a caller holding several classes must acquire them lowest first.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    ImportThread,
    AnonymizationWorker,
    NetworkConnection,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 3] = [
        ResourceClass::ImportThread,
        ResourceClass::AnonymizationWorker,
        ResourceClass::NetworkConnection,
    ];
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ImportThread => write!(f, "import-thread"),
            Self::AnonymizationWorker => write!(f, "anonymization-worker"),
            Self::NetworkConnection => write!(f, "network-connection"),
        }
    }
}

/// The workflow type tag stored in every saga header.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Import,
    Anonymization,
    Export,
    Sync,
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Import => write!(f, "import"),
            Self::Anonymization => write!(f, "anonymization"),
            Self::Export => write!(f, "export"),
            Self::Sync => write!(f, "sync"),
        }
    }
}

/// Query/retrieve level of a C-FIND style query.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryLevel {
    Patient,
    #[default]
    Study,
    Series,
    Instance,
}

/// Matching keys sent to a remote peer, keyed by attribute keyword.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct FindQuery {
    pub level: QueryLevel,
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

impl FindQuery {
    pub fn new(level: QueryLevel) -> Self {
        Self {
            level,
            keys: BTreeMap::new(),
        }
    }

    pub fn with_key(mut self, keyword: impl Into<String>, value: impl Into<String>) -> Self {
        self.keys.insert(keyword.into(), value.into());
        self
    }
}

/// Ephemeral progress snapshot. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProgressReport {
    pub workflow_id: WorkflowId,
    pub percent_complete: u8,
    pub processed_items: usize,
    pub total_items: usize,
    pub step_description: String,
}

impl ProgressReport {
    pub fn new(
        workflow_id: WorkflowId,
        processed_items: usize,
        total_items: usize,
        step_description: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id,
            percent_complete: percent(processed_items, total_items),
            processed_items,
            total_items,
            step_description: step_description.into(),
        }
    }
}

/// floor(processed / total * 100), with an empty batch counting as done.
pub fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let processed = processed.min(total) as u128;
    ((processed * 100) / total as u128) as u8
}

/// Events emitted by orchestrators to every subscriber.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    ProgressUpdated(ProgressReport),
    Completed {
        workflow_id: WorkflowId,
        time: DateTime<Utc>,
        processed: usize,
        failed: usize,
    },
    Failed {
        workflow_id: WorkflowId,
        time: DateTime<Utc>,
        error_details: String,
        failed_step: String,
    },
    Cancelled {
        workflow_id: WorkflowId,
        time: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn workflow_id(&self) -> WorkflowId {
        match self {
            Self::ProgressUpdated(report) => report.workflow_id,
            Self::Completed { workflow_id, .. }
            | Self::Failed { workflow_id, .. }
            | Self::Cancelled { workflow_id, .. } => *workflow_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ProgressUpdated(_))
    }
}
