//! Error types for pacsflow

use crate::state::WorkflowStatus;
use crate::types::ResourceClass;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("step can only advance while running (status: {0})")]
    NotRunning(WorkflowStatus),

    #[error("item is not part of this workflow: {0}")]
    UnknownItem(String),

    #[error("timed out waiting for {count} x {class} after {waited_ms}ms")]
    ResourceTimeout {
        class: ResourceClass,
        count: u32,
        waited_ms: u64,
    },

    #[error("requested {requested} x {class} but capacity is {capacity}")]
    ExceedsCapacity {
        class: ResourceClass,
        requested: u32,
        capacity: usize,
    },

    #[error("accounting violated: {held} x {class} held, capacity {capacity}")]
    Accounting {
        class: ResourceClass,
        held: usize,
        capacity: usize,
    },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("workflow already running: {0}")]
    AlreadyRunning(String),

    #[error("wrong workflow kind: expected {expected}, found {found}")]
    WrongKind { expected: String, found: String },

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Resource-constraint failures are reported separately from generic faults.
    pub fn is_resource_constraint(&self) -> bool {
        matches!(self, Self::ResourceTimeout { .. } | Self::ExceedsCapacity { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
