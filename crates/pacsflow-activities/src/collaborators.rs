//! Contracts for the file and anonymization collaborators

use pacsflow_core::{ImportOptions, WorkflowId};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("rejected: {0}")]
    Rejected(String),

    /// The collaborator cannot serve any item (bad profile, missing library).
    #[error("misconfigured: {0}")]
    Misconfigured(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub is_valid: bool,
    pub reason: Option<String>,
}

impl Validation {
    pub fn valid() -> Self {
        Self { is_valid: true, reason: None }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReceipt {
    pub imported: usize,
    /// Already present and left untouched.
    #[serde(default)]
    pub duplicates: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizedInstance {
    pub original_uid: String,
    pub anonymized_uid: String,
}

#[async_trait::async_trait]
pub trait FileImporter: Send + Sync {
    async fn validate_file(
        &self,
        path: &str,
        workflow_id: WorkflowId,
        cancel: &CancellationToken,
    ) -> Result<Validation, CollaboratorError>;

    async fn import_files(
        &self,
        paths: &[String],
        options: &ImportOptions,
    ) -> Result<ImportReceipt, CollaboratorError>;
}

#[async_trait::async_trait]
pub trait Anonymizer: Send + Sync {
    async fn anonymize_dataset(
        &self,
        instance_uid: &str,
        profile_id: &str,
    ) -> Result<AnonymizedInstance, CollaboratorError>;
}
