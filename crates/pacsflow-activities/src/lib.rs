//! pacsflow activities - single units of saga work and the collaborators they drive
//!
//! Each activity handles one item of a batch and reports an `ItemOutcome`.
//! Item-level problems become `ItemOutcome::Failed`; only cancellation and
//! faults that would hit every item leave as `ActivityError`.

pub mod activity;
pub mod anonymize;
pub mod collaborators;
pub mod import;
pub mod transmit;

pub use activity::{Activity, ActivityContext, ActivityError, ItemOutcome};
pub use anonymize::AnonymizeInstanceActivity;
pub use collaborators::{
    AnonymizedInstance, Anonymizer, CollaboratorError, FileImporter, ImportReceipt, Validation,
};
pub use import::ImportFileActivity;
pub use transmit::TransmitActivity;
