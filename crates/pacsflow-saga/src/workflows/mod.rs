//! The four saga kinds

mod anonymize;
mod export;
mod import;
mod sync;

pub use anonymize::AnonymizationWorkflow;
pub use export::ExportWorkflow;
pub use import::ImportWorkflow;
pub use sync::SyncWorkflow;
