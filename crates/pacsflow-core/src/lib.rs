//! pacsflow core - shared types, saga state, configuration and error handling

pub mod audit;
pub mod config;
pub mod error;
pub mod state;
pub mod types;

pub use audit::{AuditEventType, AuditOutcome, AuditRecord, AuditSink, MemoryAudit, TracingAudit};
pub use config::PacsflowConfig;
pub use error::{Error, Result};
pub use state::*;
pub use types::*;
