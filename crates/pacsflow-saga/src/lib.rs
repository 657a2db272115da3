//! pacsflow saga engine - resource governor, state store, orchestrator,
//! workflow kinds, running registry and scheduled sync

pub mod governor;
pub mod orchestrator;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod workflows;

pub use governor::{ResourceGovernor, ResourceGrant};
pub use orchestrator::{Fault, Orchestrator, Workflow, WorkflowHandle};
pub use registry::{RunningWorkflow, WorkflowRegistry};
pub use schedule::{run_scheduled_sync, ScheduleReport, MIN_SYNC_INTERVAL};
pub use store::{FileStateStore, InMemoryStateStore, StateStore, StateStoreExt, StoreError, StoreResult};
pub use workflows::{AnonymizationWorkflow, ExportWorkflow, ImportWorkflow, SyncWorkflow};
