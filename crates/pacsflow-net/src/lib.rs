//! pacsflow net - retrying, audited access to remote DICOM peers

pub mod coordinator;
pub mod error;
pub mod peer;
pub mod retry;

pub use coordinator::NetworkCoordinator;
pub use error::{NetError, NetResult};
pub use peer::{DicomPeer, FindMatch, StoreReceipt};
pub use retry::{RetryError, RetryPolicy, RetryRecord, Transience};
pub use tokio_util::sync::CancellationToken;
