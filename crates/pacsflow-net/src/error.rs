//! Errors reported by peers and by the coordinator

use crate::retry::Transience;

pub type NetResult<T> = Result<T, NetError>;

/// Peer collaborators report the kind of failure explicitly; retry decisions
/// match on the variant, never on message text.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NetError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("i/o failure: {0}")]
    Io(String),

    #[error("{}", describe_aggregate(.0))]
    Aggregate(Vec<NetError>),

    #[error("peer rejected request: {0}")]
    Rejected(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{last} (gave up after {attempts} attempts)")]
    Exhausted { attempts: u32, last: Box<NetError> },
}

impl NetError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Attempts made before giving up, when retries ran out.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

impl Transience for NetError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Io(_) => true,
            Self::Aggregate(inner) => !inner.is_empty() && inner.iter().all(Transience::is_transient),
            _ => false,
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::Timeout(e.to_string())
        } else {
            Self::Io(e.to_string())
        }
    }
}

fn describe_aggregate(inner: &[NetError]) -> String {
    let parts: Vec<String> = inner.iter().map(|e| e.to_string()).collect();
    format!("{} failures: [{}]", inner.len(), parts.join("; "))
}
