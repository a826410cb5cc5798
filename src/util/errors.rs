use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::network::messages::{RemoteError, RemoteErrorKind};
use crate::peers::NodeId;

/// Rejection reported by a `Participant` backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParticipantError {
    pub message: String,
}

impl ParticipantError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unverifiable peer set, stale term, malformed options.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Dial or connection failure, or no handler bound on the remote side.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Participant error: {0}")]
    Participant(#[from] ParticipantError),

    /// A request arrived that the receiver was not eligible to handle in its
    /// current batch state.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Error returned by a peer that has no closer local equivalent.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The batch was decided but at least one commit call failed.
    #[error("Batch {index} committed with errors: {source}")]
    CommitIncomplete {
        index: u64,
        #[source]
        source: Box<Error>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Runtime is shut down")]
    Shutdown,

    #[error("Node {0} is not the leader")]
    NotLeader(NodeId),

    #[error("Runtime is not initialized")]
    NotInitialized,

    #[error("Storage error: {0}")]
    Storage(String),

    /// The task driving a batch panicked or was torn down with its runtime.
    #[error("Batch task failed: {0}")]
    Task(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for cancellation and shutdown, which are not protocol-level
    /// rejections.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Shutdown)
    }

    /// Converts the error into its wire form for an RPC response.
    pub fn to_remote(&self) -> RemoteError {
        let (kind, message) = match self {
            Error::Participant(e) => (RemoteErrorKind::Participant, e.message.clone()),
            Error::ProtocolViolation(msg) => (RemoteErrorKind::ProtocolViolation, msg.clone()),
            Error::Cancelled | Error::Shutdown => (RemoteErrorKind::Unavailable, self.to_string()),
            other => (RemoteErrorKind::Internal, other.to_string()),
        };
        RemoteError { kind, message }
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        match err.kind {
            RemoteErrorKind::Participant => Error::Participant(ParticipantError::new(err.message)),
            RemoteErrorKind::ProtocolViolation => Error::ProtocolViolation(err.message),
            RemoteErrorKind::NotFound => Error::Transport(err.message),
            RemoteErrorKind::Unavailable | RemoteErrorKind::Internal => Error::Remote(err.message),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
